//! Release manifests on disk.
//!
//! Each `*.json` or `*.toml` file in the manifest directory declares one
//! release record:
//!
//! ```toml
//! namespace = "default"
//! name = "web"
//!
//! [spec]
//! chartName = "nginx"
//! version = "1.2.0"
//! ```
//!
//! [`ManifestSync`] mirrors the directory into a [`MemoryStore`]: new files
//! create records, edited files update the spec and removed files delete the
//! record. The store stays the single source of change events for the
//! controller.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use helmrel_core::{CoreError, ReleaseKey, ReleaseRecord, ReleaseSpec};
use helmrel_storage::{MemoryStore, StorageError};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::watch::{WatchHandle, watch_dir};

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON manifest {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid TOML manifest {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid release key in {path}: {source}")]
    InvalidKey {
        path: PathBuf,
        #[source]
        source: CoreError,
    },

    #[error("{key} is already declared by {owner}")]
    Duplicate { key: ReleaseKey, owner: PathBuf },

    #[error(transparent)]
    Store(#[from] StorageError),

    #[error("failed to watch {dir}: {source}")]
    Watch {
        dir: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// On-disk shape of a manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub spec: ReleaseSpec,
}

impl Manifest {
    /// Parses a manifest, picking the format from the file extension.
    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match extension(path) {
            Some("json") => serde_json::from_str(&content).map_err(|source| ManifestError::Json {
                path: path.to_path_buf(),
                source,
            }),
            _ => toml::from_str(&content).map_err(|source| ManifestError::Toml {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn key(&self) -> Result<ReleaseKey, CoreError> {
        ReleaseKey::new(&self.namespace, &self.name)
    }
}

/// What a single path change did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Created(ReleaseKey),
    Updated(ReleaseKey),
    Unchanged(ReleaseKey),
    Deleted(ReleaseKey),
    /// Not a manifest, or a removed file that declared nothing.
    Ignored,
}

/// Keeps a [`MemoryStore`] in line with a manifest directory.
pub struct ManifestSync {
    dir: PathBuf,
    store: Arc<MemoryStore>,
    /// Which key each manifest file declared when it was last applied.
    owners: Mutex<HashMap<PathBuf, ReleaseKey>>,
}

impl ManifestSync {
    pub fn new(dir: impl Into<PathBuf>, store: Arc<MemoryStore>) -> Self {
        Self {
            dir: dir.into(),
            store,
            owners: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Applies every manifest in the directory.
    ///
    /// Broken manifests are logged and skipped. Only an unreadable directory
    /// is an error.
    pub fn load_all(&self) -> Result<usize, ManifestError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| ManifestError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_manifest(path) && path.is_file())
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            match self.sync_path(&path) {
                Ok(SyncOutcome::Ignored) => {}
                Ok(_) => loaded += 1,
                Err(e) => warn!(error = %e, "Skipping manifest"),
            }
        }
        info!(dir = %self.dir.display(), loaded, "Loaded release manifests");
        Ok(loaded)
    }

    /// Reconciles the store with the current content of `path`.
    pub fn sync_path(&self, path: &Path) -> Result<SyncOutcome, ManifestError> {
        if !is_manifest(path) {
            return Ok(SyncOutcome::Ignored);
        }
        if !path.exists() {
            return self.remove_path(path);
        }

        let manifest = Manifest::from_file(path)?;
        let key = manifest.key().map_err(|source| ManifestError::InvalidKey {
            path: path.to_path_buf(),
            source,
        })?;

        let mut owners = self.owners.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((owner, _)) = owners.iter().find(|(p, k)| **k == key && p.as_path() != path) {
            return Err(ManifestError::Duplicate {
                key,
                owner: owner.clone(),
            });
        }

        // The file was renamed to another release: drop the old one first.
        if let Some(previous) = owners.get(path).filter(|previous| **previous != key) {
            self.delete_record(previous)?;
        }

        let outcome = match self.store.get_record(&key) {
            None => {
                let record = ReleaseRecord::new(&key.namespace, &key.name, manifest.spec);
                self.store.create(record)?;
                SyncOutcome::Created(key.clone())
            }
            Some(current) if current.spec == manifest.spec => SyncOutcome::Unchanged(key.clone()),
            Some(_) => {
                self.store.update_spec(&key, manifest.spec)?;
                SyncOutcome::Updated(key.clone())
            }
        };
        owners.insert(path.to_path_buf(), key);
        debug!(path = %path.display(), outcome = ?outcome, "Applied manifest");
        Ok(outcome)
    }

    fn remove_path(&self, path: &Path) -> Result<SyncOutcome, ManifestError> {
        let removed = self
            .owners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
        match removed {
            Some(key) => {
                self.delete_record(&key)?;
                Ok(SyncOutcome::Deleted(key))
            }
            None => Ok(SyncOutcome::Ignored),
        }
    }

    fn delete_record(&self, key: &ReleaseKey) -> Result<(), ManifestError> {
        match self.store.delete(key) {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Follows the directory until the returned handle is stopped.
    pub fn watch(self: Arc<Self>, debounce: Duration) -> Result<WatchHandle, ManifestError> {
        let dir = self.dir.clone();
        watch_dir(dir.clone(), debounce, move |paths| {
            for path in paths {
                match self.sync_path(&path) {
                    Ok(SyncOutcome::Ignored) | Ok(SyncOutcome::Unchanged(_)) => {}
                    Ok(outcome) => info!(path = %path.display(), outcome = ?outcome, "Manifest change applied"),
                    Err(e) => warn!(error = %e, "Ignoring manifest change"),
                }
            }
        })
        .map_err(|source| ManifestError::Watch { dir, source })
    }
}

impl std::fmt::Debug for ManifestSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestSync")
            .field("dir", &self.dir)
            .field("store", &self.store.len())
            .finish()
    }
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|ext| ext.to_str())
}

fn is_manifest(path: &Path) -> bool {
    matches!(extension(path), Some("json" | "toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use helmrel_core::Phase;
    use tempfile::TempDir;

    fn write(dir: &TempDir, file: &str, content: &str) -> PathBuf {
        let path = dir.path().join(file);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn sync(dir: &TempDir) -> (ManifestSync, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (ManifestSync::new(dir.path(), store.clone()), store)
    }

    const WEB_TOML: &str = r#"
namespace = "default"
name = "web"

[spec]
chartName = "nginx"
version = "1.2.0"
"#;

    #[test]
    fn test_load_all_reads_json_and_toml() {
        let dir = TempDir::new().unwrap();
        write(&dir, "web.toml", WEB_TOML);
        write(
            &dir,
            "db.json",
            r#"{"namespace": "data", "name": "db", "spec": {"chartName": "postgres", "repoURL": "https://charts.example.com"}}"#,
        );
        write(&dir, "README.md", "not a manifest");

        let (sync, store) = sync(&dir);
        assert_eq!(sync.load_all().unwrap(), 2);

        let web = store
            .get_record(&ReleaseKey::new("default", "web").unwrap())
            .unwrap();
        assert_eq!(web.spec.chart_name, "nginx");
        assert_eq!(web.phase(), Phase::Unknown);
        let db = store
            .get_record(&ReleaseKey::new("data", "db").unwrap())
            .unwrap();
        assert_eq!(db.spec.repo_url.as_deref(), Some("https://charts.example.com"));
    }

    #[test]
    fn test_broken_manifest_is_skipped() {
        let dir = TempDir::new().unwrap();
        write(&dir, "web.toml", WEB_TOML);
        write(&dir, "broken.json", "{ nope");
        write(
            &dir,
            "bad-key.toml",
            "namespace = \"Default\"\nname = \"web\"\n",
        );

        let (sync, store) = sync(&dir);
        assert_eq!(sync.load_all().unwrap(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_missing_dir_is_error() {
        let store = Arc::new(MemoryStore::new());
        let sync = ManifestSync::new("/nonexistent/manifests", store);
        assert!(matches!(sync.load_all(), Err(ManifestError::Io { .. })));
    }

    #[test]
    fn test_edit_updates_spec_and_removal_deletes() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "web.toml", WEB_TOML);
        let (sync, store) = sync(&dir);
        let key = ReleaseKey::new("default", "web").unwrap();

        assert_eq!(sync.sync_path(&path).unwrap(), SyncOutcome::Created(key.clone()));
        assert_eq!(sync.sync_path(&path).unwrap(), SyncOutcome::Unchanged(key.clone()));
        let before = store.get_record(&key).unwrap();

        write(&dir, "web.toml", &WEB_TOML.replace("1.2.0", "1.3.0"));
        assert_eq!(sync.sync_path(&path).unwrap(), SyncOutcome::Updated(key.clone()));
        let after = store.get_record(&key).unwrap();
        assert_eq!(after.spec.version, "1.3.0");
        assert_eq!(after.metadata.generation, before.metadata.generation + 1);

        std::fs::remove_file(&path).unwrap();
        assert_eq!(sync.sync_path(&path).unwrap(), SyncOutcome::Deleted(key.clone()));
        assert!(store.get_record(&key).is_none());
        assert_eq!(sync.sync_path(&path).unwrap(), SyncOutcome::Ignored);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let dir = TempDir::new().unwrap();
        let first = write(&dir, "web.toml", WEB_TOML);
        let second = write(&dir, "web-copy.toml", WEB_TOML);
        let (sync, _store) = sync(&dir);

        sync.sync_path(&first).unwrap();
        let err = sync.sync_path(&second).unwrap_err();
        assert!(matches!(err, ManifestError::Duplicate { owner, .. } if owner == first));
    }

    #[test]
    fn test_renamed_release_replaces_old_record() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "web.toml", WEB_TOML);
        let (sync, store) = sync(&dir);
        sync.sync_path(&path).unwrap();

        write(&dir, "web.toml", &WEB_TOML.replace("name = \"web\"", "name = \"site\""));
        let outcome = sync.sync_path(&path).unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Created(ReleaseKey::new("default", "site").unwrap())
        );
        assert!(
            store
                .get_record(&ReleaseKey::new("default", "web").unwrap())
                .is_none()
        );
    }
}
