use std::path::PathBuf;
use std::time::Duration;

use helmrel_controller::{ControllerConfig, DEFAULT_REPO_URL, ExponentialBackoff};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub controller: ControllerSettings,
    #[serde(default)]
    pub backend: BackendSettings,
    /// Release manifests directory
    #[serde(default)]
    pub manifests: ManifestSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Controller validations
        if self.controller.workers == 0 {
            return Err("controller.workers must be > 0".into());
        }
        if self.controller.default_repo_url.trim().is_empty() {
            return Err("controller.default_repo_url must not be empty".into());
        }
        if self.controller.backoff_base_ms == 0 {
            return Err("controller.backoff_base_ms must be > 0".into());
        }
        if self.controller.backoff().base > self.controller.backoff().max {
            return Err("controller.backoff_base_ms must not exceed controller.backoff_max_secs".into());
        }
        if self.controller.reconcile_timeout_secs == Some(0) {
            return Err("controller.reconcile_timeout_secs must be > 0 when set".into());
        }
        if self.controller.cache_sync_timeout_secs == 0 {
            return Err("controller.cache_sync_timeout_secs must be > 0".into());
        }
        // Backend validations
        if self.backend.kind == BackendKind::Http
            && self.backend.target.as_deref().unwrap_or("").trim().is_empty()
        {
            return Err("backend.kind=http requires backend.target".into());
        }
        if self.backend.connect_timeout_ms == 0 {
            return Err("backend.connect_timeout_ms must be > 0".into());
        }
        for chart in &self.backend.charts {
            if chart.name.is_empty() || chart.versions.is_empty() {
                return Err("backend.charts entries need a name and at least one version".into());
            }
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    /// Applies command-line overrides on top of file and environment values.
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(url) = &overrides.default_repo_url {
            self.controller.default_repo_url = url.clone();
        }
        if let Some(resync) = overrides.resync_secs {
            self.controller.resync_secs = resync;
        }
        if let Some(workers) = overrides.workers {
            self.controller.workers = workers;
        }
        if let Some(target) = &overrides.backend_target {
            self.backend.kind = BackendKind::Http;
            self.backend.target = Some(target.clone());
        }
    }

    pub fn to_controller_config(&self) -> ControllerConfig {
        let c = &self.controller;
        ControllerConfig {
            workers: c.workers,
            max_retries: c.max_retries,
            backoff: c.backoff(),
            resync_interval: Duration::from_secs(c.resync_secs),
            reconcile_timeout: c.reconcile_timeout_secs.map(Duration::from_secs),
            default_repo_url: c.default_repo_url.clone(),
            cache_sync_timeout: Duration::from_secs(c.cache_sync_timeout_secs),
        }
    }
}

/// Values given on the command line. `None` keeps the configured value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub default_repo_url: Option<String>,
    pub resync_secs: Option<u64>,
    pub backend_target: Option<String>,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSettings {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
    /// Informer resync period in seconds, 0 disables resync
    #[serde(default = "default_resync_secs")]
    pub resync_secs: u64,
    #[serde(default)]
    pub reconcile_timeout_secs: Option<u64>,
    #[serde(default = "default_repo_url")]
    pub default_repo_url: String,
    #[serde(default = "default_cache_sync_timeout_secs")]
    pub cache_sync_timeout_secs: u64,
}

impl ControllerSettings {
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_secs(self.backoff_max_secs),
        )
    }
}

fn default_workers() -> usize {
    1
}
fn default_max_retries() -> u32 {
    5
}
fn default_backoff_base_ms() -> u64 {
    5
}
fn default_backoff_max_secs() -> u64 {
    1000
}
fn default_resync_secs() -> u64 {
    300
}
fn default_repo_url() -> String {
    DEFAULT_REPO_URL.into()
}
fn default_cache_sync_timeout_secs() -> u64 {
    60
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_secs: default_backoff_max_secs(),
            resync_secs: default_resync_secs(),
            reconcile_timeout_secs: None,
            default_repo_url: default_repo_url(),
            cache_sync_timeout_secs: default_cache_sync_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process backend, seeded from `backend.charts`
    #[default]
    Memory,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default)]
    pub kind: BackendKind,
    /// Base URL of the deployment service, required for `http`
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Chart catalogue served by the memory backend
    #[serde(default)]
    pub charts: Vec<ChartEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartEntry {
    #[serde(default = "default_repo_url")]
    pub repo_url: String,
    pub name: String,
    #[serde(default)]
    pub versions: Vec<String>,
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            target: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            charts: Vec::new(),
        }
    }
}

impl BackendSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestSettings {
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_debounce_ms() -> u64 {
    500
}

impl Default for ManifestSettings {
    fn default() -> Self {
        Self {
            dir: None,
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl ManifestSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_PATH: &str = "helmrel.toml";

    /// Loads the file at `path` (or `helmrel.toml`) if it exists, overlays
    /// `HELMREL__*` environment variables and validates the result.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., HELMREL__CONTROLLER__WORKERS=4
        builder = builder.add_source(
            Environment::with_prefix("HELMREL")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_controller_defaults() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.to_controller_config(), ControllerConfig::default());
    }

    #[test]
    fn test_http_backend_requires_target() {
        let mut cfg = AppConfig::default();
        cfg.backend.kind = BackendKind::Http;
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("backend.target"));

        cfg.backend.target = Some("http://127.0.0.1:44134".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut cfg = AppConfig::default();
        cfg.controller.workers = 0;
        assert!(cfg.validate().unwrap_err().contains("workers"));

        let mut cfg = AppConfig::default();
        cfg.logging.level = "verbose".into();
        assert!(cfg.validate().unwrap_err().contains("logging.level"));

        let mut cfg = AppConfig::default();
        cfg.controller.reconcile_timeout_secs = Some(0);
        assert!(cfg.validate().unwrap_err().contains("reconcile_timeout_secs"));

        let mut cfg = AppConfig::default();
        cfg.controller.backoff_base_ms = 5_000;
        cfg.controller.backoff_max_secs = 1;
        assert!(cfg.validate().unwrap_err().contains("backoff"));
    }

    #[test]
    fn test_overrides_win() {
        let mut cfg = AppConfig::default();
        cfg.apply_overrides(&Overrides {
            default_repo_url: Some("https://charts.example.com".into()),
            resync_secs: Some(0),
            backend_target: Some("http://tiller:44134".into()),
            workers: Some(4),
        });
        assert_eq!(cfg.backend.kind, BackendKind::Http);
        assert_eq!(cfg.backend.target.as_deref(), Some("http://tiller:44134"));

        let controller = cfg.to_controller_config();
        assert_eq!(controller.workers, 4);
        assert_eq!(controller.resync_interval, Duration::ZERO);
        assert_eq!(controller.default_repo_url, "https://charts.example.com");
    }

    #[test]
    fn test_empty_overrides_keep_values() {
        let mut cfg = AppConfig::default();
        cfg.controller.workers = 3;
        cfg.apply_overrides(&Overrides::default());
        assert_eq!(cfg.controller.workers, 3);
        assert_eq!(cfg.backend.kind, BackendKind::Memory);
    }
}
