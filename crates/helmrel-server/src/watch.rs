//! Debounced directory watching shared by the manifest and config watchers.

use std::path::PathBuf;
use std::time::Duration;

use notify::{RecursiveMode, Watcher};
use notify_debouncer_mini::{DebounceEventResult, new_debouncer};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Handle for a running watcher
pub struct WatchHandle {
    handle: JoinHandle<()>,
    shutdown: oneshot::Sender<()>,
}

impl WatchHandle {
    /// Stop the watcher and wait for its task to exit
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

/// Watches `dir` non-recursively and calls `on_change` with the paths of
/// every debounced batch.
///
/// Must be called from within a tokio runtime.
pub fn watch_dir<F>(
    dir: PathBuf,
    debounce: Duration,
    mut on_change: F,
) -> Result<WatchHandle, notify::Error>
where
    F: FnMut(Vec<PathBuf>) + Send + 'static,
{
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut debouncer = new_debouncer(debounce, move |res: DebounceEventResult| {
        let _ = events_tx.send(res);
    })?;
    debouncer
        .watcher()
        .watch(&dir, RecursiveMode::NonRecursive)?;

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        // Dropping the debouncer stops the underlying watcher.
        let _debouncer = debouncer;
        info!(dir = %dir.display(), "Started watching directory");

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                received = events_rx.recv() => match received {
                    Some(Ok(events)) => {
                        let mut paths: Vec<PathBuf> =
                            events.into_iter().map(|event| event.path).collect();
                        paths.sort();
                        paths.dedup();
                        on_change(paths);
                    }
                    Some(Err(e)) => error!(dir = %dir.display(), error = %e, "Watch error"),
                    None => break,
                },
            }
        }

        info!(dir = %dir.display(), "Directory watcher stopped");
    });

    Ok(WatchHandle {
        handle,
        shutdown: shutdown_tx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::time::timeout;
    use tokio_test::block_on;

    #[test]
    fn test_missing_dir_is_error() {
        block_on(async {
            let result = watch_dir(
                PathBuf::from("/nonexistent/helmrel"),
                Duration::from_millis(50),
                |_| {},
            );
            assert!(result.is_err());
        });
    }

    #[tokio::test]
    async fn test_reports_changed_paths() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = watch_dir(dir.path().to_path_buf(), Duration::from_millis(50), move |paths| {
            let _ = tx.send(paths);
        })
        .unwrap();

        // Give watcher time to start
        tokio::time::sleep(Duration::from_millis(200)).await;
        let file = dir.path().join("web.toml");
        std::fs::write(&file, "name = \"web\"").unwrap();

        let paths = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timeout waiting for change")
            .expect("channel closed");
        assert!(paths.iter().any(|p| p.file_name() == file.file_name()));

        handle.stop().await;
    }
}
