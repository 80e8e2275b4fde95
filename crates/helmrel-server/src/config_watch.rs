use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::loader;
use crate::watch::{WatchHandle, watch_dir};

/// Watch the configuration file and re-apply the logging level when it
/// changes. Everything else in the file takes effect on restart.
///
/// Returns `None` when the file does not exist or cannot be watched.
pub fn start_config_watcher(path: PathBuf, debounce: Duration) -> Option<WatchHandle> {
    if !path.is_file() {
        warn!(path = %path.display(), "Config file does not exist; watcher disabled");
        return None;
    }

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path.file_name().map(|name| name.to_os_string());

    let watched = path.clone();
    let result = watch_dir(dir, debounce, move |paths| {
        let touched = paths
            .iter()
            .any(|changed| changed.file_name().map(|n| n.to_os_string()) == file_name);
        if touched {
            reload(&watched);
        }
    });

    match result {
        Ok(handle) => Some(handle),
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to start config watcher");
            None
        }
    }
}

fn reload(path: &Path) {
    match loader::load_config(path.to_str()) {
        Ok(cfg) => {
            if crate::observability::apply_logging_level(&cfg.logging.level) {
                info!(level = %cfg.logging.level, "Configuration reloaded, logging level applied");
            }
        }
        Err(e) => error!(path = %path.display(), error = %e, "Configuration reload failed"),
    }
}
