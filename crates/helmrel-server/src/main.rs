use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use helmrel_server::config::Overrides;
use helmrel_server::config::loader::{DEFAULT_CONFIG_PATH, load_config};
use helmrel_server::config_watch::start_config_watcher;
use helmrel_server::signals::shutdown_on_signal;
use helmrel_server::{ServerBuilder, observability};
use tokio_util::sync::CancellationToken;

const CONFIG_DEBOUNCE: Duration = Duration::from_millis(500);

/// Deploys and upgrades chart releases declared as release records.
#[derive(Debug, Parser)]
#[command(name = "helmrel", version, about)]
struct Cli {
    /// Configuration file
    #[arg(long, env = "HELMREL_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Chart repository used when a release does not name one
    #[arg(long, value_name = "URL")]
    default_repo_url: Option<String>,

    /// Informer resync period in seconds, 0 disables resync
    #[arg(long, value_name = "SECONDS")]
    resync: Option<u64>,

    /// Address of the deployment service; selects the http backend
    #[arg(long, value_name = "URL")]
    backend_target: Option<String>,

    /// Number of concurrent reconcile workers
    #[arg(long)]
    workers: Option<usize>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            default_repo_url: self.default_repo_url.clone(),
            resync_secs: self.resync,
            backend_target: self.backend_target.clone(),
            workers: self.workers,
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    let cli = Cli::parse();

    let mut cfg = match load_config(cli.config.to_str()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };
    cfg.apply_overrides(&cli.overrides());
    if let Err(e) = cfg.validate() {
        eprintln!("Configuration error: {e}");
        std::process::exit(2);
    }

    observability::init_tracing(&cfg.logging);
    tracing::info!(
        path = %cli.config.display(),
        backend = ?cfg.backend.kind,
        workers = cfg.controller.workers,
        "Configuration loaded"
    );

    let server = match ServerBuilder::new().with_config(cfg).build().await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Startup failed: {e:#}");
            std::process::exit(2);
        }
    };

    let shutdown = CancellationToken::new();
    let signal_task = match shutdown_on_signal(shutdown.clone()) {
        Ok(task) => task,
        Err(e) => {
            eprintln!("Failed to install signal handlers: {e}");
            std::process::exit(1);
        }
    };

    let config_watcher = start_config_watcher(cli.config.clone(), CONFIG_DEBOUNCE);

    let result = server.run(shutdown.clone()).await;

    shutdown.cancel();
    let _ = signal_task.await;
    if let Some(watcher) = config_watcher {
        watcher.stop().await;
    }
    if let Err(err) = result {
        eprintln!("Controller error: {err:#}");
        std::process::exit(1);
    }
}
