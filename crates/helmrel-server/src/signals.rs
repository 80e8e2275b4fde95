//! Process signals that stop the controller.

use std::io;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cancels `shutdown` on SIGINT, or on SIGTERM on unix.
///
/// The handlers are registered before this returns, so a signal delivered
/// afterwards is never lost to the default action. Must be called from
/// within a tokio runtime.
#[cfg(unix)]
pub fn shutdown_on_signal(shutdown: CancellationToken) -> io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
            _ = shutdown.cancelled() => return,
        }
        shutdown.cancel();
    }))
}

#[cfg(not(unix))]
pub fn shutdown_on_signal(shutdown: CancellationToken) -> io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        tokio::select! {
            received = tokio::signal::ctrl_c() => match received {
                Ok(()) => info!("Received Ctrl+C"),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                    return;
                }
            },
            _ = shutdown.cancelled() => return,
        }
        shutdown.cancel();
    }))
}
