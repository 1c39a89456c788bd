//! Process termination wiring.
//!
//! Both binaries stop on SIGINT (Ctrl+C) or SIGTERM. The HTTP server uses
//! [`shutdown_signal`] for graceful shutdown; the consumer maps the same
//! signals onto a [`CancellationSignal`] with [`cancel_on_shutdown`].

use crate::cancellation::CancellationSignal;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Resolve when the process is asked to terminate.
///
/// If a handler cannot be installed the failure is logged and that source is
/// ignored; the other source still works.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        },
    }
}

/// Spawn a task that sets `signal` when the process is asked to terminate.
///
/// The task also ends quietly if the signal is set by someone else first.
pub fn cancel_on_shutdown(signal: CancellationSignal) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => signal.cancel(),
            _ = signal.cancelled() => {}
        }
    })
}

#[cfg(test)]
#[path = "shutdown_tests.rs"]
mod tests;
