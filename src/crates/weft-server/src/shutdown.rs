//! Graceful shutdown handling
//!
//! Installs SIGINT/SIGTERM handlers over the shared [`CancelSignal`] so the
//! HTTP server, the execution worker, and the health probe wind down
//! together.

use tracing::warn;
use weft_registry::CancelSignal;

/// Install signal handlers that trip `shutdown` on SIGINT or SIGTERM
pub fn install_signal_handlers(shutdown: CancelSignal) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGINT handler");
                    return;
                }
            };
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    return;
                }
            };

            tokio::select! {
                _ = sigint.recv() => warn!("Received SIGINT, shutting down"),
                _ = sigterm.recv() => warn!("Received SIGTERM, shutting down"),
            }
            shutdown.cancel();
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to await ctrl-c");
                return;
            }
            warn!("Received ctrl-c, shutting down");
            shutdown.cancel();
        }
    })
}
