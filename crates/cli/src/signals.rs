//! Signal handling for cooperative cancellation.
//!
//! Listens for SIGTERM and SIGINT on Unix platforms and Ctrl+C on all
//! platforms. The first signal raises the cancel flag; the running sync stops
//! at its next step boundary.

use std::sync::atomic::Ordering;

use tracing::{error, warn};

use downsync_core::CancelFlag;

/// Wait for a shutdown signal (SIGTERM, SIGINT, or Ctrl+C), then raise `flag`.
pub async fn cancel_on_shutdown(flag: CancelFlag) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("received SIGINT (Ctrl+C), stopping after the current step");
        }
        _ = terminate => {
            warn!("received SIGTERM, stopping after the current step");
        }
    }
    flag.store(true, Ordering::SeqCst);
}
