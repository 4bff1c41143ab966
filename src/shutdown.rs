//! Signal handling for graceful drain
//!
//! SIGINT and SIGTERM cancel a [`CancellationToken`]. The worker and sink
//! loops check the token between batches, so the batch in flight finishes
//! and commits its offsets before the process exits.

use tokio_util::sync::CancellationToken;

/// Spawns a task that cancels the returned token on SIGINT or SIGTERM
///
/// Must be called from within a tokio runtime.
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        trigger.cancel();
    });

    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install SIGTERM handler, only Ctrl+C will stop the process");
            wait_for_ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT, draining");
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, draining");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C, draining"),
        Err(e) => {
            // Without any signal handler the process can only be killed; keep running
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}
