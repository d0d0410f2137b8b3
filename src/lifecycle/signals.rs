//! OS signal handling.
//!
//! Resolves once the process receives SIGINT or SIGTERM (Ctrl-C on non-unix).

/// Wait for a termination signal.
#[cfg(unix)]
pub async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install SIGTERM handler, only Ctrl+C will stop the proxy");
            wait_for_ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = terminate.recv() => tracing::info!(signal = "SIGTERM", "Shutdown signal received"),
        _ = wait_for_ctrl_c() => {}
    }
}

#[cfg(not(unix))]
pub async fn wait_for_termination() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!(signal = "SIGINT", "Shutdown signal received"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    }
}
