//! Shutdown on SIGINT/SIGTERM

use tokio_util::sync::CancellationToken;

/// Returns a child of `parent` which is cancelled upon receiving SIGINT or
/// SIGTERM (Ctrl+C only, on non-Unix platforms)
///
/// Must be called from within a Tokio runtime.
pub fn shutdown_token(parent: &CancellationToken) -> CancellationToken {
    let token = parent.child_token();
    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            signal = wait_for_signal() => {
                tracing::info!("Received {}, initiating shutdown...", signal);
                cancel.cancel();
            }
        }
    });
    token
}

/// Wait for a shutdown signal and return its name
async fn wait_for_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_parent_cancels_shutdown_token() {
        let parent = CancellationToken::new();
        let token = shutdown_token(&parent);
        assert!(!token.is_cancelled());

        parent.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), token.cancelled())
            .await
            .unwrap();
    }
}
