//! Graceful shutdown handling

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shutdown notification shared by every server component
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Resolves once shutdown has been triggered, even if that happened earlier
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }
}

/// Trigger `shutdown` on Ctrl+C or SIGTERM
pub fn listen_for_os_signals(shutdown: ShutdownSignal) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to install Ctrl+C handler");
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
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
            _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
            _ = shutdown.wait() => return,
        }

        shutdown.shutdown();
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_shutdown_signal_reaches_clones() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());

        signal.shutdown();
        tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_after_shutdown_returns() {
        let signal = ShutdownSignal::new();
        signal.shutdown();

        tokio::time::timeout(Duration::from_millis(100), signal.wait())
            .await
            .unwrap();
    }
}
