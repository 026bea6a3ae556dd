use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown via CancellationToken.
/// Cancels on SIGTERM or Ctrl+C, whichever comes first.
#[derive(Debug, Default)]
pub struct ShutdownGuard {
    token: CancellationToken,
}

impl ShutdownGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// The token the listener and any background tasks watch.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn a background task that listens for OS signals and triggers cancellation.
    pub fn spawn_signal_listener(&self) {
        let token = self.token.clone();
        tokio::spawn(async move {
            let ctrl_c = async {
                if let Err(e) = signal::ctrl_c().await {
                    tracing::warn!(error = %e, "failed to listen for Ctrl+C");
                    std::future::pending::<()>().await;
                }
            };

            #[cfg(unix)]
            let terminate = async {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to register SIGTERM handler");
                        std::future::pending::<()>().await;
                    }
                }
            };
            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => tracing::info!("received Ctrl+C, initiating shutdown"),
                _ = terminate => tracing::info!("received SIGTERM, initiating shutdown"),
                _ = token.cancelled() => return,
            }
            token.cancel();
        });
    }
}
