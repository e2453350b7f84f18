//! Graceful Shutdown Handling
//!
//! Listens for OS termination signals (SIGTERM, SIGINT), triggers the
//! engine's run-wide cancellation scope, and waits for active sessions
//! to drain. With a positive receive timeout configured, every idle
//! connection observes cancellation within one receive-timeout
//! interval.

use std::time::{Duration, Instant};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::Result;

/// Shutdown coordinator that manages the graceful shutdown process
pub struct ShutdownCoordinator {
    cancel: CancellationToken,
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a coordinator over an engine's run-wide token.
    pub fn new(cancel: CancellationToken, timeout: Duration) -> Self {
        Self { cancel, timeout }
    }

    /// Wait for SIGTERM/SIGINT, then trigger run-wide cancellation.
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
            }
        }

        #[cfg(windows)]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        self.cancel.cancel();
        Ok(())
    }

    /// Wait for the engine's active sessions to drain, up to the
    /// configured timeout.
    pub async fn wait_for_drain(&self, engine: &Engine) -> Result<()> {
        let start_time = Instant::now();
        let mut last_count = engine.active_sessions();
        info!(
            "Waiting for {} active sessions to close (timeout: {:?})",
            last_count, self.timeout
        );

        while last_count > 0 && start_time.elapsed() < self.timeout {
            tokio::time::sleep(Duration::from_millis(100)).await;

            let current_count = engine.active_sessions();
            if current_count != last_count {
                debug!("Active sessions: {} -> {}", last_count, current_count);
                last_count = current_count;
            }
        }

        let final_count = engine.active_sessions();
        let elapsed = start_time.elapsed();
        if final_count == 0 {
            info!("All sessions closed gracefully in {:?}", elapsed);
        } else {
            warn!(
                "Shutdown timeout reached after {:?} with {} sessions still active",
                elapsed, final_count
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::EngineCallbacks;
    use crate::router::CommandRouter;

    #[tokio::test]
    async fn test_drain_returns_immediately_with_no_sessions() {
        let config = Config::default();
        let engine = Engine::new(config.network, CommandRouter::new(), EngineCallbacks::new());
        let coordinator =
            ShutdownCoordinator::new(engine.cancellation_token(), Duration::from_secs(1));

        let start = Instant::now();
        coordinator.wait_for_drain(&engine).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
