//! Shutdown coordination for the proxy.

use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::config::ShutdownConfig;
use crate::net::connection::TunnelRegistry;

/// Broadcast handle for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to.
#[derive(Debug, Clone)]
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    /// Create a new shutdown handle.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of draining in-flight requests and open tunnels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The listener finished its requests and every tunnel closed before the deadline.
    Drained,
    /// The deadline passed with requests in flight or tunnels still open.
    /// `remaining` counts the open tunnels.
    TimedOut { remaining: usize },
}

impl DrainOutcome {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            DrainOutcome::Drained => ExitCode::SUCCESS,
            DrainOutcome::TimedOut { .. } => ExitCode::FAILURE,
        }
    }
}

/// Stops new work on a termination signal, then waits for tunnels to drain.
pub struct ShutdownCoordinator {
    shutdown: Shutdown,
    tunnels: Arc<TunnelRegistry>,
    drain_timeout: Duration,
    poll_interval: Duration,
}

impl ShutdownCoordinator {
    pub fn new(shutdown: Shutdown, tunnels: Arc<TunnelRegistry>, config: &ShutdownConfig) -> Self {
        Self::with_timing(shutdown, tunnels, config.drain_timeout(), config.poll_interval())
    }

    pub fn with_timing(
        shutdown: Shutdown,
        tunnels: Arc<TunnelRegistry>,
        drain_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            shutdown,
            tunnels,
            drain_timeout,
            poll_interval,
        }
    }

    /// Wait for `signal`, stop accepting new work and drain.
    ///
    /// `server` resolves once the listener has stopped and its in-flight
    /// requests have completed.
    pub async fn run<F, S>(self, signal: F, server: S) -> DrainOutcome
    where
        F: Future<Output = ()>,
        S: Future<Output = ()>,
    {
        signal.await;
        self.begin();
        self.drain(server).await
    }

    /// Broadcast the shutdown signal to the listener and background tasks.
    pub fn begin(&self) {
        tracing::info!(
            open_tunnels = self.tunnels.len(),
            drain_timeout = ?self.drain_timeout,
            "Shutting down gracefully"
        );
        self.shutdown.trigger();
    }

    /// Wait for `server` to finish, then poll the tunnel registry until it
    /// is empty. Both share one deadline.
    pub async fn drain<S>(&self, server: S) -> DrainOutcome
    where
        S: Future<Output = ()>,
    {
        let deadline = Instant::now() + self.drain_timeout;

        if time::timeout_at(deadline, server).await.is_err() {
            let remaining = self.tunnels.len();
            tracing::warn!(remaining, "Drain deadline reached with HTTP requests in flight");
            return DrainOutcome::TimedOut { remaining };
        }
        tracing::info!("In-flight HTTP requests completed");

        loop {
            if self.tunnels.is_empty() {
                tracing::info!("All WebSocket connections closed");
                return DrainOutcome::Drained;
            }
            if Instant::now() >= deadline {
                let remaining = self.tunnels.len();
                tracing::warn!(remaining, "Drain deadline reached, forcing shutdown");
                return DrainOutcome::TimedOut { remaining };
            }
            time::sleep(self.poll_interval).await;
        }
    }
}
