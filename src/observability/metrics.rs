//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Count requests and bytes on the request path (atomics only)
//! - Drain windowed counters once per interval into a rate report
//! - Mirror counters to the `metrics` facade for Prometheus scraping
//!
//! # Metrics
//! - `proxy_requests_total` (counter): authorized requests and tunnels
//! - `proxy_bytes_sent_total` (counter): bytes written to clients
//! - `proxy_bytes_received_total` (counter): bytes forwarded to backends
//! - `proxy_backend_health` (gauge): 1=healthy, 0=unhealthy
//! - `proxy_active_tunnels` (gauge): open WebSocket tunnels
//!
//! # Design Decisions
//! - Each counter is reset independently; a report may pair values from
//!   adjacent windows under heavy concurrency
//! - Reset time kept as nanoseconds since creation so it is atomic too

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time;

use crate::load_balancer::pool::BackendPool;
use crate::net::connection::TunnelRegistry;

/// Traffic counters shared by every request handler.
#[derive(Debug)]
pub struct Metrics {
    request_count: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    total_bytes_sent: AtomicU64,
    total_bytes_received: AtomicU64,
    /// Reference point for `last_reset_nanos`.
    epoch: Instant,
    last_reset_nanos: AtomicU64,
}

/// Windowed counters drained by [`Metrics::snapshot_and_reset`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub requests: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub elapsed: Duration,
}

impl Snapshot {
    fn per_second(&self, value: u64) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            value as f64 / secs
        } else {
            0.0
        }
    }

    pub fn requests_per_sec(&self) -> f64 {
        self.per_second(self.requests)
    }

    pub fn bytes_sent_per_sec(&self) -> f64 {
        self.per_second(self.bytes_sent)
    }

    pub fn bytes_received_per_sec(&self) -> f64 {
        self.per_second(self.bytes_received)
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            request_count: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            total_bytes_sent: AtomicU64::new(0),
            total_bytes_received: AtomicU64::new(0),
            epoch: Instant::now(),
            last_reset_nanos: AtomicU64::new(0),
        }
    }

    pub fn increment_requests(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("proxy_requests_total").increment(1);
    }

    /// Bytes written to a client. Feeds both the window and the lifetime total.
    pub fn add_bytes_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        self.total_bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        ::metrics::counter!("proxy_bytes_sent_total").increment(bytes);
    }

    /// Bytes forwarded to a backend. Feeds both the window and the lifetime total.
    pub fn add_bytes_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
        self.total_bytes_received.fetch_add(bytes, Ordering::Relaxed);
        ::metrics::counter!("proxy_bytes_received_total").increment(bytes);
    }

    /// Read and zero the windowed counters, returning the time since the previous reset.
    pub fn snapshot_and_reset(&self) -> Snapshot {
        let now = self.epoch.elapsed().as_nanos() as u64;
        let previous = self.last_reset_nanos.swap(now, Ordering::AcqRel);

        Snapshot {
            requests: self.request_count.swap(0, Ordering::AcqRel),
            bytes_sent: self.bytes_sent.swap(0, Ordering::AcqRel),
            bytes_received: self.bytes_received.swap(0, Ordering::AcqRel),
            elapsed: Duration::from_nanos(now.saturating_sub(previous)),
        }
    }

    /// Lifetime `(sent, received)` byte totals.
    pub fn total_traffic(&self) -> (u64, u64) {
        (
            self.total_bytes_sent.load(Ordering::Acquire),
            self.total_bytes_received.load(Ordering::Acquire),
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_prometheus(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus endpoint listening");
    Ok(())
}

pub fn record_backend_health(backend: &str, healthy: bool) {
    ::metrics::gauge!("proxy_backend_health", "backend" => backend.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

/// Periodic traffic report.
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    pool: Arc<BackendPool>,
    tunnels: Arc<TunnelRegistry>,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(
        metrics: Arc<Metrics>,
        pool: Arc<BackendPool>,
        tunnels: Arc<TunnelRegistry>,
        interval: Duration,
    ) -> Self {
        Self {
            metrics,
            pool,
            tunnels,
            interval,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        // The first window starts when the counters are created.
        let mut ticker = time::interval_at(time::Instant::now() + self.interval, self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.report(),
                _ = shutdown.recv() => {
                    tracing::debug!("Metrics reporter received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    fn report(&self) {
        let snapshot = self.metrics.snapshot_and_reset();
        let (total_sent, total_received) = self.metrics.total_traffic();
        let active_tunnels = self.tunnels.len();

        ::metrics::gauge!("proxy_active_tunnels").set(active_tunnels as f64);

        tracing::info!(
            requests_per_sec = %format!("{:.2}", snapshot.requests_per_sec()),
            bytes_sent_per_sec = snapshot.bytes_sent_per_sec() as u64,
            bytes_received_per_sec = snapshot.bytes_received_per_sec() as u64,
            total_bytes_sent = total_sent,
            total_bytes_received = total_received,
            active_tunnels,
            healthy_backends = self.pool.healthy_count(),
            "Traffic report"
        );
    }
}
