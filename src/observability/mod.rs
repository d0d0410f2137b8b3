//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Request path and tunnels produce:
//!     → metrics.rs (atomic traffic counters)
//!     → logging.rs (structured log events)
//!
//! Consumers:
//!     → Periodic traffic report (logged once per interval)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Structured logging via tracing
//! - Metrics are cheap (atomic increments), no locks on the request path
//! - Windowed counters are reset per report, lifetime totals never are

pub mod logging;
pub mod metrics;

pub use metrics::{Metrics, MetricsReporter, Snapshot};
