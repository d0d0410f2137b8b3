//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each backend (method + path, per-probe timeout)
//!     → Expected status within timeout = healthy, anything else = unhealthy
//!     → BackendPool::set_healthy
//! ```
//!
//! # Design Decisions
//! - A single probe decides the state; no hysteresis
//! - Probes run concurrently, one per backend
//! - Failures are logged and never stop the loop

pub mod active;

pub use active::{HealthMonitor, ProbeError, ProbeSettings};
