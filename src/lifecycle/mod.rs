//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → resolve the termination future
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain tunnels → Drained | TimedOut
//!
//! main:
//!     Drained → exit 0, TimedOut → exit 1
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, exit
//! - Shutdown has a deadline; the coordinator reports the outcome instead of exiting

pub mod shutdown;
pub mod signals;

pub use shutdown::{DrainOutcome, Shutdown, ShutdownCoordinator};
