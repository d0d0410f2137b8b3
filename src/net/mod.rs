//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! WebSocket upgrade accepted
//!     → backend dial succeeds
//!     → connection.rs (tunnel registered, state tracked)
//!     → both relay directions stop
//!     → entry removed
//!
//! Tunnel States:
//!     Dialing → Open → Closing → Closed
//! ```
//!
//! # Design Decisions
//! - Every open tunnel is tracked so shutdown can wait for it
//! - Emptiness checks read an atomic counter, never iterate under the lock

pub mod connection;

pub use connection::{ConnectionId, TunnelInfo, TunnelRegistry, TunnelState};
