//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → upgrade?  yes → websocket.rs (authorize, select, upgrade, tunnel)
//!                 no  → authorize → forward.rs (select, rewrite, send)
//!     → response.rs (strip hop-by-hop, meter bytes)
//!     → Send to client
//! ```

pub mod forward;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use server::{AppState, BuildError, HttpServer};
