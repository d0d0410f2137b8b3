//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request or upgrade:
//!     → auth.rs (token header checked against the allow-list)
//!     → 401 on failure, otherwise pass to forwarding
//! ```
//!
//! # Design Decisions
//! - Fail closed: a missing or unknown token is rejected
//! - Tokens compared by exact string match

pub mod auth;

pub use auth::Authenticator;
