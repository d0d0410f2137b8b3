//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Request or tunnel needs a target
//!     → pool.rs (BackendPool::select)
//!     → Apply the algorithm resolved at startup:
//!         - round_robin.rs (rotate through backends)
//!         - random.rs (uniform pick)
//!     → backend.rs (target address, health flag)
//! ```
//!
//! # Design Decisions
//! - Algorithm name resolved once at startup into a strategy object
//! - Pool is never empty; selection always yields a backend
//! - Unhealthy backends are skipped while at least one healthy backend exists

pub mod backend;
pub mod pool;
pub mod random;
pub mod round_robin;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::load_balancer::backend::Backend;
use crate::load_balancer::random::Random;
use crate::load_balancer::round_robin::RoundRobin;

/// A backend selection strategy.
pub trait LoadBalancer: Send + Sync + fmt::Debug {
    /// Pick the next backend. `backends` is never empty.
    fn next_server(&self, backends: &[Arc<Backend>]) -> Arc<Backend>;
}

/// Configured load balancing algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    #[default]
    RoundRobin,
    Random,
}

impl Algorithm {
    /// Build the selection strategy for this algorithm.
    pub fn build(self) -> Box<dyn LoadBalancer> {
        match self {
            Algorithm::RoundRobin => Box::new(RoundRobin::new()),
            Algorithm::Random => Box::new(Random::new()),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::RoundRobin => f.write_str("roundrobin"),
            Algorithm::Random => f.write_str("random"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported load balancing algorithm `{0}` (expected roundrobin or random)")]
pub struct UnknownAlgorithm(pub String);

impl FromStr for Algorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "roundrobin" => Ok(Algorithm::RoundRobin),
            "random" => Ok(Algorithm::Random),
            _ => Err(UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Indices of healthy backends, or every index when none is healthy.
pub(crate) fn eligible(backends: &[Arc<Backend>]) -> Vec<usize> {
    let healthy: Vec<usize> = backends
        .iter()
        .enumerate()
        .filter(|(_, b)| b.is_healthy())
        .map(|(i, _)| i)
        .collect();
    if healthy.is_empty() {
        (0..backends.len()).collect()
    } else {
        healthy
    }
}
