//! Backend pool management.
//!
//! # Responsibilities
//! - Own the ordered, non-empty list of backends
//! - Apply the configured load balancing algorithm to select a target
//! - Apply health updates coming from the health checker

use std::sync::Arc;
use crate::load_balancer::{
    Algorithm,
    LoadBalancer,
    backend::{Backend, BackendError},
};

/// Error type for pool construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("backend pool requires at least one backend")]
    Empty,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// The set of configured backends plus their live health.
#[derive(Debug)]
pub struct BackendPool {
    backends: Vec<Arc<Backend>>,
    balancer: Box<dyn LoadBalancer>,
    algorithm: Algorithm,
}

impl BackendPool {
    /// Build a pool from configured addresses.
    pub fn new<S: AsRef<str>>(addresses: &[S], algorithm: Algorithm) -> Result<Self, PoolError> {
        let backends = addresses
            .iter()
            .map(|raw| Backend::parse(raw.as_ref()).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        Self::with_balancer(backends, algorithm, algorithm.build())
    }

    /// Build a pool with an explicit selection strategy.
    pub fn with_balancer(
        backends: Vec<Arc<Backend>>,
        algorithm: Algorithm,
        balancer: Box<dyn LoadBalancer>,
    ) -> Result<Self, PoolError> {
        if backends.is_empty() {
            return Err(PoolError::Empty);
        }

        Ok(Self {
            backends,
            balancer,
            algorithm,
        })
    }

    /// Select the next target.
    pub fn select(&self) -> Arc<Backend> {
        let backend = self.balancer.next_server(&self.backends);
        tracing::trace!(backend = %backend, healthy = backend.is_healthy(), "Backend selected");
        backend
    }

    /// Record the health of a backend. Returns true if the flag changed.
    pub fn set_healthy(&self, backend: &Backend, healthy: bool) -> bool {
        let previous = backend.store_healthy(healthy);
        if previous != healthy {
            if healthy {
                tracing::info!(backend = %backend, "Backend marked healthy");
            } else {
                tracing::warn!(backend = %backend, "Backend marked unhealthy");
            }
        }
        previous != healthy
    }

    /// Number of backends currently considered healthy.
    pub fn healthy_count(&self) -> usize {
        self.backends.iter().filter(|b| b.is_healthy()).count()
    }

    /// Return a list of all backends (for health checking).
    pub fn all_backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// The algorithm this pool was built with.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_pool() {
        let empty: [&str; 0] = [];
        assert_eq!(BackendPool::new(&empty, Algorithm::RoundRobin).unwrap_err(), PoolError::Empty);
    }

    #[test]
    fn rejects_invalid_address() {
        let err = BackendPool::new(&["http://ok:1", "::nope"], Algorithm::Random).unwrap_err();
        assert!(matches!(err, PoolError::Backend(_)));
    }

    #[test]
    fn round_robin_over_configured_order() {
        let pool = BackendPool::new(&["http://a:9001", "http://a:9002"], Algorithm::RoundRobin).unwrap();

        let picks: Vec<String> = (0..3).map(|_| pool.select().authority().to_string()).collect();
        assert_eq!(picks, vec!["a:9001", "a:9002", "a:9001"]);
    }

    #[test]
    fn health_updates_are_visible() {
        let pool = BackendPool::new(&["http://a:9001", "http://a:9002"], Algorithm::RoundRobin).unwrap();
        assert_eq!(pool.healthy_count(), 2);

        let first = pool.all_backends()[0].clone();
        assert!(pool.set_healthy(&first, false));
        assert!(!pool.set_healthy(&first, false));
        assert_eq!(pool.healthy_count(), 1);

        for _ in 0..4 {
            assert_eq!(pool.select().authority().as_str(), "a:9002");
        }

        assert!(pool.set_healthy(&first, true));
        assert_eq!(pool.healthy_count(), 2);
    }
}
