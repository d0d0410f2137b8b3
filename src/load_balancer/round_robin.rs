//! Round-robin load balancing strategy.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use crate::load_balancer::{LoadBalancer, backend::Backend};

/// Round-robin selector.
/// Stores a cursor in `[0, len)` pointing at the next backend to try.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the rotation at a given index.
    pub fn starting_at(cursor: usize) -> Self {
        Self {
            cursor: AtomicUsize::new(cursor),
        }
    }

    /// Current cursor value.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }
}

impl LoadBalancer for RoundRobin {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Arc<Backend> {
        let len = backends.len();
        assert!(len > 0, "backend pool must not be empty");

        // Skip unhealthy backends; if every backend is down, fall back to the
        // one under the cursor so traffic still flows.
        let mut chosen = 0;
        let _ = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cursor| {
                let start = cursor % len;
                chosen = (0..len)
                    .map(|offset| (start + offset) % len)
                    .find(|&index| backends[index].is_healthy())
                    .unwrap_or(start);
                Some((chosen + 1) % len)
            });

        backends[chosen].clone()
    }
}
