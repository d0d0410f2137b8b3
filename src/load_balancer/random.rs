//! Uniform random load balancing strategy.

use rand::Rng;
use std::sync::Arc;
use crate::load_balancer::{eligible, LoadBalancer, backend::Backend};

/// Random selector.
/// Picks uniformly among healthy backends, or among all when none is healthy.
#[derive(Debug, Default)]
pub struct Random;

impl Random {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for Random {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Arc<Backend> {
        assert!(!backends.is_empty(), "backend pool must not be empty");

        let candidates = eligible(backends);
        let index = candidates[rand::thread_rng().gen_range(0..candidates.len())];
        backends[index].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn backends(n: usize) -> Vec<Arc<Backend>> {
        (0..n)
            .map(|i| Arc::new(Backend::parse(&format!("http://127.0.0.1:{}", 9000 + i)).unwrap()))
            .collect()
    }

    #[test]
    fn eventually_selects_every_backend() {
        let backends = backends(4);
        let lb = Random::new();

        let seen: HashSet<String> = (0..1000)
            .map(|_| lb.next_server(&backends).address().to_string())
            .collect();
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn never_selects_unhealthy_when_alternatives_exist() {
        let backends = backends(3);
        backends[0].store_healthy(false);
        backends[2].store_healthy(false);
        let lb = Random::new();

        for _ in 0..200 {
            assert_eq!(lb.next_server(&backends).address(), backends[1].address());
        }
    }
}
