//! Weighted round-robin load balancing strategy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::schema::ModelInstance;
use crate::load_balancer::{ensure_candidates, pick_weighted, total_weight, LoadBalancer, Strategy};
use crate::registry::DispatchError;

/// Round-robin selector.
/// Stores an internal counter and indexes the cumulative-weight sequence with
/// `counter % total_weight`, so an instance of weight `w` is picked `w` times per cycle.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicU64,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn select(
        &self,
        candidates: &[Arc<ModelInstance>],
        _client_key: Option<&str>,
    ) -> Result<Arc<ModelInstance>, DispatchError> {
        ensure_candidates(candidates)?;

        let position = self.counter.fetch_add(1, Ordering::Relaxed);
        let total = total_weight(candidates);
        if total == 0 {
            let index = (position % candidates.len() as u64) as usize;
            return Ok(candidates[index].clone());
        }

        Ok(pick_weighted(candidates, position % total).clone())
    }

    fn strategy(&self) -> Strategy {
        Strategy::RoundRobin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_support::instance;

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let backends = vec![instance("a", 1), instance("b", 1)];

        let s1 = lb.select(&backends, None).unwrap();
        assert_eq!(s1.name, "a");

        let s2 = lb.select(&backends, None).unwrap();
        assert_eq!(s2.name, "b");

        let s3 = lb.select(&backends, None).unwrap();
        assert_eq!(s3.name, "a");
    }

    #[test]
    fn test_weighted_cycle_is_exact() {
        let lb = RoundRobin::new();
        let backends = vec![instance("high", 5), instance("low", 1)];

        let high = (0..600)
            .filter(|_| lb.select(&backends, None).unwrap().name == "high")
            .count();
        assert_eq!(high, 500);
    }

    #[test]
    fn test_concurrent_selection_keeps_proportions() {
        let lb = Arc::new(RoundRobin::new());
        let backends = Arc::new(vec![instance("a", 3), instance("b", 1)]);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lb = lb.clone();
                let backends = backends.clone();
                std::thread::spawn(move || {
                    (0..1000)
                        .filter(|_| lb.select(&backends, None).unwrap().name == "a")
                        .count()
                })
            })
            .collect();

        let a: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(a, 3000);
    }
}
