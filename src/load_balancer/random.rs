//! Weighted random load balancing strategy.

use std::sync::Arc;

use rand::Rng;

use crate::config::schema::ModelInstance;
use crate::load_balancer::{ensure_candidates, pick_weighted, total_weight, LoadBalancer, Strategy};
use crate::registry::DispatchError;

/// Draws a uniform point in `[0, total_weight)` and returns its owner.
/// Holds no shared state beyond the thread-local RNG.
#[derive(Debug, Default)]
pub struct WeightedRandom;

impl WeightedRandom {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for WeightedRandom {
    fn select(
        &self,
        candidates: &[Arc<ModelInstance>],
        _client_key: Option<&str>,
    ) -> Result<Arc<ModelInstance>, DispatchError> {
        ensure_candidates(candidates)?;

        let mut rng = rand::thread_rng();
        let total = total_weight(candidates);
        if total == 0 {
            return Ok(candidates[rng.gen_range(0..candidates.len())].clone());
        }

        Ok(pick_weighted(candidates, rng.gen_range(0..total)).clone())
    }

    fn strategy(&self) -> Strategy {
        Strategy::Random
    }
}
