//! Least Connections load balancing strategy.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::schema::ModelInstance;
use crate::load_balancer::{ensure_candidates, LoadBalancer, Strategy};
use crate::registry::DispatchError;

/// Least connections selector.
/// Selects the candidate with the fewest active calls relative to its weight.
/// With equal weights this is plain least-connections; ties go to the raw
/// count and then to list order.
#[derive(Debug, Default)]
pub struct LeastConnections {
    active: DashMap<String, AtomicUsize>,
}

impl LeastConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current active call count for an instance.
    pub fn active_calls(&self, instance_id: &str) -> usize {
        self.active
            .get(instance_id)
            .map(|count| count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl LoadBalancer for LeastConnections {
    fn select(
        &self,
        candidates: &[Arc<ModelInstance>],
        _client_key: Option<&str>,
    ) -> Result<Arc<ModelInstance>, DispatchError> {
        ensure_candidates(candidates)?;

        let mut best: Option<(&Arc<ModelInstance>, f64, usize)> = None;
        for candidate in candidates {
            let connections = self.active_calls(&candidate.instance_id());
            let weighted = if candidate.weight > 0 {
                connections as f64 / f64::from(candidate.weight)
            } else {
                connections as f64
            };

            let better = match best {
                None => true,
                Some((_, best_weighted, best_connections)) => {
                    weighted < best_weighted
                        || (weighted == best_weighted && connections < best_connections)
                }
            };
            if better {
                best = Some((candidate, weighted, connections));
            }
        }

        // `ensure_candidates` guarantees at least one iteration.
        best.map(|(instance, _, _)| instance.clone())
            .ok_or_else(|| DispatchError::InvalidArgument("no candidate selected".to_string()))
    }

    fn on_call_start(&self, instance_id: &str) {
        let current = self
            .active
            .entry(instance_id.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        tracing::trace!(instance = %instance_id, active = current, "Call started");
    }

    fn on_call_end(&self, instance_id: &str) {
        if let Some(count) = self.active.get(instance_id) {
            // Saturating: a late completion after a sweep must not wrap.
            let _ = count.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| c.checked_sub(1));
        }
    }

    fn retain_instances(&self, live: &HashSet<String>) -> usize {
        let before = self.active.len();
        self.active.retain(|id, _| live.contains(id));
        before - self.active.len()
    }

    fn strategy(&self) -> Strategy {
        Strategy::LeastConnections
    }
}
