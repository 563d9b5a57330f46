//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher filtered candidates (healthy + breaker admitted)
//!     → manager.rs (balancer for this service, rebuilt on strategy change)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (weighted rotation)
//!         - random.rs (weighted random)
//!         - least_conn.rs (fewest active calls per weight)
//!         - ip_hash.rs (client key affinity)
//!     → Return exactly one instance or InvalidArgument
//! ```
//!
//! # Design Decisions
//! - Balancers never re-check availability; candidates arrive pre-filtered
//! - One balancer per service type, each owning only its algorithm state
//! - Strategy is a closed enum resolved by a factory, not a type hierarchy

pub mod ip_hash;
pub mod least_conn;
pub mod manager;
pub mod random;
pub mod round_robin;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::schema::{LoadBalanceConfig, ModelInstance};
use crate::registry::DispatchError;

/// Selects one instance from a pre-filtered candidate list.
pub trait LoadBalancer: Send + Sync + fmt::Debug {
    /// Pick exactly one candidate. Fails with `InvalidArgument` when empty.
    fn select(
        &self,
        candidates: &[Arc<ModelInstance>],
        client_key: Option<&str>,
    ) -> Result<Arc<ModelInstance>, DispatchError>;

    /// Called once a selected instance is handed to the caller.
    fn on_call_start(&self, _instance_id: &str) {}

    /// Called when the caller reports the call finished (either outcome).
    fn on_call_end(&self, _instance_id: &str) {}

    /// Drop per-instance state for instances not in `live`. Returns entries removed.
    fn retain_instances(&self, _live: &HashSet<String>) -> usize {
        0
    }

    fn strategy(&self) -> Strategy;
}

/// Available load balancing strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    #[default]
    Random,
    RoundRobin,
    LeastConnections,
    IpHash,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::Random => "random",
            Strategy::RoundRobin => "round-robin",
            Strategy::LeastConnections => "least-connections",
            Strategy::IpHash => "ip-hash",
        };
        f.write_str(name)
    }
}

/// Build a balancer for the given configuration.
pub fn build(config: &LoadBalanceConfig) -> Arc<dyn LoadBalancer> {
    match config.strategy {
        Strategy::Random => Arc::new(random::WeightedRandom::new()),
        Strategy::RoundRobin => Arc::new(round_robin::RoundRobin::new()),
        Strategy::LeastConnections => Arc::new(least_conn::LeastConnections::new()),
        Strategy::IpHash => Arc::new(ip_hash::IpHash::new(config.hash_algorithm)),
    }
}

pub(crate) fn ensure_candidates(candidates: &[Arc<ModelInstance>]) -> Result<(), DispatchError> {
    if candidates.is_empty() {
        return Err(DispatchError::InvalidArgument(
            "candidate instance list is empty".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn total_weight(candidates: &[Arc<ModelInstance>]) -> u64 {
    candidates.iter().map(|c| u64::from(c.weight)).sum()
}

/// Walk cumulative weights and return the candidate owning `point`.
///
/// `point` must be below [`total_weight`]; out-of-range points land on the last candidate.
pub(crate) fn pick_weighted(candidates: &[Arc<ModelInstance>], point: u64) -> &Arc<ModelInstance> {
    let mut cumulative = 0u64;
    for candidate in candidates {
        cumulative += u64::from(candidate.weight);
        if point < cumulative {
            return candidate;
        }
    }
    &candidates[candidates.len() - 1]
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::config::schema::ModelInstance;

    pub fn instance(name: &str, weight: u32) -> Arc<ModelInstance> {
        Arc::new(ModelInstance::new(name, format!("http://{name}.local"), "/v1").with_weight(weight))
    }
}
