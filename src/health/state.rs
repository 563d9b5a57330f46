//! In-memory instance health state.
//!
//! # States
//! - Healthy: instance receives traffic (also the state of unknown instances)
//! - Unhealthy: instance excluded from dispatch
//!
//! # Design Decisions
//! - Keyed by `service:name@base_url`, matching breaker and limiter keys
//! - State changes logged for observability; repeated reports are silent

use dashmap::DashMap;

use crate::config::schema::ModelInstance;
use crate::health::HealthOracle;
use crate::registry::ServiceType;

#[derive(Debug, Default)]
pub struct HealthStateStore {
    states: DashMap<String, bool>,
}

impl HealthStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(service: ServiceType, instance: &ModelInstance) -> String {
        format!("{}:{}", service, instance.instance_id())
    }

    /// Record a probe result. Returns true if the state changed.
    pub fn set_healthy(&self, service: ServiceType, instance: &ModelInstance, healthy: bool) -> bool {
        let key = Self::key(service, instance);
        let previous = self.states.insert(key, healthy);
        let changed = previous.unwrap_or(true) != healthy;
        if changed {
            if healthy {
                tracing::info!(service = %service, instance = %instance.instance_id(), "Instance marked healthy");
            } else {
                tracing::warn!(service = %service, instance = %instance.instance_id(), "Instance marked unhealthy");
            }
        }
        changed
    }

    /// Forget an instance; it reverts to healthy.
    pub fn clear(&self, service: ServiceType, instance: &ModelInstance) {
        self.states.remove(&Self::key(service, instance));
    }

    pub fn unhealthy_count(&self) -> usize {
        self.states.iter().filter(|entry| !*entry.value()).count()
    }
}

impl HealthOracle for HealthStateStore {
    fn is_instance_healthy(&self, service: ServiceType, instance: &ModelInstance) -> bool {
        self.states
            .get(&Self::key(service, instance))
            .map(|healthy| *healthy)
            .unwrap_or(true)
    }
}
