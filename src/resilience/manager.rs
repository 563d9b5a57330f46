//! Circuit breaker registry keyed by (service, instance).

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::schema::CircuitBreakerConfig;
use crate::observability::events::EventSink;
use crate::registry::ServiceType;
use crate::resilience::circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
use crate::resilience::clock::Clock;

pub type BreakerKey = (ServiceType, String);

/// Owns every breaker. Each entry is independently locked; there is no
/// registry-wide lock on the admission path.
#[derive(Debug)]
pub struct CircuitBreakerManager {
    breakers: DashMap<BreakerKey, Arc<CircuitBreaker>>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl CircuitBreakerManager {
    pub fn new(clock: Arc<dyn Clock>, events: Arc<dyn EventSink>) -> Self {
        Self {
            breakers: DashMap::new(),
            clock,
            events,
        }
    }

    /// Breaker for the pair, created lazily. An existing breaker whose
    /// thresholds differ from `config` is reconfigured in place.
    pub fn get_or_create(
        &self,
        service: ServiceType,
        instance_id: &str,
        config: &CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        let key = (service, instance_id.to_string());
        if let Some(existing) = self.breakers.get(&key) {
            let breaker = existing.clone();
            drop(existing);
            breaker.reconfigure(config.clone());
            return breaker;
        }

        self.breakers
            .entry(key)
            .or_insert_with(|| {
                tracing::debug!(service = %service, instance = %instance_id, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(
                    service,
                    instance_id,
                    config.clone(),
                    self.clock.clone(),
                    self.events.clone(),
                ))
            })
            .clone()
    }

    pub fn get(&self, service: ServiceType, instance_id: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .get(&(service, instance_id.to_string()))
            .map(|entry| entry.clone())
    }

    pub fn state(&self, service: ServiceType, instance_id: &str) -> Option<CircuitState> {
        self.get(service, instance_id).map(|cb| cb.state())
    }

    /// Drop a breaker entirely; the next access starts from Closed.
    pub fn reset(&self, service: ServiceType, instance_id: &str) -> bool {
        let removed = self.breakers.remove(&(service, instance_id.to_string())).is_some();
        if removed {
            tracing::info!(service = %service, instance = %instance_id, "Circuit breaker reset");
        }
        removed
    }

    /// Apply new thresholds to every existing breaker of `service`.
    pub fn reconfigure_service(&self, service: ServiceType, config: &CircuitBreakerConfig) {
        for entry in self.breakers.iter().filter(|e| e.key().0 == service) {
            entry.value().reconfigure(config.clone());
        }
    }

    pub fn list(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<BreakerSnapshot> =
            self.breakers.iter().map(|entry| entry.value().snapshot()).collect();
        snapshots.sort_by(|a, b| {
            (a.service.as_str(), &a.instance_id).cmp(&(b.service.as_str(), &b.instance_id))
        });
        snapshots
    }

    /// Remove breakers whose key is not in `live`. Returns entries removed.
    pub fn retain(&self, live: &HashSet<BreakerKey>) -> usize {
        let before = self.breakers.len();
        self.breakers.retain(|key, _| live.contains(key));
        before - self.breakers.len()
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
