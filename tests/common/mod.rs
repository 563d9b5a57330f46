//! Shared builders for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;

use model_router::config::schema::{
    CircuitBreakerConfig, LoadBalanceConfig, ModelInstance, RateLimitConfig, RouterConfig,
    ServiceConfig,
};
use model_router::health::HealthStateStore;
use model_router::load_balancer::Strategy;
use model_router::observability::events::EventSink;
use model_router::registry::{DispatchError, LimitScope, ModelServiceRegistry, ServiceType};
use model_router::resilience::{CircuitState, ManualClock};

/// Event captured by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    RateLimit { scope: LimitScope, allowed: bool },
    Transition { instance: String, from: CircuitState, to: CircuitState },
    Selection { instance: String, strategy: Strategy },
    Rejection { kind: &'static str },
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn transitions(&self) -> Vec<(CircuitState, CircuitState)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Transition { from, to, .. } => Some((from, to)),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn on_rate_limit(&self, scope: LimitScope, _service: ServiceType, allowed: bool) {
        self.events.lock().push(Event::RateLimit { scope, allowed });
    }

    fn on_circuit_transition(
        &self,
        _service: ServiceType,
        instance_id: &str,
        from: CircuitState,
        to: CircuitState,
    ) {
        self.events.lock().push(Event::Transition {
            instance: instance_id.to_string(),
            from,
            to,
        });
    }

    fn on_selection(&self, _service: ServiceType, strategy: Strategy, instance_id: &str) {
        self.events.lock().push(Event::Selection {
            instance: instance_id.to_string(),
            strategy,
        });
    }

    fn on_rejection(&self, _service: ServiceType, error: &DispatchError) {
        self.events.lock().push(Event::Rejection { kind: error.kind() });
    }
}

/// Registry wired to a manual clock, scripted health, and a recording sink.
pub struct Harness {
    pub registry: Arc<ModelServiceRegistry>,
    pub health: Arc<HealthStateStore>,
    pub clock: Arc<ManualClock>,
    pub events: Arc<RecordingSink>,
}

impl Harness {
    pub fn new(config: &RouterConfig) -> Self {
        let health = Arc::new(HealthStateStore::new());
        let clock = Arc::new(ManualClock::new());
        let events = Arc::new(RecordingSink::default());
        let registry = Arc::new(ModelServiceRegistry::with_parts(
            config,
            health.clone(),
            clock.clone(),
            events.clone(),
        ));
        Self {
            registry,
            health,
            clock,
            events,
        }
    }

    pub fn mark_unhealthy(&self, service: ServiceType, instance: &ModelInstance) {
        self.health.set_healthy(service, instance, false);
    }

    /// Select `n` times, returning the chosen base URLs (or error kinds).
    pub fn pick_urls(&self, service: ServiceType, model: &str, n: usize) -> Vec<String> {
        (0..n)
            .map(|_| match self.registry.select_instance(service, model, None) {
                Ok(instance) => instance.base_url.clone(),
                Err(e) => e.kind().to_string(),
            })
            .collect()
    }
}

pub fn instance(name: &str, base_url: &str, weight: u32) -> ModelInstance {
    ModelInstance::new(name, base_url, "/v1").with_weight(weight)
}

pub fn service(instances: Vec<ModelInstance>) -> ServiceConfig {
    ServiceConfig {
        instances,
        ..Default::default()
    }
}

pub fn with_strategy(mut service: ServiceConfig, strategy: Strategy) -> ServiceConfig {
    service.load_balance = Some(LoadBalanceConfig {
        strategy,
        ..Default::default()
    });
    service
}

pub fn with_limit(mut service: ServiceConfig, limit: RateLimitConfig) -> ServiceConfig {
    service.rate_limits.push(limit);
    service
}

pub fn with_breaker(mut service: ServiceConfig, failure_threshold: u32, timeout_ms: u64) -> ServiceConfig {
    service.circuit_breaker = Some(CircuitBreakerConfig {
        failure_threshold,
        timeout_ms,
        ..Default::default()
    });
    service
}

pub fn config(services: Vec<(&str, ServiceConfig)>) -> RouterConfig {
    let mut config = RouterConfig::default();
    for (key, service) in services {
        config.services.insert(key.to_string(), service);
    }
    config
}
