//! Fire-and-forget notifications from the dispatch path.

use std::fmt;

use crate::load_balancer::Strategy;
use crate::observability::metrics;
use crate::registry::{DispatchError, LimitScope, ServiceType};
use crate::resilience::circuit_breaker::CircuitState;

/// Receiver of dispatch events.
///
/// Implementations must return quickly and must not fail; the dispatch path
/// never waits on or inspects the result of a sink call.
pub trait EventSink: Send + Sync + fmt::Debug {
    fn on_rate_limit(&self, scope: LimitScope, service: ServiceType, allowed: bool);

    fn on_circuit_transition(
        &self,
        service: ServiceType,
        instance_id: &str,
        from: CircuitState,
        to: CircuitState,
    );

    fn on_selection(&self, service: ServiceType, strategy: Strategy, instance_id: &str);

    fn on_rejection(&self, service: ServiceType, error: &DispatchError);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn on_rate_limit(&self, _: LimitScope, _: ServiceType, _: bool) {}

    fn on_circuit_transition(&self, _: ServiceType, _: &str, _: CircuitState, _: CircuitState) {}

    fn on_selection(&self, _: ServiceType, _: Strategy, _: &str) {}

    fn on_rejection(&self, _: ServiceType, _: &DispatchError) {}
}

/// Forwards events to the `metrics` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsSink;

impl EventSink for MetricsSink {
    fn on_rate_limit(&self, scope: LimitScope, service: ServiceType, allowed: bool) {
        metrics::record_rate_limit(scope, service, allowed);
    }

    fn on_circuit_transition(
        &self,
        service: ServiceType,
        instance_id: &str,
        from: CircuitState,
        to: CircuitState,
    ) {
        metrics::record_circuit_transition(service, instance_id, from, to);
    }

    fn on_selection(&self, service: ServiceType, strategy: Strategy, instance_id: &str) {
        metrics::record_selection(service, strategy, instance_id);
    }

    fn on_rejection(&self, service: ServiceType, error: &DispatchError) {
        metrics::record_rejection(service, error.kind());
    }
}
