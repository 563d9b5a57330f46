//! Metrics collection and exposition.
//!
//! # Metrics
//! - `router_rate_limit_decisions_total` (counter): by scope, service, allowed
//! - `router_circuit_transitions_total` (counter): by service, instance, from, to
//! - `router_lb_selections_total` (counter): by service, strategy, instance
//! - `router_dispatch_rejections_total` (counter): by service, error kind
//! - `router_circuit_breakers` (gauge): live breakers after a sweep
//! - `router_rate_limiters` (gauge): live limiters after a sweep

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::load_balancer::Strategy;
use crate::registry::{LimitScope, ServiceType};
use crate::resilience::circuit_breaker::CircuitState;

pub const RATE_LIMIT_DECISIONS: &str = "router_rate_limit_decisions_total";
pub const CIRCUIT_TRANSITIONS: &str = "router_circuit_transitions_total";
pub const LB_SELECTIONS: &str = "router_lb_selections_total";
pub const DISPATCH_REJECTIONS: &str = "router_dispatch_rejections_total";
pub const CIRCUIT_BREAKERS: &str = "router_circuit_breakers";
pub const RATE_LIMITERS: &str = "router_rate_limiters";

/// Install the Prometheus exporter with an HTTP scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Install a recorder without an endpoint; the handle renders the text format.
pub fn init_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

pub fn record_rate_limit(scope: LimitScope, service: ServiceType, allowed: bool) {
    counter!(
        RATE_LIMIT_DECISIONS,
        "scope" => scope.to_string(),
        "service" => service.as_str(),
        "allowed" => if allowed { "true" } else { "false" }
    )
    .increment(1);
}

pub fn record_circuit_transition(
    service: ServiceType,
    instance_id: &str,
    from: CircuitState,
    to: CircuitState,
) {
    counter!(
        CIRCUIT_TRANSITIONS,
        "service" => service.as_str(),
        "instance" => instance_id.to_string(),
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

pub fn record_selection(service: ServiceType, strategy: Strategy, instance_id: &str) {
    counter!(
        LB_SELECTIONS,
        "service" => service.as_str(),
        "strategy" => strategy.to_string(),
        "instance" => instance_id.to_string()
    )
    .increment(1);
}

pub fn record_rejection(service: ServiceType, kind: &'static str) {
    counter!(DISPATCH_REJECTIONS, "service" => service.as_str(), "kind" => kind).increment(1);
}

pub fn record_state_sizes(breakers: usize, limiters: usize) {
    gauge!(CIRCUIT_BREAKERS).set(breakers as f64);
    gauge!(RATE_LIMITERS).set(limiters as f64);
}
