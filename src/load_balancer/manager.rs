//! Per-service balancer ownership.
//!
//! # Responsibilities
//! - Hold one balancer per service type
//! - Rebuild a service's balancer when its strategy configuration changes
//! - Forward orphan pruning to every live balancer

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::schema::LoadBalanceConfig;
use crate::load_balancer::{build, LoadBalancer};
use crate::registry::ServiceType;

#[derive(Debug, Default)]
pub struct LoadBalancerManager {
    balancers: DashMap<ServiceType, (LoadBalanceConfig, Arc<dyn LoadBalancer>)>,
}

impl LoadBalancerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Balancer for `service`, created or replaced when `config` differs from the cached one.
    pub fn get(&self, service: ServiceType, config: &LoadBalanceConfig) -> Arc<dyn LoadBalancer> {
        if let Some(entry) = self.balancers.get(&service) {
            if &entry.0 == config {
                return entry.1.clone();
            }
        }

        let mut entry = self
            .balancers
            .entry(service)
            .or_insert_with(|| (config.clone(), build(config)));
        if &entry.0 != config {
            tracing::info!(
                service = %service,
                from = %entry.0.strategy,
                to = %config.strategy,
                "Load balancing strategy changed, rebuilding balancer"
            );
            *entry = (config.clone(), build(config));
        }
        entry.1.clone()
    }

    /// Balancer currently in use for `service`, if one was ever created.
    pub fn current(&self, service: ServiceType) -> Option<Arc<dyn LoadBalancer>> {
        self.balancers.get(&service).map(|entry| entry.1.clone())
    }

    /// Drop balancers of services no longer configured.
    pub fn retain_services(&self, live: &HashSet<ServiceType>) -> usize {
        let before = self.balancers.len();
        self.balancers.retain(|service, _| live.contains(service));
        before - self.balancers.len()
    }

    /// Prune per-instance state in every balancer. Returns entries removed.
    pub fn retain_instances(&self, live: &HashSet<String>) -> usize {
        self.balancers
            .iter()
            .map(|entry| entry.value().1.retain_instances(live))
            .sum()
    }
}
