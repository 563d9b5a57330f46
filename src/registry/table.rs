//! Immutable routing snapshot compiled from configuration.

use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use crate::config::schema::{
    CircuitBreakerConfig, LoadBalanceConfig, ModelInstance, RateLimitConfig, RouterConfig,
};
use crate::registry::{LimitScope, ServiceType};

/// Effective settings of one service after defaults are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceEntry {
    pub instances: Vec<Arc<ModelInstance>>,
    pub load_balance: LoadBalanceConfig,
    pub service_limit: Option<RateLimitConfig>,
    pub instance_limit: Option<RateLimitConfig>,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl ServiceEntry {
    pub fn instances_for_model<'a>(&'a self, model: &'a str) -> impl Iterator<Item = &'a Arc<ModelInstance>> + 'a {
        self.instances.iter().filter(move |instance| instance.name == model)
    }

    /// Instance-scope limiter for `instance`: its own override, else the service-wide one.
    pub fn instance_limit_for<'a>(&'a self, instance: &'a ModelInstance) -> Option<&'a RateLimitConfig> {
        instance.rate_limit.as_ref().or(self.instance_limit.as_ref())
    }
}

/// One consistent view of every service. Dispatch loads exactly one per call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RoutingTable {
    pub global_limit: Option<RateLimitConfig>,
    services: BTreeMap<ServiceType, ServiceEntry>,
}

impl RoutingTable {
    pub fn from_config(config: &RouterConfig) -> Self {
        let mut services = BTreeMap::new();
        for (key, service) in &config.services {
            let service_type = match ServiceType::from_str(key) {
                Ok(service_type) => service_type,
                Err(e) => {
                    tracing::warn!(service = %key, error = %e, "Skipping unknown service");
                    continue;
                }
            };
            if services.contains_key(&service_type) {
                tracing::warn!(service = %key, "Skipping duplicate key for an already configured service");
                continue;
            }

            let entry = ServiceEntry {
                instances: service.instances.iter().cloned().map(Arc::new).collect(),
                load_balance: service
                    .load_balance
                    .clone()
                    .unwrap_or_else(|| config.defaults.load_balance.clone()),
                service_limit: service.rate_limit_for(LimitScope::Service).cloned(),
                instance_limit: service.rate_limit_for(LimitScope::Instance).cloned(),
                circuit_breaker: service
                    .circuit_breaker
                    .clone()
                    .unwrap_or_else(|| config.defaults.circuit_breaker.clone()),
            };
            services.insert(service_type, entry);
        }

        Self {
            global_limit: config.global_rate_limit.clone(),
            services,
        }
    }

    pub fn service(&self, service: ServiceType) -> Option<&ServiceEntry> {
        self.services.get(&service)
    }

    pub fn services(&self) -> impl Iterator<Item = (ServiceType, &ServiceEntry)> {
        self.services.iter().map(|(service, entry)| (*service, entry))
    }

    pub fn service_types(&self) -> Vec<ServiceType> {
        self.services.keys().copied().collect()
    }

    pub fn has_instance(&self, service: ServiceType, instance_id: &str) -> bool {
        self.service(service)
            .map(|entry| entry.instances.iter().any(|i| i.instance_id() == instance_id))
            .unwrap_or(false)
    }

    /// Every configured (service, instance_id) pair.
    pub fn live_instance_keys(&self) -> HashSet<(ServiceType, String)> {
        self.services()
            .flat_map(|(service, entry)| {
                entry
                    .instances
                    .iter()
                    .map(move |instance| (service, instance.instance_id()))
            })
            .collect()
    }

    pub fn live_instance_ids(&self) -> HashSet<String> {
        self.live_instance_keys().into_iter().map(|(_, id)| id).collect()
    }
}
