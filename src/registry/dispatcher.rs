//! Instance selection and call outcome recording.
//!
//! # Admission Order
//! ```text
//! select_instance(service, model, client_key)
//!     1. resolve model instances in the current table      → NotFound
//!     2. keep healthy instances whose breaker admits a call → Unavailable
//!     3. global limiter, then service limiter               → RateLimited(global | service)
//!     4. load balancer picks one candidate
//!     5. instance limiter for the chosen instance           → RateLimited(instance)
//!     6. on_call_start, selection event, return
//! ```
//!
//! Half-open probe permits taken in step 2 are returned for every candidate
//! that does not end up as the call handed to the caller.
//!
//! # Design Decisions
//! - Fail fast: an instance-level denial does not retry another candidate
//! - One routing table snapshot per call; reloads never tear a dispatch
//! - Outcome recording never fails; problems are logged and ignored

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::config::schema::{CircuitBreakerConfig, ModelInstance, RateLimitConfig, RouterConfig};
use crate::health::HealthOracle;
use crate::load_balancer::manager::LoadBalancerManager;
use crate::load_balancer::Strategy;
use crate::observability::events::{EventSink, MetricsSink};
use crate::observability::metrics;
use crate::rate_limit::{LimiterSnapshot, RateLimitContext, RateLimitManager, ScopeKey};
use crate::registry::table::{RoutingTable, ServiceEntry};
use crate::registry::{DispatchError, LimitScope, ServiceType};
use crate::resilience::circuit_breaker::{Admission, BreakerSnapshot, CircuitBreaker, CircuitState};
use crate::resilience::clock::{self, Clock};
use crate::resilience::manager::CircuitBreakerManager;

/// Entries removed by one orphan sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub breakers: usize,
    pub limiters: usize,
    pub balancer_entries: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.breakers + self.limiters + self.balancer_entries
    }
}

/// The dispatch core: picks an instance for each call and tracks outcomes.
///
/// All methods take `&self`; share it behind an `Arc`.
#[derive(Debug)]
pub struct ModelServiceRegistry {
    table: ArcSwap<RoutingTable>,
    health: Arc<dyn HealthOracle>,
    breakers: CircuitBreakerManager,
    limiters: RateLimitManager,
    balancers: LoadBalancerManager,
    events: Arc<dyn EventSink>,
}

impl ModelServiceRegistry {
    /// Registry on the system clock reporting to the metrics facade.
    pub fn new(config: &RouterConfig, health: Arc<dyn HealthOracle>) -> Self {
        Self::with_parts(config, health, clock::system(), Arc::new(MetricsSink))
    }

    pub fn with_parts(
        config: &RouterConfig,
        health: Arc<dyn HealthOracle>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let table = RoutingTable::from_config(config);
        tracing::info!(services = table.service_types().len(), "Model service registry initialized");
        Self {
            table: ArcSwap::from_pointee(table),
            health,
            breakers: CircuitBreakerManager::new(clock.clone(), events.clone()),
            limiters: RateLimitManager::new(clock, events.clone()),
            balancers: LoadBalancerManager::new(),
            events,
        }
    }

    /// Select an instance for a call of weight 1.
    pub fn select_instance(
        &self,
        service: ServiceType,
        model: &str,
        client_key: Option<&str>,
    ) -> Result<Arc<ModelInstance>, DispatchError> {
        self.select_instance_weighted(service, model, client_key, 1)
    }

    /// Select an instance for a call consuming `request_weight` limiter tokens.
    pub fn select_instance_weighted(
        &self,
        service: ServiceType,
        model: &str,
        client_key: Option<&str>,
        request_weight: u64,
    ) -> Result<Arc<ModelInstance>, DispatchError> {
        let table = self.table.load();
        let result = self.admit(&table, service, model, client_key, request_weight);
        if let Err(e) = &result {
            match e {
                DispatchError::RateLimited { .. } => {
                    tracing::debug!(service = %service, model = %model, error = %e, "Dispatch rejected")
                }
                _ => tracing::warn!(service = %service, model = %model, error = %e, "Dispatch rejected"),
            }
            self.events.on_rejection(service, e);
        }
        result
    }

    fn admit(
        &self,
        table: &RoutingTable,
        service: ServiceType,
        model: &str,
        client_key: Option<&str>,
        request_weight: u64,
    ) -> Result<Arc<ModelInstance>, DispatchError> {
        if model.is_empty() {
            return Err(DispatchError::InvalidArgument("model name is empty".to_string()));
        }
        if request_weight == 0 {
            return Err(DispatchError::InvalidArgument(
                "request weight must be at least 1".to_string(),
            ));
        }

        let not_found = || DispatchError::NotFound {
            service,
            model: model.to_string(),
        };
        let entry = table.service(service).ok_or_else(not_found)?;

        let mut matched = 0usize;
        let mut probes: Vec<(String, Arc<CircuitBreaker>)> = Vec::new();
        let candidates: Vec<Arc<ModelInstance>> = entry
            .instances_for_model(model)
            .inspect(|_| matched += 1)
            .filter(|instance| self.health.is_instance_healthy(service, instance))
            .filter(|instance| {
                let instance_id = instance.instance_id();
                let breaker = self
                    .breakers
                    .get_or_create(service, &instance_id, &entry.circuit_breaker);
                match breaker.try_admit() {
                    Admission::Rejected => false,
                    Admission::Allowed => true,
                    Admission::Probe => {
                        probes.push((instance_id, breaker));
                        true
                    }
                }
            })
            .cloned()
            .collect();

        if matched == 0 {
            return Err(not_found());
        }
        if candidates.is_empty() {
            return Err(DispatchError::Unavailable {
                service,
                model: model.to_string(),
            });
        }

        let ctx = RateLimitContext::new(service, model)
            .with_client_key(client_key)
            .with_weight(request_weight);
        let outcome = self.pick(table, entry, &ctx, &candidates);

        // Probe permits only count for the call actually handed out.
        let sent = outcome.as_ref().ok().map(|chosen| chosen.instance_id());
        for (instance_id, breaker) in probes {
            if sent.as_deref() != Some(instance_id.as_str()) {
                breaker.release_probe();
            }
        }
        outcome
    }

    /// Limiter checks and balancer choice over already admitted candidates.
    fn pick(
        &self,
        table: &RoutingTable,
        entry: &ServiceEntry,
        ctx: &RateLimitContext,
        candidates: &[Arc<ModelInstance>],
    ) -> Result<Arc<ModelInstance>, DispatchError> {
        let service = ctx.service;
        self.check_limit(&ScopeKey::Global, table.global_limit.as_ref(), ctx)?;
        self.check_limit(&ScopeKey::Service(service), entry.service_limit.as_ref(), ctx)?;

        let balancer = self.balancers.get(service, &entry.load_balance);
        let chosen = balancer.select(candidates, ctx.client_key.as_deref())?;
        let instance_id = chosen.instance_id();

        self.check_limit(
            &ScopeKey::Instance(service, instance_id.clone()),
            entry.instance_limit_for(&chosen),
            &ctx.for_instance(&chosen),
        )?;

        balancer.on_call_start(&instance_id);
        self.events.on_selection(service, balancer.strategy(), &instance_id);
        tracing::debug!(
            service = %service,
            model = %ctx.model,
            instance = %instance_id,
            strategy = %balancer.strategy(),
            candidates = candidates.len(),
            "Instance selected"
        );
        Ok(chosen)
    }

    fn check_limit(
        &self,
        key: &ScopeKey,
        configured: Option<&RateLimitConfig>,
        ctx: &RateLimitContext,
    ) -> Result<(), DispatchError> {
        if self.limiters.try_acquire(key, configured, ctx) {
            return Ok(());
        }
        Err(DispatchError::RateLimited {
            scope: key.scope(),
            service: ctx.service,
            model: ctx.model.clone(),
            instance_id: ctx.instance_id.clone(),
        })
    }

    /// Report a successful backend call on `instance`.
    pub fn record_call_complete(&self, service: ServiceType, instance: &ModelInstance) {
        self.record_outcome(service, instance, true);
    }

    /// Report a failed backend call on `instance` (including caller-side timeouts).
    pub fn record_call_failure(&self, service: ServiceType, instance: &ModelInstance) {
        self.record_outcome(service, instance, false);
    }

    fn record_outcome(&self, service: ServiceType, instance: &ModelInstance, success: bool) {
        let instance_id = instance.instance_id();
        if let Some(balancer) = self.balancers.current(service) {
            balancer.on_call_end(&instance_id);
        }

        let table = self.table.load();
        let breaker = match table.service(service) {
            Some(entry) => {
                Some(self.breakers.get_or_create(service, &instance_id, &entry.circuit_breaker))
            }
            // Service removed by a reload while the call was in flight.
            None => self.breakers.get(service, &instance_id),
        };

        let Some(breaker) = breaker else {
            tracing::warn!(
                service = %service,
                instance = %instance_id,
                "No circuit breaker for reported call, ignoring outcome"
            );
            return;
        };

        tracing::debug!(service = %service, instance = %instance_id, success, "Call outcome recorded");
        if success {
            breaker.on_success();
        } else {
            breaker.on_failure();
        }
    }

    /// Swap in a new configuration. In-flight dispatches finish on the old table.
    pub fn apply_config(&self, config: &RouterConfig) {
        let table = RoutingTable::from_config(config);
        for (service, entry) in table.services() {
            self.breakers.reconfigure_service(service, &entry.circuit_breaker);
        }
        let live: HashSet<ServiceType> = table.service_types().into_iter().collect();
        self.table.store(Arc::new(table));
        self.balancers.retain_services(&live);
        tracing::info!(services = live.len(), "Routing table reloaded");
    }

    /// Drop breaker, limiter, and balancer state of instances no longer configured.
    pub fn sweep_orphans(&self) -> SweepReport {
        let table = self.table.load();
        let live_keys = table.live_instance_keys();

        let report = SweepReport {
            breakers: self.breakers.retain(&live_keys),
            limiters: self.limiters.retain(|key| match key {
                ScopeKey::Global => true,
                ScopeKey::Service(service) => table.service(*service).is_some(),
                ScopeKey::Instance(service, id) => table.has_instance(*service, id),
            }),
            balancer_entries: self.balancers.retain_instances(&table.live_instance_ids()),
        };

        metrics::record_state_sizes(self.breakers.len(), self.limiters.len());
        if report.total() > 0 {
            tracing::info!(
                breakers = report.breakers,
                limiters = report.limiters,
                balancer_entries = report.balancer_entries,
                "Swept orphaned instance state"
            );
        }
        report
    }

    fn require_instance(
        &self,
        service: ServiceType,
        instance_id: &str,
    ) -> Result<CircuitBreakerConfig, DispatchError> {
        let table = self.table.load();
        match table.service(service) {
            Some(entry) if table.has_instance(service, instance_id) => Ok(entry.circuit_breaker.clone()),
            _ => Err(DispatchError::NotFound {
                service,
                model: instance_id.to_string(),
            }),
        }
    }

    /// Open the breaker of a configured instance until its timeout elapses.
    pub fn force_open(&self, service: ServiceType, instance_id: &str) -> Result<(), DispatchError> {
        let config = self.require_instance(service, instance_id)?;
        self.breakers
            .get_or_create(service, instance_id, &config)
            .force_open();
        Ok(())
    }

    pub fn force_close(&self, service: ServiceType, instance_id: &str) -> Result<(), DispatchError> {
        let config = self.require_instance(service, instance_id)?;
        self.breakers
            .get_or_create(service, instance_id, &config)
            .force_close();
        Ok(())
    }

    /// Discard a breaker's state. Returns false if none existed.
    pub fn reset_breaker(&self, service: ServiceType, instance_id: &str) -> bool {
        self.breakers.reset(service, instance_id)
    }

    /// Install a limiter for `key` that overrides configuration until removed.
    pub fn add_rate_limiter(&self, key: ScopeKey, config: RateLimitConfig) -> Result<(), DispatchError> {
        if config.scope != key.scope() {
            return Err(DispatchError::InvalidArgument(format!(
                "limiter scope '{}' does not match key '{}'",
                config.scope, key
            )));
        }
        if config.capacity == 0 {
            return Err(DispatchError::InvalidArgument(
                "limiter capacity must be positive".to_string(),
            ));
        }
        self.limiters.add(key, config);
        Ok(())
    }

    pub fn remove_rate_limiter(&self, key: &ScopeKey) -> bool {
        self.limiters.remove(key)
    }

    pub fn available_service_types(&self) -> Vec<ServiceType> {
        self.table.load().service_types()
    }

    /// Distinct model names configured for `service`, sorted.
    pub fn available_models(&self, service: ServiceType) -> Vec<String> {
        let table = self.table.load();
        table
            .service(service)
            .map(|entry| {
                entry
                    .instances
                    .iter()
                    .map(|instance| instance.name.clone())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Backend path of the first instance serving `model`.
    pub fn model_path(&self, service: ServiceType, model: &str) -> Option<String> {
        let table = self.table.load();
        let path = table
            .service(service)?
            .instances_for_model(model)
            .next()
            .map(|instance| instance.path.clone());
        path
    }

    pub fn all_instances(&self, service: ServiceType) -> Vec<Arc<ModelInstance>> {
        self.table
            .load()
            .service(service)
            .map(|entry| entry.instances.clone())
            .unwrap_or_default()
    }

    pub fn breaker_state(&self, service: ServiceType, instance_id: &str) -> Option<CircuitState> {
        self.breakers.state(service, instance_id)
    }

    pub fn breaker_states(&self) -> Vec<BreakerSnapshot> {
        self.breakers.list()
    }

    pub fn rate_limiters(&self) -> Vec<LimiterSnapshot> {
        self.limiters.list()
    }

    /// Tokens left for `key`, if a limiter for it exists.
    pub fn rate_limit_available(&self, key: &ScopeKey) -> Option<u64> {
        self.limiters.available(key)
    }

    /// Configured load balancing strategy for `service`.
    pub fn strategy_name(&self, service: ServiceType) -> Option<Strategy> {
        self.table
            .load()
            .service(service)
            .map(|entry| entry.load_balance.strategy)
    }

    /// Limit scopes configured for `service`, including the global one.
    pub fn configured_scopes(&self, service: ServiceType) -> Vec<LimitScope> {
        let table = self.table.load();
        let mut scopes = Vec::new();
        if table.global_limit.as_ref().is_some_and(|c| c.enabled) {
            scopes.push(LimitScope::Global);
        }
        if let Some(entry) = table.service(service) {
            if entry.service_limit.as_ref().is_some_and(|c| c.enabled) {
                scopes.push(LimitScope::Service);
            }
            let instance_scoped = entry.instance_limit.as_ref().is_some_and(|c| c.enabled)
                || entry
                    .instances
                    .iter()
                    .any(|i| i.rate_limit.as_ref().is_some_and(|c| c.enabled));
            if instance_scoped {
                scopes.push(LimitScope::Instance);
            }
        }
        scopes
    }
}
