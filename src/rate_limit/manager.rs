//! Scope-keyed limiter registry.
//!
//! # Responsibilities
//! - Map scope keys (`global`, `service:{svc}`, `instance:{svc}:{id}`) to limiters
//! - Create limiters lazily from the routing table's configuration
//! - Replace a limiter when its configuration changes, keeping its remaining units
//! - Keep administratively added limiters until they are removed

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::config::schema::{RateLimitAlgorithm, RateLimitConfig};
use crate::observability::events::EventSink;
use crate::rate_limit::{build, RateLimitContext, RateLimiter};
use crate::registry::{LimitScope, ServiceType};
use crate::resilience::clock::Clock;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    Global,
    Service(ServiceType),
    Instance(ServiceType, String),
}

impl ScopeKey {
    pub fn scope(&self) -> LimitScope {
        match self {
            ScopeKey::Global => LimitScope::Global,
            ScopeKey::Service(_) => LimitScope::Service,
            ScopeKey::Instance(..) => LimitScope::Instance,
        }
    }

    pub fn service(&self) -> Option<ServiceType> {
        match self {
            ScopeKey::Global => None,
            ScopeKey::Service(service) | ScopeKey::Instance(service, _) => Some(*service),
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKey::Global => f.write_str("global"),
            ScopeKey::Service(service) => write!(f, "service:{service}"),
            ScopeKey::Instance(service, id) => write!(f, "instance:{service}:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimiterSnapshot {
    pub key: String,
    pub algorithm: RateLimitAlgorithm,
    pub capacity: u64,
    pub available: u64,
    /// Added through the admin API rather than derived from configuration.
    pub pinned: bool,
}

#[derive(Debug, Clone)]
struct Entry {
    config: RateLimitConfig,
    limiter: Arc<dyn RateLimiter>,
    pinned: bool,
}

#[derive(Debug)]
pub struct RateLimitManager {
    limiters: DashMap<ScopeKey, Entry>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl RateLimitManager {
    pub fn new(clock: Arc<dyn Clock>, events: Arc<dyn EventSink>) -> Self {
        Self {
            limiters: DashMap::new(),
            clock,
            events,
        }
    }

    /// Check the limiter for `key`.
    ///
    /// A pinned limiter always applies. Otherwise `configured` (from the
    /// current routing table) decides: absent or disabled means allowed.
    pub fn try_acquire(
        &self,
        key: &ScopeKey,
        configured: Option<&RateLimitConfig>,
        ctx: &RateLimitContext,
    ) -> bool {
        let Some(limiter) = self.resolve(key, configured) else {
            return true;
        };

        let allowed = limiter.try_acquire(ctx);
        if !allowed {
            tracing::debug!(
                scope = %key,
                service = %ctx.service,
                model = %ctx.model,
                weight = ctx.request_weight,
                "Rate limit denied"
            );
        }
        self.events.on_rate_limit(key.scope(), ctx.service, allowed);
        allowed
    }

    fn resolve(&self, key: &ScopeKey, configured: Option<&RateLimitConfig>) -> Option<Arc<dyn RateLimiter>> {
        if let Some(entry) = self.limiters.get(key) {
            if entry.pinned {
                return Some(entry.limiter.clone());
            }
            if let Some(config) = configured.filter(|c| c.enabled) {
                if &entry.config == config {
                    return Some(entry.limiter.clone());
                }
            }
        }

        match configured.filter(|c| c.enabled) {
            Some(config) => {
                let mut entry = self.limiters.entry(key.clone()).or_insert_with(|| {
                    tracing::debug!(scope = %key, capacity = config.capacity, "Creating rate limiter");
                    Entry {
                        config: config.clone(),
                        limiter: build(config, self.clock.clone()),
                        pinned: false,
                    }
                });
                if !entry.pinned && &entry.config != config {
                    // Carry the remaining units over so a rebuild never refills the scope.
                    let remaining = entry.limiter.available();
                    let limiter = build(config, self.clock.clone());
                    limiter.clamp_available(remaining);
                    tracing::info!(
                        scope = %key,
                        capacity = config.capacity,
                        available = limiter.available(),
                        "Rate limiter reconfigured"
                    );
                    *entry = Entry {
                        config: config.clone(),
                        limiter,
                        pinned: false,
                    };
                }
                Some(entry.limiter.clone())
            }
            None => {
                // Configuration no longer limits this scope.
                self.limiters.remove_if(key, |_, entry| !entry.pinned);
                None
            }
        }
    }

    /// Install a limiter for `key`, overriding configuration until removed.
    pub fn add(&self, key: ScopeKey, config: RateLimitConfig) {
        tracing::info!(scope = %key, capacity = config.capacity, "Rate limiter added");
        let limiter = build(&config, self.clock.clone());
        self.limiters.insert(
            key,
            Entry {
                config,
                limiter,
                pinned: true,
            },
        );
    }

    /// Remove the limiter for `key`. A configured scope gets a fresh limiter on next use.
    pub fn remove(&self, key: &ScopeKey) -> bool {
        let removed = self.limiters.remove(key).is_some();
        if removed {
            tracing::info!(scope = %key, "Rate limiter removed");
        }
        removed
    }

    pub fn contains(&self, key: &ScopeKey) -> bool {
        self.limiters.contains_key(key)
    }

    pub fn available(&self, key: &ScopeKey) -> Option<u64> {
        self.limiters.get(key).map(|entry| entry.limiter.available())
    }

    pub fn list(&self) -> Vec<LimiterSnapshot> {
        let mut snapshots: Vec<LimiterSnapshot> = self
            .limiters
            .iter()
            .map(|entry| LimiterSnapshot {
                key: entry.key().to_string(),
                algorithm: entry.value().limiter.algorithm(),
                capacity: entry.value().config.capacity,
                available: entry.value().limiter.available(),
                pinned: entry.value().pinned,
            })
            .collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }

    /// Keep only limiters for which `is_live` holds. Returns entries removed.
    pub fn retain(&self, is_live: impl Fn(&ScopeKey) -> bool) -> usize {
        let before = self.limiters.len();
        self.limiters.retain(|key, _| is_live(key));
        before - self.limiters.len()
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}
