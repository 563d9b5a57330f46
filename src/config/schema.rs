//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the router.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::load_balancer::ip_hash::HashAlgorithm;
use crate::load_balancer::Strategy;
use crate::registry::LimitScope;

/// Root configuration for the model router.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RouterConfig {
    /// Fallback settings applied to services that do not override them.
    pub defaults: DefaultsConfig,

    /// Optional limiter shared by every service (scope must be `global`).
    pub global_rate_limit: Option<RateLimitConfig>,

    /// Service definitions keyed by service type (`chat`, `img-gen`, ...).
    pub services: BTreeMap<String, ServiceConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Orphaned state garbage collection.
    pub sweep: SweepConfig,
}

/// Defaults for per-service settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DefaultsConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub load_balance: LoadBalanceConfig,
}

/// Configuration of one logical service.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Backend instances serving this service.
    pub instances: Vec<ModelInstance>,

    /// Load balancing strategy (falls back to `defaults.load_balance`).
    pub load_balance: Option<LoadBalanceConfig>,

    /// Service- and instance-scope limiters.
    pub rate_limits: Vec<RateLimitConfig>,

    /// Circuit breaker thresholds (falls back to `defaults.circuit_breaker`).
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl ServiceConfig {
    /// The limiter configured for `scope`, if any.
    pub fn rate_limit_for(&self, scope: LimitScope) -> Option<&RateLimitConfig> {
        self.rate_limits.iter().find(|rl| rl.scope == scope)
    }
}

/// One deployed backend endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ModelInstance {
    /// Model name requested by callers.
    pub name: String,

    /// Backend base URL (e.g., "http://10.0.0.5:8000").
    pub base_url: String,

    /// Path appended to `base_url` when calling the backend.
    #[serde(default)]
    pub path: String,

    /// Weight for weighted load balancing (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Instance-scope limiter overriding the service's instance limiter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
}

fn default_weight() -> u32 {
    1
}

impl ModelInstance {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            path: path.into(),
            weight: 1,
            rate_limit: None,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// Stable key for breaker and limiter state: `name@base_url`.
    pub fn instance_id(&self) -> String {
        format!("{}@{}", self.name, self.base_url)
    }

    /// Full backend URL for this instance.
    pub fn url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.path)
    }
}

/// Load balancing configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadBalanceConfig {
    pub strategy: Strategy,

    /// Digest used by the `ip-hash` strategy.
    pub hash_algorithm: HashAlgorithm,
}

impl Default for LoadBalanceConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Random,
            hash_algorithm: HashAlgorithm::Sha256,
        }
    }
}

/// Rate limiting algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RateLimitAlgorithm {
    #[default]
    TokenBucket,
    LeakyBucket,
    SlidingWindow,
    WarmUp,
}

/// Rate limiter configuration for one scope.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Disabled limiters are treated as absent.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub algorithm: RateLimitAlgorithm,

    /// Bucket size (token bucket) or calls per window (sliding window).
    pub capacity: u64,

    /// Units per second: refill for token bucket and warm-up, drain for leaky bucket.
    #[serde(default)]
    pub refill_rate: f64,

    /// Window length in milliseconds (sliding window only).
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Time for the refill rate to ramp up to `refill_rate` (warm-up only).
    #[serde(default)]
    pub warm_up_period_ms: u64,

    /// Granularity at which the limiter is shared.
    pub scope: LimitScope,
}

fn default_true() -> bool {
    true
}

fn default_window_ms() -> u64 {
    1000
}

impl RateLimitConfig {
    /// A token bucket with the given capacity and refill rate.
    pub fn token_bucket(scope: LimitScope, capacity: u64, refill_rate: f64) -> Self {
        Self {
            enabled: true,
            algorithm: RateLimitAlgorithm::TokenBucket,
            capacity,
            refill_rate,
            window_ms: default_window_ms(),
            warm_up_period_ms: 0,
            scope,
        }
    }

    /// A leaky bucket holding `capacity` units, draining `leak_rate` per second.
    pub fn leaky_bucket(scope: LimitScope, capacity: u64, leak_rate: f64) -> Self {
        Self {
            algorithm: RateLimitAlgorithm::LeakyBucket,
            ..Self::token_bucket(scope, capacity, leak_rate)
        }
    }

    /// A token bucket whose refill ramps up to `refill_rate` over `warm_up_period_ms`.
    pub fn warm_up(scope: LimitScope, capacity: u64, refill_rate: f64, warm_up_period_ms: u64) -> Self {
        Self {
            algorithm: RateLimitAlgorithm::WarmUp,
            warm_up_period_ms,
            ..Self::token_bucket(scope, capacity, refill_rate)
        }
    }

    /// A sliding window admitting `capacity` calls per `window_ms`.
    pub fn sliding_window(scope: LimitScope, capacity: u64, window_ms: u64) -> Self {
        Self {
            enabled: true,
            algorithm: RateLimitAlgorithm::SlidingWindow,
            capacity,
            refill_rate: 0.0,
            window_ms,
            warm_up_period_ms: 0,
            scope,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,

    /// Time in OPEN before a probe is admitted, in milliseconds.
    pub timeout_ms: u64,

    /// Consecutive HALF_OPEN successes before the breaker closes.
    pub success_threshold: u32,

    /// Probe admissions per HALF_OPEN window (default: `success_threshold`).
    pub half_open_max_calls: Option<u32>,

    /// Optional failure-rate trip in addition to consecutive failures.
    pub failure_rate: Option<FailureRateConfig>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_ms: 60_000,
            success_threshold: 2,
            half_open_max_calls: None,
            failure_rate: None,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn probe_budget(&self) -> u32 {
        self.half_open_max_calls.unwrap_or(self.success_threshold).max(1)
    }
}

/// Rolling-window failure-rate trip.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FailureRateConfig {
    /// Failure ratio in (0, 1] at which the breaker opens.
    pub threshold: f64,

    /// Minimum calls in the window before the ratio is considered.
    pub minimum_calls: u32,

    /// Window length in milliseconds.
    pub window_ms: u64,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Orphan sweep configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SweepConfig {
    pub enabled: bool,

    /// Interval between sweeps in seconds.
    pub interval_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
        }
    }
}
