//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Service keys name a known service type, each at most once
//! - Validate value ranges (weights, thresholds, capacities > 0)
//! - Limiter scopes placed where they can apply
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RouterConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::str::FromStr;

use url::Url;

use crate::config::schema::{CircuitBreakerConfig, RateLimitAlgorithm, RateLimitConfig, RouterConfig};
use crate::registry::{LimitScope, ServiceType};

/// One semantic problem, located by a dotted path into the config.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{path}: {message}")]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

#[derive(Default)]
struct Errors(Vec<ValidationError>);

impl Errors {
    fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.0.push(ValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

pub fn validate_config(config: &RouterConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Errors::default();

    validate_circuit_breaker(&mut errors, "defaults.circuit_breaker", &config.defaults.circuit_breaker);

    if let Some(global) = &config.global_rate_limit {
        validate_rate_limit(&mut errors, "global_rate_limit", global);
        if global.scope != LimitScope::Global {
            errors.push("global_rate_limit.scope", "must be \"global\"");
        }
    }

    let mut service_keys: HashMap<ServiceType, &str> = HashMap::new();
    for (key, service) in &config.services {
        let path = format!("services.{key}");
        match ServiceType::from_str(key) {
            Ok(service_type) => {
                if let Some(first) = service_keys.insert(service_type, key) {
                    errors.push(
                        &path,
                        format!("names the same service as '{first}' ({service_type})"),
                    );
                }
            }
            Err(e) => errors.push(&path, e.to_string()),
        }

        if let Some(cb) = &service.circuit_breaker {
            validate_circuit_breaker(&mut errors, &format!("{path}.circuit_breaker"), cb);
        }

        let mut scopes = HashSet::new();
        for (i, rl) in service.rate_limits.iter().enumerate() {
            let rl_path = format!("{path}.rate_limits[{i}]");
            validate_rate_limit(&mut errors, &rl_path, rl);
            if rl.scope == LimitScope::Global {
                errors.push(
                    format!("{rl_path}.scope"),
                    "global limiter belongs in global_rate_limit",
                );
            }
            if !scopes.insert(rl.scope) {
                errors.push(
                    format!("{rl_path}.scope"),
                    format!("duplicate {} limiter", rl.scope),
                );
            }
        }

        let mut ids = HashSet::new();
        for (i, instance) in service.instances.iter().enumerate() {
            let inst_path = format!("{path}.instances[{i}]");
            if instance.name.trim().is_empty() {
                errors.push(format!("{inst_path}.name"), "must not be empty");
            }
            if let Err(e) = Url::parse(&instance.base_url) {
                errors.push(
                    format!("{inst_path}.base_url"),
                    format!("invalid URL '{}': {e}", instance.base_url),
                );
            }
            if instance.weight == 0 {
                errors.push(format!("{inst_path}.weight"), "must be greater than 0");
            }
            if !ids.insert(instance.instance_id()) {
                errors.push(
                    &inst_path,
                    format!("duplicate instance '{}'", instance.instance_id()),
                );
            }
            if let Some(rl) = &instance.rate_limit {
                let rl_path = format!("{inst_path}.rate_limit");
                validate_rate_limit(&mut errors, &rl_path, rl);
                if rl.scope != LimitScope::Instance {
                    errors.push(format!("{rl_path}.scope"), "must be \"instance\"");
                }
            }
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(
            "observability.metrics_address",
            format!("invalid socket address '{}'", config.observability.metrics_address),
        );
    }

    if config.sweep.enabled && config.sweep.interval_secs == 0 {
        errors.push("sweep.interval_secs", "must be greater than 0");
    }

    if errors.0.is_empty() {
        Ok(())
    } else {
        Err(errors.0)
    }
}

fn validate_rate_limit(errors: &mut Errors, path: &str, rl: &RateLimitConfig) {
    if rl.capacity == 0 {
        errors.push(format!("{path}.capacity"), "must be greater than 0");
    }
    match rl.algorithm {
        RateLimitAlgorithm::TokenBucket | RateLimitAlgorithm::LeakyBucket => {
            validate_rate(errors, path, rl);
        }
        RateLimitAlgorithm::WarmUp => {
            validate_rate(errors, path, rl);
            if rl.warm_up_period_ms == 0 {
                errors.push(format!("{path}.warm_up_period_ms"), "must be greater than 0");
            }
        }
        RateLimitAlgorithm::SlidingWindow => {
            if rl.window_ms == 0 {
                errors.push(format!("{path}.window_ms"), "must be greater than 0");
            }
        }
    }
}

fn validate_rate(errors: &mut Errors, path: &str, rl: &RateLimitConfig) {
    if !(rl.refill_rate.is_finite() && rl.refill_rate > 0.0) {
        errors.push(format!("{path}.refill_rate"), "must be a positive number");
    }
}

fn validate_circuit_breaker(errors: &mut Errors, path: &str, cb: &CircuitBreakerConfig) {
    if cb.failure_threshold == 0 {
        errors.push(format!("{path}.failure_threshold"), "must be greater than 0");
    }
    if cb.success_threshold == 0 {
        errors.push(format!("{path}.success_threshold"), "must be greater than 0");
    }
    if cb.timeout_ms == 0 {
        errors.push(format!("{path}.timeout_ms"), "must be greater than 0");
    }
    if cb.half_open_max_calls == Some(0) {
        errors.push(format!("{path}.half_open_max_calls"), "must be greater than 0");
    }
    if let Some(rate) = &cb.failure_rate {
        if !(rate.threshold > 0.0 && rate.threshold <= 1.0) {
            errors.push(format!("{path}.failure_rate.threshold"), "must be in (0, 1]");
        }
        if rate.minimum_calls == 0 {
            errors.push(format!("{path}.failure_rate.minimum_calls"), "must be greater than 0");
        }
        if rate.window_ms == 0 {
            errors.push(format!("{path}.failure_rate.window_ms"), "must be greater than 0");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{FailureRateConfig, ModelInstance, ServiceConfig};

    fn service(instances: Vec<ModelInstance>) -> ServiceConfig {
        ServiceConfig {
            instances,
            ..Default::default()
        }
    }

    fn paths(config: &RouterConfig) -> Vec<String> {
        validate_config(config)
            .unwrap_err()
            .into_iter()
            .map(|e| e.path)
            .collect()
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&RouterConfig::default()).is_ok());
    }

    #[test]
    fn test_unknown_service_key() {
        let mut config = RouterConfig::default();
        config.services.insert("video".into(), ServiceConfig::default());
        assert_eq!(paths(&config), vec!["services.video"]);
    }

    #[test]
    fn test_service_key_aliases_collide() {
        let mut config = RouterConfig::default();
        config.services.insert("img-gen".into(), ServiceConfig::default());
        config.services.insert("imgGen".into(), ServiceConfig::default());
        config.services.insert("chat".into(), ServiceConfig::default());
        config.services.insert("Chat".into(), ServiceConfig::default());

        let errors = validate_config(&config).unwrap_err();
        let mut found: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
        found.sort();
        // BTreeMap order: "Chat" < "chat" and "img-gen" < "imgGen".
        assert_eq!(found, vec!["services.chat", "services.imgGen"]);
        assert!(errors[0].message.contains("names the same service"));
    }

    #[test]
    fn test_limiter_algorithm_requirements() {
        let mut config = RouterConfig::default();
        let mut chat = service(vec![]);
        chat.rate_limits = vec![
            RateLimitConfig::leaky_bucket(LimitScope::Service, 10, 0.0),
            RateLimitConfig::warm_up(LimitScope::Instance, 10, 1.0, 0),
        ];
        config.services.insert("chat".into(), chat);

        let mut found = paths(&config);
        found.sort();
        assert_eq!(
            found,
            vec![
                "services.chat.rate_limits[0].refill_rate",
                "services.chat.rate_limits[1].warm_up_period_ms",
            ]
        );
    }

    #[test]
    fn test_duplicate_instances_rejected() {
        let mut config = RouterConfig::default();
        config.services.insert(
            "chat".into(),
            service(vec![
                ModelInstance::new("m", "http://a:1", "/v1"),
                ModelInstance::new("m", "http://a:1", "/v2"),
            ]),
        );
        assert_eq!(paths(&config), vec!["services.chat.instances[1]"]);
    }

    #[test]
    fn test_rate_limit_scope_placement() {
        let mut config = RouterConfig::default();
        config.global_rate_limit = Some(RateLimitConfig::token_bucket(LimitScope::Service, 10, 1.0));

        let mut chat = service(vec![ModelInstance::new("m", "http://a:1", "")
            .with_rate_limit(RateLimitConfig::token_bucket(LimitScope::Service, 1, 1.0))]);
        chat.rate_limits = vec![
            RateLimitConfig::token_bucket(LimitScope::Service, 10, 1.0),
            RateLimitConfig::token_bucket(LimitScope::Service, 5, 1.0),
            RateLimitConfig::token_bucket(LimitScope::Global, 5, 1.0),
        ];
        config.services.insert("chat".into(), chat);

        let mut found = paths(&config);
        found.sort();
        assert_eq!(
            found,
            vec![
                "global_rate_limit.scope",
                "services.chat.instances[0].rate_limit.scope",
                "services.chat.rate_limits[1].scope",
                "services.chat.rate_limits[2].scope",
            ]
        );
    }

    #[test]
    fn test_limiter_and_breaker_ranges() {
        let mut config = RouterConfig::default();
        config.defaults.circuit_breaker.failure_threshold = 0;
        config.defaults.circuit_breaker.failure_rate = Some(FailureRateConfig {
            threshold: 1.5,
            minimum_calls: 10,
            window_ms: 1000,
        });
        let mut chat = service(vec![]);
        chat.rate_limits = vec![RateLimitConfig::token_bucket(LimitScope::Service, 0, 0.0)];
        config.services.insert("chat".into(), chat);

        let mut found = paths(&config);
        found.sort();
        assert_eq!(
            found,
            vec![
                "defaults.circuit_breaker.failure_rate.threshold",
                "defaults.circuit_breaker.failure_threshold",
                "services.chat.rate_limits[0].capacity",
                "services.chat.rate_limits[0].refill_rate",
            ]
        );
    }
}
