//! Dispatch error taxonomy.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::registry::ServiceType;

/// Granularity at which a token bucket is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitScope {
    Global,
    Service,
    Instance,
}

impl fmt::Display for LimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitScope::Global => f.write_str("global"),
            LimitScope::Service => f.write_str("service"),
            LimitScope::Instance => f.write_str("instance"),
        }
    }
}

/// Reasons a dispatch can be rejected.
///
/// Every rejection is surfaced at the point of detection; callers map the
/// kind onto their transport (404, 503, 429, 400).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("no instances found for model '{model}' in service '{service}'")]
    NotFound { service: ServiceType, model: String },

    #[error("no available instances for model '{model}' in service '{service}'")]
    Unavailable { service: ServiceType, model: String },

    #[error("{scope} rate limit exceeded for model '{model}' in service '{service}'")]
    RateLimited {
        scope: LimitScope,
        service: ServiceType,
        model: String,
        /// Set when `scope` is [`LimitScope::Instance`].
        instance_id: Option<String>,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl DispatchError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::NotFound { .. } => "not_found",
            DispatchError::Unavailable { .. } => "unavailable",
            DispatchError::RateLimited { .. } => "rate_limited",
            DispatchError::InvalidArgument(_) => "invalid_argument",
        }
    }

    /// The limiter scope that rejected the call, if this is a rate-limit error.
    pub fn limit_scope(&self) -> Option<LimitScope> {
        match self {
            DispatchError::RateLimited { scope, .. } => Some(*scope),
            _ => None,
        }
    }
}
