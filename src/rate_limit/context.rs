//! Immutable per-check limiter input.

use crate::config::schema::ModelInstance;
use crate::registry::ServiceType;

/// Carried through every limiter check of one dispatch.
///
/// `request_weight` lets a single call consume more than one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitContext {
    pub service: ServiceType,
    pub model: String,
    pub client_key: Option<String>,
    pub request_weight: u64,
    pub instance_id: Option<String>,
    pub instance_url: Option<String>,
}

impl RateLimitContext {
    pub fn new(service: ServiceType, model: impl Into<String>) -> Self {
        Self {
            service,
            model: model.into(),
            client_key: None,
            request_weight: 1,
            instance_id: None,
            instance_url: None,
        }
    }

    pub fn with_client_key(mut self, client_key: Option<&str>) -> Self {
        self.client_key = client_key.map(str::to_string);
        self
    }

    pub fn with_weight(mut self, request_weight: u64) -> Self {
        self.request_weight = request_weight;
        self
    }

    /// The same context narrowed to a chosen instance.
    pub fn for_instance(&self, instance: &ModelInstance) -> Self {
        Self {
            instance_id: Some(instance.instance_id()),
            instance_url: Some(instance.url()),
            ..self.clone()
        }
    }
}
