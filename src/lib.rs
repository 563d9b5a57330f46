//! Model router dispatch core.
//!
//! Selects one healthy, non-throttled, non-tripped backend instance per call
//! for a logical AI service, combining health, circuit breakers, multi-scope
//! rate limiting, and a pluggable load balancing strategy.

pub mod config;
pub mod health;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod rate_limit;
pub mod registry;
pub mod resilience;

pub use config::schema::RouterConfig;
pub use lifecycle::Shutdown;
pub use registry::{DispatchError, ModelServiceRegistry, ServiceType};
