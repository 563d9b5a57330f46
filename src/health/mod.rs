//! Health subsystem.
//!
//! # Data Flow
//! ```text
//! External prober (out of process or another task)
//!     → state.rs HealthStateStore::set_healthy (change-only updates logged)
//!
//! Dispatcher step 2:
//!     → HealthOracle::is_instance_healthy(service, instance)
//! ```
//!
//! # Design Decisions
//! - The dispatcher consumes health as a boolean oracle; probing lives elsewhere
//! - Unknown instances are treated as healthy so new instances take traffic immediately
//! - Health state is per (service, instance), not per model

pub mod state;

use std::fmt;

use crate::config::schema::ModelInstance;
use crate::registry::ServiceType;

pub use state::HealthStateStore;

/// Answers whether an instance may receive traffic.
pub trait HealthOracle: Send + Sync + fmt::Debug {
    fn is_instance_healthy(&self, service: ServiceType, instance: &ModelInstance) -> bool;
}

/// Oracle that reports every instance healthy.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeHealthy;

impl HealthOracle for AssumeHealthy {
    fn is_instance_healthy(&self, _service: ServiceType, _instance: &ModelInstance) -> bool {
        true
    }
}
