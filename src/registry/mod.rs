//! Model service registry: the dispatch core.
//!
//! # Data Flow
//! ```text
//! RouterConfig
//!     → table.rs (RoutingTable snapshot, defaults applied)
//!     → dispatcher.rs (ModelServiceRegistry, snapshot held in ArcSwap)
//!
//! select_instance:
//!     health oracle → resilience (breakers) → rate_limit (global, service)
//!     → load_balancer → rate_limit (instance) → instance
//!
//! record_call_complete / record_call_failure:
//!     → load_balancer on_call_end → breaker on_success / on_failure
//! ```
//!
//! # Design Decisions
//! - State keyed by (service, instance_id) so every path resolves the same breaker and limiter
//! - No registry-wide lock; each breaker, limiter, and balancer guards itself
//! - Typed errors distinguish the rejecting limiter scope for caller backoff

pub mod dispatcher;
pub mod error;
pub mod service_type;
pub mod table;

pub use dispatcher::{ModelServiceRegistry, SweepReport};
pub use error::{DispatchError, LimitScope};
pub use service_type::{ServiceType, UnknownServiceType};
pub use table::{RoutingTable, ServiceEntry};
