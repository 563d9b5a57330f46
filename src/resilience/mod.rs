//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Admission (dispatcher step 2):
//!     → manager.rs (breaker for service + instance, created lazily)
//!     → circuit_breaker.rs can_execute (may move Open → Half-Open)
//!
//! Outcome reporting:
//!     record_call_complete / record_call_failure
//!     → circuit_breaker.rs on_success / on_failure
//!     → transitions logged and sent to the event sink
//! ```
//!
//! # Design Decisions
//! - Per-instance circuit breaker (not global), one lock per breaker
//! - Time read through clock.rs so state machines are testable
//! - Breakers outlive config reloads; only sweeps and resets remove them

pub mod circuit_breaker;
pub mod clock;
pub mod manager;

pub use circuit_breaker::{Admission, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use manager::CircuitBreakerManager;
