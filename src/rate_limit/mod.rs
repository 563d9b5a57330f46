//! Rate limiting subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher admission:
//!     RateLimitContext (context.rs)
//!     → manager.rs (limiter for scope key, created lazily)
//!     → token_bucket.rs | leaky_bucket.rs | sliding_window.rs | warm_up.rs try_acquire
//!     → allow / deny (decision sent to the event sink)
//! ```
//!
//! # Design Decisions
//! - One limiter per scope key; unrelated scopes never share a lock
//! - Token bucket is lock-free (atomic tokens + CAS on refill timestamp)
//! - Denial has no side effect on the bucket
//! - A reconfigured limiter never starts with more units than its predecessor had left

pub mod context;
pub mod leaky_bucket;
pub mod manager;
pub mod sliding_window;
pub mod token_bucket;
pub mod warm_up;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::schema::{RateLimitAlgorithm, RateLimitConfig};
use crate::resilience::clock::Clock;

pub use context::RateLimitContext;
pub use manager::{LimiterSnapshot, RateLimitManager, ScopeKey};

pub trait RateLimiter: Send + Sync + fmt::Debug {
    /// Consume `ctx.request_weight` units if available.
    fn try_acquire(&self, ctx: &RateLimitContext) -> bool;

    /// Units currently available.
    fn available(&self) -> u64;

    /// Lower the units currently available to at most `units`.
    fn clamp_available(&self, units: u64);

    fn algorithm(&self) -> RateLimitAlgorithm;
}

pub fn build(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Arc<dyn RateLimiter> {
    match config.algorithm {
        RateLimitAlgorithm::TokenBucket => Arc::new(token_bucket::TokenBucket::new(
            config.capacity,
            config.refill_rate,
            clock,
        )),
        RateLimitAlgorithm::LeakyBucket => Arc::new(leaky_bucket::LeakyBucket::new(
            config.capacity,
            config.refill_rate,
            clock,
        )),
        RateLimitAlgorithm::SlidingWindow => Arc::new(sliding_window::SlidingWindow::new(
            config.capacity,
            Duration::from_millis(config.window_ms),
            clock,
        )),
        RateLimitAlgorithm::WarmUp => Arc::new(warm_up::WarmUp::new(
            config.capacity,
            config.refill_rate,
            Duration::from_millis(config.warm_up_period_ms),
            clock,
        )),
    }
}
