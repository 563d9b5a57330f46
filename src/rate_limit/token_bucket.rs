//! Lock-free token bucket.
//!
//! Tokens are kept as fixed-point micro-tokens in an atomic so fractional
//! refill accumulates without a lock. Refill advances the timestamp with a
//! compare-and-set and only when at least one micro-token is due, so
//! concurrent refills never double count elapsed time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::schema::RateLimitAlgorithm;
use crate::rate_limit::{RateLimitContext, RateLimiter};
use crate::resilience::clock::Clock;

const SCALE: u64 = 1_000_000;

#[derive(Debug)]
pub struct TokenBucket {
    /// Capacity in micro-tokens.
    capacity: u64,
    refill_per_sec: f64,
    tokens: AtomicU64,
    /// Nanoseconds since `origin` at the last committed refill.
    last_refill: AtomicU64,
    origin: Instant,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    /// A full bucket holding `capacity` tokens, refilled at `refill_per_sec`.
    pub fn new(capacity: u64, refill_per_sec: f64, clock: Arc<dyn Clock>) -> Self {
        let capacity = capacity.saturating_mul(SCALE);
        Self {
            capacity,
            refill_per_sec: refill_per_sec.max(0.0),
            tokens: AtomicU64::new(capacity),
            last_refill: AtomicU64::new(0),
            origin: clock.now(),
            clock,
        }
    }

    /// Whole tokens currently available (after refilling).
    pub fn available_tokens(&self) -> u64 {
        self.refill();
        self.tokens.load(Ordering::Acquire) / SCALE
    }

    /// Take `weight` tokens if all of them are present. No side effect on denial.
    pub fn try_acquire_weight(&self, weight: u64) -> bool {
        self.refill();
        let needed = weight.saturating_mul(SCALE);
        self.tokens
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |tokens| {
                tokens.checked_sub(needed)
            })
            .is_ok()
    }

    fn now_nanos(&self) -> u64 {
        let elapsed = self.clock.now().saturating_duration_since(self.origin);
        u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
    }

    fn refill(&self) {
        if self.refill_per_sec == 0.0 {
            return;
        }
        let now = self.now_nanos();
        let last = self.last_refill.load(Ordering::Acquire);
        if now <= last {
            return;
        }

        let elapsed_secs = (now - last) as f64 / 1e9;
        let to_add = (elapsed_secs * self.refill_per_sec * SCALE as f64) as u64;
        if to_add == 0 {
            return;
        }

        if self
            .last_refill
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let capacity = self.capacity;
            let _ = self
                .tokens
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |tokens| {
                    Some(tokens.saturating_add(to_add).min(capacity))
                });
        }
    }
}

impl RateLimiter for TokenBucket {
    fn try_acquire(&self, ctx: &RateLimitContext) -> bool {
        self.try_acquire_weight(ctx.request_weight)
    }

    fn available(&self) -> u64 {
        self.available_tokens()
    }

    fn clamp_available(&self, units: u64) {
        self.refill();
        let ceiling = units.saturating_mul(SCALE);
        let _ = self
            .tokens
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |tokens| Some(tokens.min(ceiling)));
    }

    fn algorithm(&self) -> RateLimitAlgorithm {
        RateLimitAlgorithm::TokenBucket
    }
}
