//! Token bucket with a warm-up ramp.
//!
//! The refill rate starts at zero and grows linearly to `rate` over
//! `warm_up`, then stays there. Refill integrates the ramp exactly, so the
//! tokens credited between two instants do not depend on how often the
//! bucket is touched.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::schema::RateLimitAlgorithm;
use crate::rate_limit::{RateLimitContext, RateLimiter};
use crate::resilience::clock::Clock;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    /// Seconds since `warm_since` at the last refill.
    refilled_at: f64,
    warm_since: Instant,
}

#[derive(Debug)]
pub struct WarmUp {
    capacity: u64,
    rate: f64,
    warm_up: Duration,
    bucket: Mutex<Bucket>,
    clock: Arc<dyn Clock>,
}

impl WarmUp {
    /// A full bucket whose refill ramps to `rate` tokens per second over `warm_up`.
    pub fn new(capacity: u64, rate: f64, warm_up: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            capacity,
            rate: rate.max(0.0),
            warm_up,
            bucket: Mutex::new(Bucket {
                tokens: capacity as f64,
                refilled_at: 0.0,
                warm_since: clock.now(),
            }),
            clock,
        }
    }

    /// Tokens credited from the start of the ramp up to `t` seconds.
    fn credited(&self, t: f64) -> f64 {
        let period = self.warm_up.as_secs_f64();
        if period == 0.0 {
            self.rate * t
        } else if t < period {
            self.rate * t * t / (2.0 * period)
        } else {
            self.rate * (t - period / 2.0)
        }
    }

    /// Refill rate in effect right now.
    pub fn current_rate(&self) -> f64 {
        let bucket = self.bucket.lock();
        let t = self.clock.now().saturating_duration_since(bucket.warm_since);
        if t >= self.warm_up {
            self.rate
        } else {
            self.rate * t.as_secs_f64() / self.warm_up.as_secs_f64()
        }
    }

    /// Restart the ramp from zero, keeping the tokens already in the bucket.
    pub fn reset_warm_up(&self) {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.warm_since = self.clock.now();
        bucket.refilled_at = 0.0;
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = self
            .clock
            .now()
            .saturating_duration_since(bucket.warm_since)
            .as_secs_f64();
        if now <= bucket.refilled_at {
            return;
        }
        let added = self.credited(now) - self.credited(bucket.refilled_at);
        bucket.tokens = (bucket.tokens + added).min(self.capacity as f64);
        bucket.refilled_at = now;
    }

    pub fn try_acquire_weight(&self, weight: u64) -> bool {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        if bucket.tokens < weight as f64 {
            return false;
        }
        bucket.tokens -= weight as f64;
        true
    }
}

impl RateLimiter for WarmUp {
    fn try_acquire(&self, ctx: &RateLimitContext) -> bool {
        self.try_acquire_weight(ctx.request_weight)
    }

    fn available(&self) -> u64 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens.floor() as u64
    }

    fn clamp_available(&self, units: u64) {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens = bucket.tokens.min(units as f64);
    }

    fn algorithm(&self) -> RateLimitAlgorithm {
        RateLimitAlgorithm::WarmUp
    }
}
