//! Leaky bucket meter.
//!
//! Each admitted call pours its weight into the bucket, which drains at a
//! constant rate. A call that would overflow `capacity` is denied.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::schema::RateLimitAlgorithm;
use crate::rate_limit::{RateLimitContext, RateLimiter};
use crate::resilience::clock::Clock;

#[derive(Debug)]
struct Level {
    water: f64,
    last_leak: Instant,
}

#[derive(Debug)]
pub struct LeakyBucket {
    capacity: u64,
    leak_per_sec: f64,
    level: Mutex<Level>,
    clock: Arc<dyn Clock>,
}

impl LeakyBucket {
    /// An empty bucket draining `leak_per_sec` units per second.
    pub fn new(capacity: u64, leak_per_sec: f64, clock: Arc<dyn Clock>) -> Self {
        Self {
            capacity,
            leak_per_sec: leak_per_sec.max(0.0),
            level: Mutex::new(Level {
                water: 0.0,
                last_leak: clock.now(),
            }),
            clock,
        }
    }

    fn leak(&self, level: &mut Level) {
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(level.last_leak).as_secs_f64();
        level.water = (level.water - elapsed * self.leak_per_sec).max(0.0);
        level.last_leak = now;
    }

    pub fn try_acquire_weight(&self, weight: u64) -> bool {
        let mut level = self.level.lock();
        self.leak(&mut level);
        if level.water + weight as f64 > self.capacity as f64 {
            return false;
        }
        level.water += weight as f64;
        true
    }
}

impl RateLimiter for LeakyBucket {
    fn try_acquire(&self, ctx: &RateLimitContext) -> bool {
        self.try_acquire_weight(ctx.request_weight)
    }

    fn available(&self) -> u64 {
        let mut level = self.level.lock();
        self.leak(&mut level);
        (self.capacity as f64 - level.water).max(0.0).floor() as u64
    }

    fn clamp_available(&self, units: u64) {
        let mut level = self.level.lock();
        self.leak(&mut level);
        let floor = self.capacity.saturating_sub(units) as f64;
        level.water = level.water.max(floor);
    }

    fn algorithm(&self) -> RateLimitAlgorithm {
        RateLimitAlgorithm::LeakyBucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::clock::ManualClock;
    use std::time::Duration;

    #[test]
    fn test_fills_then_drains() {
        let clock = Arc::new(ManualClock::new());
        let bucket = LeakyBucket::new(10, 5.0, clock.clone());

        for _ in 0..10 {
            assert!(bucket.try_acquire_weight(1));
        }
        assert!(!bucket.try_acquire_weight(1));

        clock.advance(Duration::from_secs(1));
        assert_eq!(bucket.available(), 5);
        for _ in 0..5 {
            assert!(bucket.try_acquire_weight(1));
        }
        assert!(!bucket.try_acquire_weight(1));
    }

    #[test]
    fn test_weight_must_fit_whole() {
        let clock = Arc::new(ManualClock::new());
        let bucket = LeakyBucket::new(4, 1.0, clock.clone());

        assert!(bucket.try_acquire_weight(3));
        assert!(!bucket.try_acquire_weight(2));
        assert!(bucket.try_acquire_weight(1));

        // Never drains below empty.
        clock.advance(Duration::from_secs(60));
        assert_eq!(bucket.available(), 4);
        assert!(!bucket.try_acquire_weight(5));
    }

    #[test]
    fn test_clamp_available_raises_level() {
        let bucket = LeakyBucket::new(10, 1.0, Arc::new(ManualClock::new()));
        bucket.clamp_available(3);
        assert_eq!(bucket.available(), 3);
        bucket.clamp_available(8);
        assert_eq!(bucket.available(), 3);
    }
}
