//! Sliding-window call counter.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::schema::RateLimitAlgorithm;
use crate::rate_limit::{RateLimitContext, RateLimiter};
use crate::resilience::clock::Clock;

/// Admits at most `capacity` units of weight within any `window`.
#[derive(Debug)]
pub struct SlidingWindow {
    capacity: u64,
    window: Duration,
    admitted: Mutex<VecDeque<(Instant, u64)>>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindow {
    pub fn new(capacity: u64, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            capacity,
            window,
            admitted: Mutex::new(VecDeque::new()),
            clock,
        }
    }

    fn evict(&self, admitted: &mut VecDeque<(Instant, u64)>, now: Instant) {
        while let Some(&(at, _)) = admitted.front() {
            if now.saturating_duration_since(at) >= self.window {
                admitted.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn try_acquire_weight(&self, weight: u64) -> bool {
        let now = self.clock.now();
        let mut admitted = self.admitted.lock();
        self.evict(&mut admitted, now);

        let used: u64 = admitted.iter().map(|(_, w)| w).sum();
        if used.saturating_add(weight) > self.capacity {
            return false;
        }
        admitted.push_back((now, weight));
        true
    }
}

impl RateLimiter for SlidingWindow {
    fn try_acquire(&self, ctx: &RateLimitContext) -> bool {
        self.try_acquire_weight(ctx.request_weight)
    }

    fn available(&self) -> u64 {
        let now = self.clock.now();
        let mut admitted = self.admitted.lock();
        self.evict(&mut admitted, now);
        let used: u64 = admitted.iter().map(|(_, w)| w).sum();
        self.capacity.saturating_sub(used)
    }

    /// Records the difference as admitted now, so it ages out with the window.
    fn clamp_available(&self, units: u64) {
        let now = self.clock.now();
        let mut admitted = self.admitted.lock();
        self.evict(&mut admitted, now);
        let used: u64 = admitted.iter().map(|(_, w)| w).sum();
        let excess = self.capacity.saturating_sub(used).saturating_sub(units);
        if excess > 0 {
            admitted.push_back((now, excess));
        }
    }

    fn algorithm(&self) -> RateLimitAlgorithm {
        RateLimitAlgorithm::SlidingWindow
    }
}
