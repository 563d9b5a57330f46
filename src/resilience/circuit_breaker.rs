//! Circuit breaker for backend instance protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: instance assumed down, calls fail fast
//! - Half-Open: a limited number of probes test whether the instance recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//!                (or failure ratio >= threshold over a rolling window)
//! Open → Half-Open: first admission check at least `timeout` after the last failure
//! Half-Open → Closed: success_threshold consecutive probe successes
//! Half-Open → Open: any probe failure
//! ```
//!
//! # Design Decisions
//! - One breaker per (service, instance), each behind its own lock
//! - Fail fast in Open state (no waiting for timeout)
//! - Half-Open admissions bounded by a probe budget; a stalled budget is
//!   refreshed after another `timeout` so unreported probes cannot wedge it

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::schema::CircuitBreakerConfig;
use crate::observability::events::EventSink;
use crate::registry::ServiceType;
use crate::resilience::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("closed"),
            CircuitState::Open => f.write_str("open"),
            CircuitState::HalfOpen => f.write_str("half_open"),
        }
    }
}

/// Point-in-time view of a breaker, for listing and tests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub service: ServiceType,
    pub instance_id: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
}

/// Outcome of [`CircuitBreaker::try_admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Rejected,
    Allowed,
    /// Admitted as a half-open probe; holds one permit of the probe budget.
    Probe,
}

#[derive(Debug)]
struct Inner {
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    half_open_admitted: u32,
    half_open_since: Option<Instant>,
    last_failure: Option<Instant>,
    /// Recent outcomes for the failure-rate trip (`true` = failure).
    outcomes: VecDeque<(Instant, bool)>,
}

impl Inner {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            half_open_admitted: 0,
            half_open_since: None,
            last_failure: None,
            outcomes: VecDeque::new(),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    fn enter(&mut self, to: CircuitState, now: Instant) -> Option<(CircuitState, CircuitState)> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        self.half_open_successes = 0;
        self.half_open_admitted = 0;
        match to {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                self.half_open_since = None;
                self.outcomes.clear();
            }
            CircuitState::Open => {
                self.half_open_since = None;
                self.last_failure = Some(now);
            }
            CircuitState::HalfOpen => {
                self.consecutive_failures = 0;
                self.half_open_since = Some(now);
            }
        }
        Some((from, to))
    }

    fn record_outcome(&mut self, now: Instant, failed: bool) {
        let Some(rate) = &self.config.failure_rate else {
            return;
        };
        let window = Duration::from_millis(rate.window_ms);
        while let Some(&(at, _)) = self.outcomes.front() {
            if now.duration_since(at) > window {
                self.outcomes.pop_front();
            } else {
                break;
            }
        }
        self.outcomes.push_back((now, failed));
    }

    fn failure_rate_tripped(&self) -> bool {
        let Some(rate) = &self.config.failure_rate else {
            return false;
        };
        let total = self.outcomes.len();
        if total == 0 || total < rate.minimum_calls as usize {
            return false;
        }
        let failures = self.outcomes.iter().filter(|(_, failed)| *failed).count();
        failures as f64 / total as f64 >= rate.threshold
    }
}

/// Three-state breaker guarding one backend instance of one service.
#[derive(Debug)]
pub struct CircuitBreaker {
    service: ServiceType,
    instance_id: String,
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl CircuitBreaker {
    pub fn new(
        service: ServiceType,
        instance_id: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            service,
            instance_id: instance_id.into(),
            inner: Mutex::new(Inner::new(config)),
            clock,
            events,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.inner.lock().config.clone()
    }

    /// Admission check. May move Open → Half-Open and consumes a probe permit
    /// while Half-Open.
    pub fn can_execute(&self) -> bool {
        self.try_admit() != Admission::Rejected
    }

    /// Like [`can_execute`](Self::can_execute), but reports whether the call
    /// holds a half-open probe permit that must be returned with
    /// [`release_probe`](Self::release_probe) if the call is never sent.
    pub fn try_admit(&self) -> Admission {
        let now = self.clock.now();
        let (admission, transition) = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => (Admission::Allowed, None),
                CircuitState::Open => {
                    let elapsed = inner
                        .last_failure
                        .map(|at| now.saturating_duration_since(at))
                        .unwrap_or(Duration::MAX);
                    if elapsed >= inner.timeout() {
                        let transition = inner.enter(CircuitState::HalfOpen, now);
                        inner.half_open_admitted = 1;
                        (Admission::Probe, transition)
                    } else {
                        (Admission::Rejected, None)
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.half_open_admitted < inner.config.probe_budget() {
                        inner.half_open_admitted += 1;
                        (Admission::Probe, None)
                    } else {
                        let stalled = inner
                            .half_open_since
                            .map(|since| now.saturating_duration_since(since) >= inner.timeout())
                            .unwrap_or(true);
                        if stalled {
                            tracing::debug!(
                                service = %self.service,
                                instance = %self.instance_id,
                                "Half-open probes unreported, refreshing probe window"
                            );
                            inner.half_open_since = Some(now);
                            inner.half_open_admitted = 1;
                            (Admission::Probe, None)
                        } else {
                            (Admission::Rejected, None)
                        }
                    }
                }
            }
        };
        self.emit(transition, "timeout elapsed");
        admission
    }

    /// Return a probe permit taken by [`try_admit`](Self::try_admit) for a
    /// call that was not sent. No effect outside Half-Open.
    pub fn release_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.half_open_admitted > 0 {
            inner.half_open_admitted -= 1;
            tracing::debug!(
                service = %self.service,
                instance = %self.instance_id,
                admitted = inner.half_open_admitted,
                "Probe permit released"
            );
        }
    }

    pub fn on_success(&self) {
        let now = self.clock.now();
        let transition = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => {
                    inner.consecutive_failures = 0;
                    inner.record_outcome(now, false);
                    None
                }
                CircuitState::Open => None,
                CircuitState::HalfOpen => {
                    inner.half_open_successes += 1;
                    inner.half_open_admitted = inner.half_open_admitted.saturating_sub(1);
                    if inner.half_open_successes >= inner.config.success_threshold {
                        inner.enter(CircuitState::Closed, now)
                    } else {
                        None
                    }
                }
            }
        };
        self.emit(transition, "probes succeeded");
    }

    pub fn on_failure(&self) {
        let now = self.clock.now();
        let (transition, reason) = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => {
                    inner.consecutive_failures += 1;
                    inner.last_failure = Some(now);
                    inner.record_outcome(now, true);
                    if inner.consecutive_failures >= inner.config.failure_threshold {
                        (inner.enter(CircuitState::Open, now), "failure threshold reached")
                    } else if inner.failure_rate_tripped() {
                        (inner.enter(CircuitState::Open, now), "failure rate exceeded")
                    } else {
                        tracing::debug!(
                            service = %self.service,
                            instance = %self.instance_id,
                            failures = inner.consecutive_failures,
                            threshold = inner.config.failure_threshold,
                            "Failure recorded"
                        );
                        (None, "")
                    }
                }
                CircuitState::Open => {
                    // Late failure from a call admitted before opening.
                    inner.last_failure = Some(now);
                    (None, "")
                }
                CircuitState::HalfOpen => (inner.enter(CircuitState::Open, now), "probe failed"),
            }
        };
        self.emit(transition, reason);
    }

    /// Force the breaker open, as if the failure threshold had just been reached.
    pub fn force_open(&self) {
        let now = self.clock.now();
        let transition = {
            let mut inner = self.inner.lock();
            let transition = inner.enter(CircuitState::Open, now);
            inner.last_failure = Some(now);
            transition
        };
        self.emit(transition, "forced open");
    }

    /// Force the breaker closed and clear its counters.
    pub fn force_close(&self) {
        let now = self.clock.now();
        let transition = {
            let mut inner = self.inner.lock();
            let transition = inner.enter(CircuitState::Closed, now);
            inner.consecutive_failures = 0;
            inner.last_failure = None;
            transition
        };
        self.emit(transition, "forced closed");
    }

    /// Replace thresholds in place, keeping the current state and counters.
    pub fn reconfigure(&self, config: CircuitBreakerConfig) {
        let mut inner = self.inner.lock();
        if inner.config != config {
            tracing::debug!(
                service = %self.service,
                instance = %self.instance_id,
                "Circuit breaker reconfigured"
            );
            if config.failure_rate.is_none() {
                inner.outcomes.clear();
            }
            inner.config = config;
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            service: self.service,
            instance_id: self.instance_id.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            half_open_successes: inner.half_open_successes,
        }
    }

    fn emit(&self, transition: Option<(CircuitState, CircuitState)>, reason: &str) {
        if let Some((from, to)) = transition {
            tracing::info!(
                service = %self.service,
                instance = %self.instance_id,
                from = %from,
                to = %to,
                reason,
                "Circuit breaker state changed"
            );
            self.events
                .on_circuit_transition(self.service, &self.instance_id, from, to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::FailureRateConfig;
    use crate::observability::events::NoopSink;
    use crate::resilience::clock::ManualClock;

    fn breaker(config: CircuitBreakerConfig) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cb = CircuitBreaker::new(
            ServiceType::Chat,
            "m@http://a",
            config,
            clock.clone(),
            Arc::new(NoopSink),
        );
        (cb, clock)
    }

    fn config(failure_threshold: u32, timeout_ms: u64, success_threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            timeout_ms,
            success_threshold,
            ..Default::default()
        }
    }

    #[test]
    fn test_opens_after_threshold_and_waits_for_timeout() {
        let (cb, clock) = breaker(config(3, 1000, 2));

        cb.on_failure();
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());

        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());

        clock.advance(Duration::from_millis(999));
        assert!(!cb.can_execute());
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(Duration::from_millis(1));
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_success_in_closed_resets_consecutive_failures() {
        let (cb, _) = breaker(config(3, 1000, 2));
        cb.on_failure();
        cb.on_failure();
        cb.on_success();
        cb.on_failure();
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 2);
    }

    #[test]
    fn test_half_open_failure_reopens_regardless_of_successes() {
        let (cb, clock) = breaker(config(1, 500, 3));
        cb.on_failure();
        clock.advance(Duration::from_millis(500));
        assert!(cb.can_execute());

        cb.on_success();
        cb.on_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());

        // New failure timestamp: a fresh full timeout is required.
        clock.advance(Duration::from_millis(499));
        assert!(!cb.can_execute());
        clock.advance(Duration::from_millis(1));
        assert!(cb.can_execute());
    }

    #[test]
    fn test_half_open_closes_after_success_threshold() {
        let (cb, clock) = breaker(config(1, 100, 2));
        cb.on_failure();
        clock.advance(Duration::from_millis(100));
        assert!(cb.can_execute());
        assert!(cb.can_execute());

        cb.on_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.on_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_probe_budget_is_bounded() {
        let (cb, clock) = breaker(CircuitBreakerConfig {
            half_open_max_calls: Some(1),
            ..config(1, 100, 2)
        });
        cb.on_failure();
        clock.advance(Duration::from_millis(100));

        assert!(cb.can_execute());
        assert!(!cb.can_execute());
        assert!(!cb.can_execute());

        // A reported success frees the permit.
        cb.on_success();
        assert!(cb.can_execute());
    }

    #[test]
    fn test_released_probe_permit_can_be_reused() {
        let (cb, clock) = breaker(CircuitBreakerConfig {
            half_open_max_calls: Some(1),
            ..config(1, 100, 1)
        });
        assert_eq!(cb.try_admit(), Admission::Allowed);
        cb.on_failure();
        clock.advance(Duration::from_millis(100));

        assert_eq!(cb.try_admit(), Admission::Probe);
        assert_eq!(cb.try_admit(), Admission::Rejected);

        cb.release_probe();
        assert_eq!(cb.try_admit(), Admission::Probe);
        cb.on_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_release_probe_outside_half_open_is_ignored() {
        let (cb, clock) = breaker(CircuitBreakerConfig {
            half_open_max_calls: Some(1),
            ..config(1, 100, 2)
        });
        cb.release_probe();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.on_failure();
        cb.release_probe();
        clock.advance(Duration::from_millis(100));

        // Extra releases never raise the budget above its limit.
        assert_eq!(cb.try_admit(), Admission::Probe);
        cb.release_probe();
        cb.release_probe();
        assert_eq!(cb.try_admit(), Admission::Probe);
        assert_eq!(cb.try_admit(), Admission::Rejected);
    }

    #[test]
    fn test_stalled_probe_window_is_refreshed() {
        let (cb, clock) = breaker(CircuitBreakerConfig {
            half_open_max_calls: Some(1),
            ..config(1, 100, 1)
        });
        cb.on_failure();
        clock.advance(Duration::from_millis(100));
        assert!(cb.can_execute());
        assert!(!cb.can_execute());

        clock.advance(Duration::from_millis(100));
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_concurrent_half_open_admissions_respect_budget() {
        let clock = Arc::new(ManualClock::new());
        let cb = Arc::new(CircuitBreaker::new(
            ServiceType::Chat,
            "m@http://a",
            CircuitBreakerConfig {
                half_open_max_calls: Some(2),
                ..config(1, 100, 2)
            },
            clock.clone(),
            Arc::new(NoopSink),
        ));
        cb.on_failure();
        clock.advance(Duration::from_millis(100));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = cb.clone();
                std::thread::spawn(move || (0..50).filter(|_| cb.can_execute()).count())
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 2);
    }

    #[test]
    fn test_failure_rate_trip() {
        let (cb, _) = breaker(CircuitBreakerConfig {
            failure_threshold: 100,
            failure_rate: Some(FailureRateConfig {
                threshold: 0.5,
                minimum_calls: 4,
                window_ms: 10_000,
            }),
            ..Default::default()
        });

        cb.on_success();
        cb.on_failure();
        cb.on_success();
        assert_eq!(cb.state(), CircuitState::Closed);

        // 2 failures out of 4 calls.
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_force_open_and_close() {
        let (cb, _) = breaker(CircuitBreakerConfig::default());
        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());

        cb.force_close();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
    }

    #[test]
    fn test_reconfigure_keeps_state() {
        let (cb, _) = breaker(config(2, 1000, 1));
        cb.on_failure();
        cb.reconfigure(config(1, 1000, 1));
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
