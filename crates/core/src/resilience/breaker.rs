use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Proceed,
    FailFast,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, reset_timeout: Duration::from_secs(60) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub last_transition_at: DateTime<Utc>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    last_transition_at: DateTime<Utc>,
}

/// Failure-tracking gate for one logical service.
///
/// Every operation takes the entry lock for a handful of field updates and
/// never awaits while holding it, so `allow()` stays O(1) and non-blocking in
/// practice.
#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            service: service.into(),
            config: BreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                reset_timeout: config.reset_timeout,
            },
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
                last_transition_at: Utc::now(),
            }),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn allow(&self) -> Admission {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Admission::Proceed,
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .map(|opened_at| Instant::now() >= opened_at + self.config.reset_timeout)
                    .unwrap_or(true);
                if !cooled_down {
                    return Admission::FailFast;
                }
                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.probe_in_flight = true;
                Admission::Proceed
            }
            CircuitState::HalfOpen if inner.probe_in_flight => Admission::FailFast,
            CircuitState::HalfOpen => {
                inner.probe_in_flight = true;
                Admission::Proceed
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
            inner.opened_at = None;
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        match inner.state {
            CircuitState::HalfOpen => self.open(&mut inner),
            CircuitState::Closed if inner.consecutive_failures >= self.config.failure_threshold => {
                self.open(&mut inner)
            }
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    /// Releases a probe slot whose attempt was dropped before it settled.
    pub(crate) fn abandon_attempt(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen && inner.probe_in_flight {
            self.open(&mut inner);
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: self.config.failure_threshold,
            last_transition_at: inner.last_transition_at,
        }
    }

    fn open(&self, inner: &mut BreakerInner) {
        inner.probe_in_flight = false;
        inner.opened_at = Some(Instant::now());
        self.transition(inner, CircuitState::Open);
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.last_transition_at = Utc::now();

        if to == CircuitState::Open {
            warn!(
                event_name = "resilience.breaker.opened",
                service = %self.service,
                from = ?from,
                consecutive_failures = inner.consecutive_failures,
                failure_threshold = self.config.failure_threshold,
                reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                "circuit breaker opened"
            );
        } else {
            info!(
                event_name = "resilience.breaker.transition",
                service = %self.service,
                from = ?from,
                to = ?to,
                "circuit breaker state changed"
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{Admission, BreakerConfig, CircuitBreaker, CircuitState};

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "composio",
            BreakerConfig { failure_threshold: threshold, reset_timeout: Duration::from_secs(30) },
        )
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = breaker(3);
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.allow(), Admission::FailFast);
    }

    #[test]
    fn success_resets_consecutive_failure_count() {
        let breaker = breaker(3);
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fails_fast_until_reset_timeout_then_admits_one_probe() {
        let breaker = breaker(1);
        breaker.record_failure();

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(breaker.allow(), Admission::FailFast);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(breaker.allow(), Admission::Proceed);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.allow(), Admission::FailFast);
        assert_eq!(breaker.allow(), Admission::FailFast);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_success_closes_and_probe_failure_reopens() {
        let breaker = breaker(1);
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(breaker.allow(), Admission::Proceed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.allow(), Admission::FailFast, "reopen refreshes openedAt");

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(breaker.allow(), Admission::Proceed);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.allow(), Admission::Proceed);
    }

    #[test]
    fn concurrent_callers_share_a_single_probe_slot() {
        let breaker = Arc::new(CircuitBreaker::new(
            "composio",
            BreakerConfig { failure_threshold: 1, reset_timeout: Duration::ZERO },
        ));
        breaker.record_failure();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let breaker = breaker.clone();
            handles.push(std::thread::spawn(move || breaker.allow()));
        }
        let admitted = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .filter(|admission| *admission == Admission::Proceed)
            .count();

        assert_eq!(admitted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_probe_reopens_instead_of_leaking_the_slot() {
        let breaker = breaker(1);
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(breaker.allow(), Admission::Proceed);
        breaker.abandon_attempt();
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(breaker.allow(), Admission::Proceed);
    }

    #[test]
    fn transitions_update_the_snapshot_timestamp() {
        let breaker = breaker(1);
        let before = breaker.snapshot().last_transition_at;
        breaker.record_failure();
        let snapshot = breaker.snapshot();

        assert_eq!(snapshot.state, CircuitState::Open);
        assert!(snapshot.last_transition_at >= before);
    }
}
