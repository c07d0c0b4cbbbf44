//! Circuit breaker shared by the registry's discovery backends and the
//! router's per-instance failure tracking.
//!
//! Semantics: `threshold` consecutive failures trip the breaker open; while
//! open all requests are rejected until `reset_timeout` has elapsed since the
//! last failure, after which a single half-open probe is admitted.  A probe
//! success closes the breaker, a probe failure re-opens it and restarts the
//! timer.  A success while closed decrements the failure count by one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    /// True while a half-open probe is in flight and undecided.
    probe_outstanding: bool,
    total_requests: u64,
    successful_requests: u64,
}

/// Point-in-time view of a breaker, for health/stats reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub last_failure_age_ms: Option<u64>,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
                probe_outstanding: false,
                total_requests: 0,
                successful_requests: 0,
            }),
        }
    }

    /// Whether a request may proceed right now.
    ///
    /// While open, flips to half-open (admitting exactly one probe) once
    /// `reset_timeout` has elapsed since the last failure.  While half-open
    /// with a probe already in flight, further requests are rejected.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.total_requests += 1;
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed > self.config.reset_timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_outstanding = true;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_outstanding {
                    false
                } else {
                    inner.probe_outstanding = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.successful_requests += 1;
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_sub(1);
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.consecutive_failures = 0;
                inner.probe_outstanding = false;
            }
            BreakerState::Open => {
                // Late success from a request admitted before the trip.
                inner.consecutive_failures = inner.consecutive_failures.saturating_sub(1);
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure_at = Some(Instant::now());
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                }
            }
            BreakerState::HalfOpen => {
                inner.consecutive_failures += 1;
                inner.state = BreakerState::Open;
                inner.probe_outstanding = false;
            }
            BreakerState::Open => {
                inner.consecutive_failures += 1;
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Non-mutating peek: would a request be admitted right now?  Unlike
    /// [`try_acquire`](Self::try_acquire) this neither counts the request
    /// nor claims the half-open probe.
    pub fn is_callable(&self) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => inner
                .last_failure_at
                .map(|t| t.elapsed() > self.config.reset_timeout)
                .unwrap_or(true),
            BreakerState::HalfOpen => !inner.probe_outstanding,
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_requests: inner.total_requests,
            successful_requests: inner.successful_requests,
            last_failure_age_ms: inner
                .last_failure_at
                .map(|t| t.elapsed().as_millis() as u64),
        }
    }
}

/// Keyed collection of breakers sharing one configuration.
///
/// Keys are discovery backend names ("gateway", "kubernetes") or instance
/// ids, depending on the owning subsystem.
pub struct BreakerMap {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerMap {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Get or create the breaker for a key.
    pub fn get(&self, key: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.clone())))
            .clone()
    }

    /// Snapshot every tracked breaker, keyed by name.
    pub fn snapshot_all(&self) -> HashMap<String, BreakerSnapshot> {
        self.breakers
            .lock()
            .iter()
            .map(|(k, b)| (k.clone(), b.snapshot()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, reset_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold: threshold,
            reset_timeout: Duration::from_millis(reset_ms),
        })
    }

    #[test]
    fn trips_open_after_threshold_failures() {
        let b = breaker(3, 60_000);
        assert_eq!(b.state(), BreakerState::Closed);
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed);
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.try_acquire());
    }

    #[test]
    fn success_in_closed_decrements_failures() {
        let b = breaker(3, 60_000);
        b.record_failure();
        b.record_failure();
        b.record_success();
        // Two failures minus one success leaves room for two more.
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed);
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[test]
    fn half_open_probe_after_reset_timeout() {
        let b = breaker(1, 10);
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.try_acquire());

        std::thread::sleep(Duration::from_millis(20));
        // First caller after the timeout gets the probe.
        assert!(b.try_acquire());
        assert_eq!(b.state(), BreakerState::HalfOpen);
        // Second caller is rejected while the probe is outstanding.
        assert!(!b.try_acquire());
    }

    #[test]
    fn probe_success_closes() {
        let b = breaker(1, 10);
        b.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(b.try_acquire());
        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.try_acquire());
    }

    #[test]
    fn probe_failure_reopens_and_restarts_timer() {
        let b = breaker(1, 50);
        b.record_failure();
        std::thread::sleep(Duration::from_millis(60));
        assert!(b.try_acquire());
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        // Timer restarted: still rejecting right away.
        assert!(!b.try_acquire());
    }

    #[test]
    fn snapshot_counts_requests() {
        let b = breaker(5, 60_000);
        assert!(b.try_acquire());
        b.record_success();
        assert!(b.try_acquire());
        b.record_failure();
        let snap = b.snapshot();
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.successful_requests, 1);
        assert_eq!(snap.consecutive_failures, 1);
    }

    #[test]
    fn map_returns_same_breaker_per_key() {
        let map = BreakerMap::new(BreakerConfig::default());
        let a = map.get("gateway");
        a.record_failure();
        let again = map.get("gateway");
        assert_eq!(again.snapshot().consecutive_failures, 1);
        let other = map.get("kubernetes");
        assert_eq!(other.snapshot().consecutive_failures, 0);
    }
}
