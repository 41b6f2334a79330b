//! Three-state circuit breaker guarding a single external collaborator
//! (spec §4.10, §9 "Circuit breaker"). There is no ready-made breaker crate
//! in the corpus, so this is hand-rolled in the corpus's general idiom:
//! small, typed, `parking_lot`-guarded state with unit tests covering every
//! transition.

use std::time::{Duration, Instant};

use cascade_core::Service;
use parking_lot::Mutex;

/// Observable state of a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls are allowed; failures accumulate toward `failure_threshold`.
    Closed,
    /// The cool-down elapsed; exactly one probe call is allowed through.
    HalfOpen,
    /// Calls are rejected immediately until `cool_down` has elapsed.
    Open,
}

/// Tuning for a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (in `Closed`) before the breaker opens.
    pub failure_threshold: u32,
    /// Consecutive successes (in `HalfOpen`) before the breaker closes.
    pub success_threshold: u32,
    /// How long the breaker stays `Open` before allowing a probe call.
    pub cool_down: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            cool_down: Duration::from_secs(30),
        }
    }
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    /// Set once a `HalfOpen` probe has been handed out, so concurrent
    /// callers don't all get treated as the probe.
    probe_in_flight: bool,
}

/// Guards one external collaborator (extractor, embedder, or vector sink)
/// with the standard closed/half-open/open state machine.
pub struct CircuitBreaker {
    service: Service,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Builds a breaker in the `Closed` state for `service`.
    #[must_use]
    pub fn new(service: Service, config: CircuitBreakerConfig) -> Self {
        Self {
            service,
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// The collaborator this breaker guards.
    #[must_use]
    pub fn service(&self) -> Service {
        self.service
    }

    /// Current externally-observable state, resolving an elapsed cool-down
    /// into `HalfOpen` as a side effect (mirrors the lazy-timeout pattern:
    /// there is no background timer, state is recomputed on access).
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.maybe_expire_cool_down(&mut inner);
        inner.state
    }

    fn maybe_expire_cool_down(&self, inner: &mut Inner) {
        if inner.state == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.cool_down {
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_successes = 0;
                    inner.probe_in_flight = false;
                }
            }
        }
    }

    /// Whether a call should be allowed through right now. In `HalfOpen`,
    /// only the first caller after the cool-down gets `true`; concurrent
    /// callers are rejected until that probe resolves (success or failure).
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        self.maybe_expire_cool_down(&mut inner);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
            CircuitState::Open => false,
        }
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        match inner.state {
            CircuitState::Closed => {}
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    tracing::info!(service = %self.service, "circuit breaker closed");
                    inner.state = CircuitState::Closed;
                    inner.consecutive_successes = 0;
                    inner.probe_in_flight = false;
                } else {
                    inner.probe_in_flight = false;
                }
            }
            CircuitState::Open => {}
        }
        metrics::counter!("cascade_circuit_breaker_success_total", "service" => self.service.to_string()).increment(1);
    }

    /// Records a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_successes = 0;
        inner.consecutive_failures += 1;
        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.open(&mut inner);
                }
            }
            CircuitState::HalfOpen => self.open(&mut inner),
            CircuitState::Open => {}
        }
        metrics::counter!("cascade_circuit_breaker_failure_total", "service" => self.service.to_string()).increment(1);
    }

    fn open(&self, inner: &mut Inner) {
        tracing::warn!(service = %self.service, "circuit breaker opened");
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.probe_in_flight = false;
        metrics::counter!("cascade_circuit_breaker_open_total", "service" => self.service.to_string()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, success_threshold: u32, cool_down: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            Service::Embedder,
            CircuitBreakerConfig { failure_threshold, success_threshold, cool_down },
        )
    }

    #[test]
    fn opens_after_failure_threshold() {
        let cb = breaker(3, 2, Duration::from_secs(30));
        for _ in 0..2 {
            cb.record_failure();
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.try_acquire());
    }

    #[test]
    fn half_open_allows_single_probe_then_closes_on_success_threshold() {
        let cb = breaker(1, 2, Duration::from_millis(0));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        assert!(cb.try_acquire());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.try_acquire(), "second concurrent caller must not also get the probe");

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_probe_failure_reopens() {
        let cb = breaker(1, 2, Duration::from_millis(0));
        cb.record_failure();
        assert!(cb.try_acquire());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn success_in_closed_resets_failure_count() {
        let cb = breaker(3, 2, Duration::from_secs(30));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
