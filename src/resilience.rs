//! Resilience primitives (retry policy + circuit breaker) for reaching the store.
//!
//! Breaker states: `Closed → Open → HalfOpen → {Closed | Open}`. While open,
//! calls fail immediately with [`Error::CircuitOpen`]; once the cooldown has
//! elapsed a limited number of probe calls are let through.

use crate::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
            multiplier: 2.0,
        }
    }

    /// Retry immediately; for tests and in-memory stores
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 1.0,
        }
    }

    /// Backoff before retry number `attempt + 1`, clamped to `max_delay_ms`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        let clamped = base.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(clamped as u64)
    }

    /// Run `operation` until it succeeds, the attempt budget is spent, or the
    /// breaker refuses. Exhaustion surfaces as [`Error::Connection`].
    pub fn execute<T, F>(&self, breaker: &CircuitBreaker, what: &str, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            breaker.try_acquire()?;
            match operation(attempt) {
                Ok(value) => {
                    breaker.record_success();
                    return Ok(value);
                }
                Err(e) => {
                    breaker.record_failure();
                    tracing::warn!("{} failed (attempt {}/{}): {}", what, attempt + 1, attempts, e);
                    last_error = Some(e);
                    if attempt + 1 < attempts {
                        std::thread::sleep(self.delay_for_attempt(attempt));
                    }
                }
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt made".to_string());
        Err(Error::Connection(format!("{} failed after {} attempt(s): {}", what, attempts, reason)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Successful probes needed to close it again
    pub success_threshold: u32,
    /// Cooldown before probes are allowed
    pub open_duration_ms: u64,
    pub half_open_max_calls: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            open_duration_ms: 30_000,
            half_open_max_calls: 1,
        }
    }
}

/// Observable breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
enum CircuitState {
    Closed { failures: u32 },
    Open { until: Instant },
    HalfOpen { in_flight: u32, successes: u32 },
}

pub struct CircuitBreaker {
    state: Mutex<CircuitState>,
    config: CircuitConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            state: Mutex::new(CircuitState::Closed { failures: 0 }),
            config,
        }
    }

    pub fn state(&self) -> BreakerState {
        let mut state = self.state.lock();
        self.advance(&mut state);
        match *state {
            CircuitState::Closed { .. } => BreakerState::Closed,
            CircuitState::Open { .. } => BreakerState::Open,
            CircuitState::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    /// Move an expired open circuit to half-open
    fn advance(&self, state: &mut CircuitState) {
        if let CircuitState::Open { until } = *state {
            if Instant::now() >= until {
                tracing::info!("circuit breaker cooldown elapsed, allowing probe");
                *state = CircuitState::HalfOpen { in_flight: 0, successes: 0 };
            }
        }
    }

    /// Ask permission for one call
    pub fn try_acquire(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.advance(&mut state);
        match &mut *state {
            CircuitState::Closed { .. } => Ok(()),
            CircuitState::Open { until } => Err(Error::CircuitOpen {
                retry_after: until.saturating_duration_since(Instant::now()),
            }),
            CircuitState::HalfOpen { in_flight, .. } => {
                if *in_flight >= self.config.half_open_max_calls.max(1) {
                    Err(Error::CircuitOpen { retry_after: Duration::ZERO })
                } else {
                    *in_flight += 1;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        match &mut *state {
            CircuitState::Closed { failures } => *failures = 0,
            CircuitState::HalfOpen { in_flight, successes } => {
                *in_flight = in_flight.saturating_sub(1);
                *successes += 1;
                if *successes >= self.config.success_threshold.max(1) {
                    tracing::info!("circuit breaker closed after successful probe");
                    *state = CircuitState::Closed { failures: 0 };
                }
            }
            CircuitState::Open { .. } => {}
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        let open_until = Instant::now() + Duration::from_millis(self.config.open_duration_ms);
        match &mut *state {
            CircuitState::Closed { failures } => {
                *failures += 1;
                if *failures >= self.config.failure_threshold.max(1) {
                    tracing::warn!("circuit breaker opened after {} consecutive failures", failures);
                    *state = CircuitState::Open { until: open_until };
                }
            }
            CircuitState::HalfOpen { .. } => {
                tracing::warn!("circuit breaker probe failed, reopening");
                *state = CircuitState::Open { until: open_until };
            }
            CircuitState::Open { .. } => {}
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, open_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitConfig {
            failure_threshold: threshold,
            success_threshold: 1,
            open_duration_ms: open_ms,
            half_open_max_calls: 1,
        })
    }

    #[test]
    fn test_backoff_is_bounded() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(8), Duration::from_millis(1_000));
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = breaker(3, 60_000);
        for _ in 0..2 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), BreakerState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(matches!(cb.try_acquire(), Err(Error::CircuitOpen { .. })));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = breaker(2, 60_000);
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_probe_cycle() {
        let cb = breaker(1, 0);
        cb.record_failure();
        // zero cooldown: the next look moves straight to half-open
        assert_eq!(cb.state(), BreakerState::HalfOpen);

        cb.try_acquire().unwrap();
        assert!(cb.try_acquire().is_err(), "only one probe in flight");
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::HalfOpen);

        cb.try_acquire().unwrap();
        cb.record_success();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn test_execute_retries_then_succeeds() {
        let cb = breaker(10, 60_000);
        let mut calls = 0;
        let value = RetryPolicy::immediate(3)
            .execute(&cb, "connect", |attempt| {
                calls += 1;
                if attempt < 2 {
                    Err(Error::Connection("boom".into()))
                } else {
                    Ok(42)
                }
            })
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls, 3);
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn test_execute_gives_up() {
        let cb = breaker(10, 60_000);
        let err = RetryPolicy::immediate(2)
            .execute::<(), _>(&cb, "connect", |_| Err(Error::Connection("down".into())))
            .unwrap_err();
        assert!(matches!(err, Error::Connection(ref m) if m.contains("2 attempt")));
    }

    #[test]
    fn test_execute_short_circuits_when_open() {
        let cb = breaker(1, 60_000);
        let mut calls = 0;
        let err = RetryPolicy::immediate(5)
            .execute::<(), _>(&cb, "connect", |_| {
                calls += 1;
                Err(Error::Connection("down".into()))
            })
            .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, Error::CircuitOpen { .. }));
    }
}
