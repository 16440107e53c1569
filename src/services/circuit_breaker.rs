//! Circuit breaker guarding calls to an external dependency.
//!
//! - **Closed**: calls pass through, consecutive failures are counted
//! - **Open**: calls fail fast until the cool-down elapses
//! - **HalfOpen**: a limited number of trial calls decide whether to close again

use crate::metrics::{CIRCUIT_BREAKER_REJECTIONS, CIRCUIT_BREAKER_STATE};
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn gauge_value(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in CLOSED before opening
    pub failure_threshold: u32,
    /// Cool-down measured from the last failure before a trial call is allowed
    pub timeout: Duration,
    /// Trial calls allowed while HALF_OPEN
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_millis(60_000),
            half_open_max_calls: 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    #[error("circuit breaker is open")]
    Open,

    #[error("{0}")]
    Inner(E),
}

/// Point-in-time view of the breaker, used by health checks and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub half_open_calls: u32,
    pub last_failure_at: Option<Instant>,
}

#[derive(Debug)]
struct InternalState {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    half_open_calls: u32,
}

impl Default for InternalState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            half_open_calls: 0,
        }
    }
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    // Never held across an await
    state: Mutex<InternalState>,
}

/// Admission ticket for one call. A trial call dropped before it settles reopens the circuit.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Permit<'_> {
    fn settle(mut self, succeeded: bool) {
        self.settled = true;
        if succeeded {
            self.breaker.on_success();
        } else {
            self.breaker.on_failure();
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.abandon_trial();
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        CIRCUIT_BREAKER_STATE
            .with_label_values(&[name.as_str()])
            .set(CircuitState::Closed.gauge_value());

        Self {
            name,
            config,
            state: Mutex::new(InternalState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, InternalState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `operation` under breaker protection.
    ///
    /// Rejected calls never invoke `operation`.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire::<E>()?;

        match operation().await {
            Ok(value) => {
                permit.settle(true);
                Ok(value)
            }
            Err(e) => {
                permit.settle(false);
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    fn try_acquire<E>(&self) -> Result<Permit<'_>, CircuitBreakerError<E>> {
        let mut state = self.lock();

        if state.state == CircuitState::Open {
            let cooled_down = state
                .last_failure_at
                .map_or(true, |at| at.elapsed() >= self.config.timeout);
            if !cooled_down {
                return Err(self.reject());
            }
            self.transition(&mut state, CircuitState::HalfOpen);
        }

        let trial = state.state == CircuitState::HalfOpen;
        if trial {
            if state.half_open_calls >= self.config.half_open_max_calls {
                return Err(self.reject());
            }
            state.half_open_calls += 1;
        }

        Ok(Permit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn reject<E>(&self) -> CircuitBreakerError<E> {
        CIRCUIT_BREAKER_REJECTIONS
            .with_label_values(&[self.name.as_str()])
            .inc();
        tracing::debug!(service = %self.name, "Circuit breaker rejected call");
        CircuitBreakerError::Open
    }

    fn on_success(&self) {
        let mut state = self.lock();
        state.failure_count = 0;

        if state.state == CircuitState::HalfOpen {
            self.transition(&mut state, CircuitState::Closed);
        }
    }

    fn on_failure(&self) {
        let mut state = self.lock();
        state.failure_count = state.failure_count.saturating_add(1);
        state.last_failure_at = Some(Instant::now());

        let current = state.state;
        match current {
            CircuitState::HalfOpen => self.transition(&mut state, CircuitState::Open),
            CircuitState::Closed if state.failure_count >= self.config.failure_threshold => {
                self.transition(&mut state, CircuitState::Open)
            }
            _ => {}
        }
    }

    /// Reopens the circuit for a trial call dropped before it settled.
    fn abandon_trial(&self) {
        let mut state = self.lock();
        if state.state != CircuitState::HalfOpen {
            return;
        }

        tracing::warn!(service = %self.name, "Circuit breaker trial call cancelled before completion");
        state.last_failure_at = Some(Instant::now());
        self.transition(&mut state, CircuitState::Open);
    }

    fn transition(&self, state: &mut InternalState, to: CircuitState) {
        let previous = state.state;
        state.state = to;
        state.half_open_calls = 0;
        if to == CircuitState::Closed {
            state.failure_count = 0;
        }

        CIRCUIT_BREAKER_STATE
            .with_label_values(&[self.name.as_str()])
            .set(to.gauge_value());

        if to == CircuitState::Open {
            tracing::warn!(
                service = %self.name,
                previous_state = %previous,
                failure_count = state.failure_count,
                "Circuit breaker transitioned to OPEN"
            );
        } else {
            tracing::info!(
                service = %self.name,
                previous_state = %previous,
                "Circuit breaker transitioned to {}",
                to
            );
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub async fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub async fn snapshot(&self) -> CircuitSnapshot {
        let state = self.lock();
        CircuitSnapshot {
            state: state.state,
            failure_count: state.failure_count,
            half_open_calls: state.half_open_calls,
            last_failure_at: state.last_failure_at,
        }
    }

    /// Forces the breaker CLOSED with all counters zeroed.
    pub async fn reset(&self) {
        let mut state = self.lock();
        *state = InternalState::default();
        CIRCUIT_BREAKER_STATE
            .with_label_values(&[self.name.as_str()])
            .set(CircuitState::Closed.gauge_value());
        tracing::info!(service = %self.name, "Circuit breaker manually reset");
    }
}
