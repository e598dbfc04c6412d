//! Consecutive-failure circuit breaker.
//!
//! ```text
//! Closed --(failure_threshold consecutive failures)--> Open
//! Open   --(cooldown elapsed, one caller admitted)---> HalfOpen
//! HalfOpen --(probe succeeds)--> Closed
//! HalfOpen --(probe fails)-----> Open
//! ```
//!
//! While half-open only one probe call is admitted. A probe that never
//! reports back (its future was dropped) stops blocking others once another
//! cooldown has passed.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open { since: Instant },
    HalfOpen { probe_started: Instant },
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
}

/// Shared per-backend breaker. All transitions happen under one lock.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

/// Returned when the breaker refuses a call.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("circuit open, retry after {retry_after:?}")]
pub struct CircuitOpen {
    pub retry_after: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admit or refuse one call.
    pub fn try_acquire(&self) -> Result<(), CircuitOpen> {
        let mut inner = self.lock();
        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open { since } | CircuitState::HalfOpen { probe_started: since } => {
                let elapsed = now.saturating_duration_since(since);
                if elapsed >= self.cooldown {
                    inner.state = CircuitState::HalfOpen { probe_started: now };
                    Ok(())
                } else {
                    Err(CircuitOpen {
                        retry_after: self.cooldown - elapsed,
                    })
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        inner.state = CircuitState::Closed;
    }

    /// Returns `true` if this failure opened the circuit.
    pub fn record_failure(&self) -> bool {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        let trip = matches!(inner.state, CircuitState::HalfOpen { .. })
            || (matches!(inner.state, CircuitState::Closed)
                && inner.consecutive_failures >= self.failure_threshold);
        if trip {
            inner.state = CircuitState::Open {
                since: Instant::now(),
            };
        }
        trip
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state(), CircuitState::Open { .. })
    }
}
