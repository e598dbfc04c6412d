//! Timeout, retry and circuit breaking for backend calls.
//!
//! [`Resilience::call`] is the single wrapper every collaborator call goes
//! through. It owns one [`CircuitBreaker`] per backend and applies the
//! backend's [`ResiliencePolicy`]:
//!
//! 1. Refuse immediately while the circuit is open.
//! 2. Run the call under the policy timeout; a timeout counts as transient.
//! 3. Transient failures count toward the breaker and are retried with
//!    exponential backoff up to `max_retries` times.
//! 4. Rejected (permanent) failures return at once and do not count.
//! 5. Cancellation is observed before each attempt, during the call, and
//!    during backoff.

pub mod circuit;

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use docgraph_core::error::{short_reason, BackendError, RagError};

use crate::config::ResiliencePolicyConfig;

pub use circuit::{CircuitBreaker, CircuitOpen, CircuitState};

#[derive(Debug, Clone, PartialEq)]
pub struct ResiliencePolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl From<&ResiliencePolicyConfig> for ResiliencePolicy {
    fn from(config: &ResiliencePolicyConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            failure_threshold: config.failure_threshold,
            cooldown: config.cooldown(),
        }
    }
}

impl Default for ResiliencePolicy {
    fn default() -> Self {
        Self::from(&ResiliencePolicyConfig::default())
    }
}

impl ResiliencePolicy {
    /// Delay before retry number `retry` (1-based): `base × 2^(retry-1)`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_max)
    }
}

/// Why a guarded call did not produce a value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    /// The backend refused the request; retrying will not help.
    #[error("rejected: {0}")]
    Rejected(String),
    /// Circuit open, or the retry budget ran out on transient failures.
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("cancelled")]
    Cancelled,
}

impl CallError {
    /// Map to the caller-facing error, using `rejected` for permanent failures.
    pub fn into_rag_error(self, backend: &str, rejected: fn(String) -> RagError) -> RagError {
        match self {
            CallError::Rejected(reason) => rejected(reason),
            CallError::Unavailable(reason) => RagError::BackendUnavailable {
                backend: backend.to_string(),
                reason,
            },
            CallError::Cancelled => RagError::OperationCancelled,
        }
    }
}

/// Policy plus breaker for one backend.
#[derive(Debug)]
pub struct Resilience {
    backend: String,
    policy: ResiliencePolicy,
    breaker: CircuitBreaker,
}

impl Resilience {
    pub fn new(backend: impl Into<String>, policy: ResiliencePolicy) -> Self {
        let breaker = CircuitBreaker::new(policy.failure_threshold, policy.cooldown);
        Self {
            backend: backend.into(),
            policy,
            breaker,
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn policy(&self) -> &ResiliencePolicy {
        &self.policy
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run `op` under the policy. `op` is invoked once per attempt.
    pub async fn call<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut retry = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(CallError::Cancelled);
            }
            if let Err(open) = self.breaker.try_acquire() {
                tracing::debug!(
                    backend = %self.backend,
                    retry_after_ms = open.retry_after.as_millis() as u64,
                    "circuit open, call refused"
                );
                return Err(CallError::Unavailable("circuit open".to_string()));
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CallError::Cancelled),
                r = tokio::time::timeout(self.policy.timeout, op()) => r,
            };

            let err = match outcome {
                Ok(Ok(value)) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Ok(Err(e)) => e,
                Err(_) => BackendError::transient(format!(
                    "timed out after {} ms",
                    self.policy.timeout.as_millis()
                )),
            };

            if !err.is_transient() {
                // The backend answered, so it is reachable.
                self.breaker.record_success();
                tracing::debug!(backend = %self.backend, error = %err, "backend rejected call");
                return Err(CallError::Rejected(err.reason()));
            }

            let opened = self.breaker.record_failure();
            tracing::warn!(
                backend = %self.backend,
                attempt = retry + 1,
                opened_circuit = opened,
                error = %short_reason(&err.to_string()),
                "transient backend failure"
            );

            if opened || retry >= self.policy.max_retries {
                return Err(CallError::Unavailable(err.reason()));
            }

            retry += 1;
            let delay = self.policy.backoff(retry);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CallError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// One [`Resilience`] per collaborator.
#[derive(Debug)]
pub struct ResilienceSet {
    pub embedding: Resilience,
    pub vector: Resilience,
    pub graph: Resilience,
    pub generation: Resilience,
}

impl ResilienceSet {
    pub fn from_config(config: &crate::config::ResilienceConfig) -> Self {
        Self {
            embedding: Resilience::new("embedding", (&config.embedding).into()),
            vector: Resilience::new("vector", (&config.vector).into()),
            graph: Resilience::new("graph", (&config.graph).into()),
            generation: Resilience::new("generation", (&config.generation).into()),
        }
    }
}

impl Default for ResilienceSet {
    fn default() -> Self {
        Self::from_config(&crate::config::ResilienceConfig::default())
    }
}
