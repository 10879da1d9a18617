//! Retry logic.
//!
//! # Responsibilities
//! - Wrap one provider call in a bounded retry loop
//! - Route every attempt through the tenant's circuit breaker
//! - Classify failures and retry only the retryable ones
//! - Back off exponentially with jitter, honouring `Retry-After`
//!
//! # Design Decisions
//! - An open circuit aborts the loop at once: no sleep, no further attempts
//! - Attempts and sleeps are bounded by the request deadline
//! - An attempt cut short by the deadline leaves no breaker sample

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::config::RetrySettings;
use crate::error::ForwardError;
use crate::observability::metrics;
use crate::observability::telemetry::TelemetrySink;
use crate::provider::Provider;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::circuit_breaker::CallError;
use crate::resilience::classifier::{classify, ClassifiedError, RawFailure, Severity};
use crate::resilience::registry::CircuitBreakerRegistry;
use crate::resilience::timeouts::{self, Deadline};
use crate::rng::RandomSource;

/// Retry tuning.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total calls allowed, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Fraction of the delay used as a symmetric jitter band.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(s: &RetrySettings) -> Self {
        Self {
            max_attempts: s.max_attempts,
            initial_delay: Duration::from_millis(s.initial_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
            backoff_multiplier: s.backoff_multiplier,
            jitter_factor: s.jitter_factor,
        }
    }
}

/// Result of a retried call plus how many calls it took.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, ForwardError>,
    /// Calls actually made to the provider (rejections by an open circuit excluded).
    pub attempts: u32,
}

/// Executes provider calls with classification-driven retries.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    registry: Arc<CircuitBreakerRegistry>,
    rng: Arc<dyn RandomSource>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl RetryExecutor {
    pub fn new(
        policy: RetryPolicy,
        registry: Arc<CircuitBreakerRegistry>,
        rng: Arc<dyn RandomSource>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            policy,
            registry,
            rng,
            telemetry,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn registry(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.registry
    }

    /// Call `op` against `provider` until it succeeds, fails permanently,
    /// runs out of attempts, hits an open circuit, or crosses `deadline`.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        provider: Provider,
        organization_id: Option<&str>,
        deadline: Option<Deadline>,
        mut op: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RawFailure>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempts = 0u32;

        loop {
            if deadline.is_some_and(|d| d.has_elapsed()) {
                return self.deadline_exceeded(provider, attempts);
            }

            let call = self.registry.execute(provider, organization_id, || op());
            let Some(outcome) = timeouts::within(deadline, call).await else {
                return self.deadline_exceeded(provider, attempts + 1);
            };

            let raw = match outcome {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempts + 1,
                    };
                }
                Err(CallError::Open(open)) => {
                    tracing::debug!(
                        provider = %provider,
                        organization_id = ?organization_id,
                        attempts,
                        "Circuit open, abandoning retries"
                    );
                    return RetryOutcome {
                        result: Err(ForwardError::CircuitOpen(open)),
                        attempts,
                    };
                }
                Err(CallError::Failed(raw)) => raw,
            };

            attempts += 1;
            let err = classify(&raw, Some(provider));

            if !err.retryable {
                tracing::debug!(provider = %provider, kind = err.kind.name(), error = %err, "Non-retryable failure");
                return RetryOutcome {
                    result: Err(err.into()),
                    attempts,
                };
            }
            if attempts >= max_attempts {
                tracing::warn!(provider = %provider, attempts, error = %err, "Retry attempts exhausted");
                return RetryOutcome {
                    result: Err(err.into()),
                    attempts,
                };
            }

            let delay = err
                .retry_after()
                .unwrap_or_else(|| calculate_backoff(attempts - 1, &self.policy, self.rng.as_ref()));

            tracing::info!(
                provider = %provider,
                attempt = attempts,
                delay = ?delay,
                error = %err,
                "Retrying provider call"
            );
            metrics::record_retry(provider);
            self.telemetry.emit(
                "retry.scheduled",
                json!({
                    "provider": provider,
                    "organization_id": organization_id,
                    "attempt": attempts,
                    "delay_ms": delay.as_millis() as u64,
                    "error_kind": err.kind.name(),
                    "status_code": err.status_code,
                }),
            );

            if !timeouts::sleep_within(delay, deadline).await {
                tracing::warn!(provider = %provider, attempts, "Request deadline reached during backoff");
                return RetryOutcome {
                    result: Err(err.into()),
                    attempts,
                };
            }
        }
    }

    fn deadline_exceeded<T>(&self, provider: Provider, attempts: u32) -> RetryOutcome<T> {
        tracing::warn!(provider = %provider, attempts, "Request deadline exceeded");
        let err = ClassifiedError::transient(format!("request deadline exceeded calling {}", provider))
            .with_provider(provider)
            .with_severity(Severity::High);
        RetryOutcome {
            result: Err(err.into()),
            attempts,
        }
    }
}
