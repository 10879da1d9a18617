//! Errors returned to callers of the bridge.

use thiserror::Error;

use crate::provider::Provider;
use crate::resilience::circuit_breaker::CircuitOpenError;
use crate::resilience::classifier::{ClassifiedError, Severity};

/// Why a provider call did not produce a response.
#[derive(Debug, Clone, Error)]
pub enum ForwardError {
    /// The breaker for this tenant/provider rejected the call.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),
    /// The provider was called and failed.
    #[error(transparent)]
    Classified(#[from] ClassifiedError),
}

impl ForwardError {
    pub fn provider(&self) -> Option<Provider> {
        match self {
            ForwardError::CircuitOpen(e) => Some(e.provider),
            ForwardError::Classified(e) => e.provider,
        }
    }

    pub fn retryable(&self) -> bool {
        match self {
            ForwardError::CircuitOpen(_) => true,
            ForwardError::Classified(e) => e.retryable,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ForwardError::CircuitOpen(_) => None,
            ForwardError::Classified(e) => e.status_code,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ForwardError::CircuitOpen(_))
    }

    /// Collapse into the stable error shape exposed to clients.
    pub fn to_classified(&self) -> ClassifiedError {
        match self {
            ForwardError::CircuitOpen(e) => {
                let retry_in = e.retry_in();
                let mut err = ClassifiedError::transient(e.to_string())
                    .with_provider(e.provider)
                    .with_severity(Severity::High);
                let secs = retry_in.as_secs() + u64::from(retry_in.subsec_nanos() > 0);
                err.retry_after_secs = Some(secs);
                err
            }
            ForwardError::Classified(e) => e.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_circuit_open_collapses_to_transient() {
        let err = ForwardError::from(CircuitOpenError {
            provider: Provider::Replacement,
            organization_id: Some("acme".into()),
            next_attempt_at: Instant::now() + Duration::from_millis(1500),
        });
        assert!(err.is_circuit_open());
        let classified = err.to_classified();
        assert!(classified.retryable);
        assert_eq!(classified.retry_after_secs, Some(2));
        assert_eq!(classified.provider, Some(Provider::Replacement));
        assert!(classified.message.contains("acme:replacement"));
    }
}
