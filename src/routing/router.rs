//! Request routing across the legacy and replacement providers.
//!
//! # Responsibilities
//! - Pick the target provider(s) for each request from the live settings
//! - Run every provider call through the retry executor
//! - Fan out dual/shadow traffic and compare the results
//! - Fall back to the other provider once in single-target modes
//!
//! # Design Decisions
//! - Settings live behind an `ArcSwap`; reloads never block requests
//! - Multi-target modes start both calls concurrently and await both
//! - Fallback never recurses: the alternate provider's result is final

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwap;
use futures_util::future::join;
use serde_json::{json, Value};
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::RoutingSettings;
use crate::credentials::CredentialKey;
use crate::error::ForwardError;
use crate::observability::metrics;
use crate::observability::telemetry::TelemetrySink;
use crate::provider::{Provider, ProviderRequest, ProviderResponse, ProviderSet};
use crate::resilience::{Deadline, RetryExecutor};
use crate::rng::RandomSource;
use crate::routing::comparison::{compare, ComparisonResult};
use crate::routing::mode::{determine_routing, RoutingDecision, RoutingMode};

/// A client request before a provider has been chosen.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    /// Correlation ID carried into logs and telemetry.
    pub request_id: String,
    pub operation: String,
    pub organization_id: Option<String>,
    pub credentials: Option<CredentialKey>,
    pub payload: Value,
    /// Budget for the whole request, fallback included.
    pub deadline: Option<Deadline>,
}

impl ForwardRequest {
    pub fn new(operation: impl Into<String>, payload: Value) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            operation: operation.into(),
            organization_id: None,
            credentials: None,
            payload,
            deadline: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    pub fn with_credentials(mut self, key: CredentialKey) -> Self {
        self.credentials = Some(key);
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }

    fn to_provider_request(&self) -> ProviderRequest {
        ProviderRequest {
            operation: self.operation.clone(),
            organization_id: self.organization_id.clone(),
            credentials: self.credentials.clone(),
            payload: self.payload.clone(),
        }
    }
}

/// What one provider did with a request, retries included.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub provider: Provider,
    pub outcome: Result<ProviderResponse, ForwardError>,
    /// When the first attempt started.
    pub timestamp: SystemTime,
    /// Wall time across every attempt and backoff.
    pub duration: Duration,
    pub attempts: u32,
    /// Whether the final failure was classified retryable. False on success.
    pub retryable: bool,
    /// Set on the alternate provider's execution after a fallback.
    pub fallback: bool,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn status_code(&self) -> Option<u16> {
        match &self.outcome {
            Ok(response) => Some(response.status_code),
            Err(err) => err.status_code(),
        }
    }

    pub fn data(&self) -> Option<&Value> {
        self.outcome.as_ref().ok().map(|r| &r.data)
    }

    pub fn error(&self) -> Option<&ForwardError> {
        self.outcome.as_ref().err()
    }
}

/// The answer to a routed request.
#[derive(Debug, Clone)]
pub struct RoutingResult {
    pub mode: RoutingMode,
    /// Provider whose result is returned to the client.
    pub provider: Provider,
    pub response: ExecutionResult,
    /// Present in dual and shadow modes when comparison is enabled.
    pub comparison: Option<ComparisonResult>,
    /// The response came from the alternate provider after the primary failed.
    pub fallback: bool,
    /// The other provider's result in dual and shadow modes.
    pub shadow: Option<ExecutionResult>,
}

/// Routes requests according to the live routing settings.
pub struct Router {
    settings: ArcSwap<RoutingSettings>,
    providers: ProviderSet,
    retry: RetryExecutor,
    rng: Arc<dyn RandomSource>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl Router {
    pub fn new(
        settings: RoutingSettings,
        providers: ProviderSet,
        retry: RetryExecutor,
        rng: Arc<dyn RandomSource>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            settings: ArcSwap::from_pointee(settings),
            providers,
            retry,
            rng,
            telemetry,
        }
    }

    pub fn settings(&self) -> Arc<RoutingSettings> {
        self.settings.load_full()
    }

    /// Swap in new settings. Requests already routed keep the old ones.
    pub fn update_settings(&self, settings: RoutingSettings) {
        tracing::info!(
            mode = %settings.mode,
            percentage = settings.percentage,
            fallback_enabled = settings.fallback_enabled,
            comparison_enabled = settings.comparison_enabled,
            "Routing settings updated"
        );
        self.settings.store(Arc::new(settings));
    }

    pub async fn route(&self, request: &ForwardRequest) -> RoutingResult {
        let settings = self.settings.load_full();
        let decision = determine_routing(settings.mode, settings.percentage, self.rng.as_ref());

        tracing::debug!(
            request_id = %request.request_id,
            operation = %request.operation,
            organization_id = ?request.organization_id,
            mode = %decision.mode,
            provider = %decision.primary,
            secondary = ?decision.secondary,
            "Routing decision"
        );
        metrics::record_routing(decision.mode.as_str(), decision.primary);
        self.telemetry.emit(
            "routing.decision",
            json!({
                "request_id": request.request_id,
                "operation": request.operation,
                "organization_id": request.organization_id,
                "mode": decision.mode,
                "provider": decision.primary,
                "secondary": decision.secondary,
            }),
        );

        match decision.secondary {
            None => self.route_single(decision, request, &settings).await,
            Some(_) => self.route_multi(decision, request, &settings).await,
        }
    }

    async fn route_single(
        &self,
        decision: RoutingDecision,
        request: &ForwardRequest,
        settings: &RoutingSettings,
    ) -> RoutingResult {
        let primary = self.execute_on(decision.primary, request, false).await;
        let fallback_allowed = settings.fallback_enabled && decision.mode.is_single_target();

        let Some(err) = primary.error().filter(|_| fallback_allowed) else {
            return RoutingResult {
                mode: decision.mode,
                provider: decision.primary,
                response: primary,
                comparison: None,
                fallback: false,
                shadow: None,
            };
        };

        let alternate = decision.primary.alternate();
        tracing::warn!(
            request_id = %request.request_id,
            operation = %request.operation,
            from = %decision.primary,
            to = %alternate,
            error = %err,
            "Primary provider failed, falling back"
        );
        metrics::record_fallback(decision.primary, alternate);
        self.telemetry.emit(
            "routing.fallback",
            json!({
                "request_id": request.request_id,
                "operation": request.operation,
                "organization_id": request.organization_id,
                "from": decision.primary,
                "to": alternate,
                "error": err.to_string(),
                "circuit_open": err.is_circuit_open(),
            }),
        );

        let response = self.execute_on(alternate, request, true).await;
        RoutingResult {
            mode: decision.mode,
            provider: alternate,
            response,
            comparison: None,
            fallback: true,
            shadow: None,
        }
    }

    async fn route_multi(
        &self,
        decision: RoutingDecision,
        request: &ForwardRequest,
        settings: &RoutingSettings,
    ) -> RoutingResult {
        let (legacy, replacement) = join(
            self.execute_on(Provider::Legacy, request, false),
            self.execute_on(Provider::Replacement, request, false),
        )
        .await;

        let comparison = settings
            .comparison_enabled
            .then(|| compare(&legacy, &replacement, &settings.ignore_fields));

        if let Some(cmp) = &comparison {
            if cmp.divergent {
                tracing::warn!(
                    request_id = %request.request_id,
                    operation = %request.operation,
                    mode = %decision.mode,
                    legacy_success = cmp.legacy_success,
                    replacement_success = cmp.replacement_success,
                    "Providers diverged"
                );
                metrics::record_divergence(decision.mode.as_str());
            }
            self.telemetry.emit(
                "routing.comparison",
                json!({
                    "request_id": request.request_id,
                    "operation": request.operation,
                    "organization_id": request.organization_id,
                    "mode": decision.mode,
                    "comparison": cmp,
                }),
            );
        }

        let prefer_replacement = decision.mode == RoutingMode::Dual && replacement.success();
        let (response, shadow) = if prefer_replacement {
            (replacement, legacy)
        } else {
            (legacy, replacement)
        };

        RoutingResult {
            mode: decision.mode,
            provider: response.provider,
            response,
            comparison,
            fallback: false,
            shadow: Some(shadow),
        }
    }

    async fn execute_on(&self, provider: Provider, request: &ForwardRequest, fallback: bool) -> ExecutionResult {
        let executor = self.providers.get(provider);
        let provider_request = request.to_provider_request();
        let call = &provider_request;
        let timestamp = SystemTime::now();
        let started = Instant::now();

        let outcome = self
            .retry
            .execute_with_retry(
                provider,
                request.organization_id.as_deref(),
                request.deadline,
                move || executor.execute(call),
            )
            .await;

        let duration = started.elapsed();
        metrics::record_provider_call(provider, outcome.result.is_ok(), duration);

        let retryable = outcome
            .result
            .as_ref()
            .err()
            .is_some_and(ForwardError::retryable);

        ExecutionResult {
            provider,
            outcome: outcome.result,
            timestamp,
            duration,
            attempts: outcome.attempts,
            retryable,
            fallback,
        }
    }
}
