//! The bridge facade: one object owning every subsystem a request touches.
//!
//! # Data Flow
//! ```text
//! BridgeConfig
//!     → CircuitBreakerRegistry (+ transition channel → telemetry task)
//!     → RetryExecutor (policy, registry, rng, telemetry)
//!     → CredentialCache (source, authority)
//!     → HttpProviderExecutor × 2 (share the cache)
//!     → Router (settings, providers, retry executor)
//!
//! Bridge::execute(ForwardRequest)
//!     → default deadline from listener.request_timeout_secs
//!     → Router::route → RoutingResult
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use crate::config::{validate_routing, BridgeConfig, RoutingSettings, ValidationError};
use crate::credentials::{CredentialCache, StaticCredentialSource};
use crate::observability::telemetry::{TelemetrySink, TracingTelemetry};
use crate::provider::http::{HttpProviderExecutor, HttpTokenAuthority};
use crate::provider::{Provider, ProviderSet};
use crate::resilience::{
    BreakerSnapshot, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitTransition, ClassifiedError, Deadline,
    RetryExecutor, RetryPolicy,
};
use crate::rng::{RandomSource, ThreadRandom};
use crate::routing::{ForwardRequest, Router, RoutingResult};

/// Routes requests between the legacy and replacement providers.
pub struct Bridge {
    router: Router,
    registry: Arc<CircuitBreakerRegistry>,
    credentials: Option<Arc<CredentialCache>>,
    request_timeout: Duration,
}

impl Bridge {
    /// Wire the bridge around the given executors.
    ///
    /// When called inside a tokio runtime, breaker transitions are forwarded
    /// to `telemetry` as `circuit.transition` events.
    pub fn new(
        config: &BridgeConfig,
        providers: ProviderSet,
        rng: Arc<dyn RandomSource>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let mut registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::from(&config.circuit_breaker));
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let (tx, rx) = mpsc::unbounded_channel();
            handle.spawn(forward_transitions(rx, Arc::clone(&telemetry)));
            registry = registry.with_notifier(tx);
        }
        let registry = Arc::new(registry);

        let retry = RetryExecutor::new(
            RetryPolicy::from(&config.retry),
            Arc::clone(&registry),
            Arc::clone(&rng),
            Arc::clone(&telemetry),
        );
        let router = Router::new(config.routing.clone(), providers, retry, rng, telemetry);

        Self {
            router,
            registry,
            credentials: None,
            request_timeout: Duration::from_secs(config.listener.request_timeout_secs),
        }
    }

    /// Build the production bridge: HTTP executors, token authority and the
    /// statically configured credentials.
    pub fn from_config(config: &BridgeConfig) -> Result<Self, ClassifiedError> {
        let telemetry: Arc<dyn TelemetrySink> = Arc::new(TracingTelemetry);
        let http_error = |key: &str, e: reqwest::Error| {
            ClassifiedError::configuration(key, format!("failed to build HTTP client: {}", e))
        };

        let authority = HttpTokenAuthority::new(&config.token).map_err(|e| http_error("token", e))?;
        let cache = Arc::new(CredentialCache::new(
            Arc::new(StaticCredentialSource::from_entries(&config.credentials)),
            Arc::new(authority),
            Arc::clone(&telemetry),
            &config.token,
        ));

        let legacy = HttpProviderExecutor::new(Provider::Legacy, &config.providers.legacy)
            .map_err(|e| http_error("providers.legacy", e))?
            .with_credentials(Arc::clone(&cache));
        let replacement = HttpProviderExecutor::new(Provider::Replacement, &config.providers.replacement)
            .map_err(|e| http_error("providers.replacement", e))?
            .with_credentials(Arc::clone(&cache));

        let providers = ProviderSet::new(Arc::new(legacy), Arc::new(replacement));
        Ok(Self::new(config, providers, Arc::new(ThreadRandom), telemetry).with_credentials(cache))
    }

    pub fn with_credentials(mut self, cache: Arc<CredentialCache>) -> Self {
        self.credentials = Some(cache);
        self
    }

    /// Route one request. A request without a deadline gets the configured
    /// request timeout.
    pub async fn execute(&self, mut request: ForwardRequest) -> RoutingResult {
        if request.deadline.is_none() {
            request.deadline = Some(Deadline::after(self.request_timeout));
        }
        self.router.route(&request).await
    }

    /// Snapshot of every circuit breaker, sorted by key.
    pub fn stats(&self) -> Vec<BreakerSnapshot> {
        self.registry.stats()
    }

    pub fn routing(&self) -> Arc<RoutingSettings> {
        self.router.settings()
    }

    /// Validate and apply new routing settings.
    pub fn update_routing(&self, settings: RoutingSettings) -> Result<(), Vec<ValidationError>> {
        let errors = validate_routing(&settings);
        if !errors.is_empty() {
            return Err(errors);
        }
        self.router.update_settings(settings);
        Ok(())
    }

    pub fn registry(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.registry
    }

    pub fn credentials(&self) -> Option<&Arc<CredentialCache>> {
        self.credentials.as_ref()
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

async fn forward_transitions(
    mut rx: mpsc::UnboundedReceiver<CircuitTransition>,
    telemetry: Arc<dyn TelemetrySink>,
) {
    while let Some(transition) = rx.recv().await {
        let properties = serde_json::to_value(&transition).unwrap_or_else(|_| json!({ "key": transition.key }));
        telemetry.emit("circuit.transition", properties);
    }
}
