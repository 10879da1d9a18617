//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (percentages, factors, durations > 0)
//! - Check addresses and provider URLs parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BridgeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use url::Url;

use crate::config::schema::{BridgeConfig, CredentialEntry, ProviderEndpoint, RoutingSettings};
use crate::credentials::AuthMethod;

/// Upper bound for retry and breaker backoff multipliers.
pub const MAX_BACKOFF_MULTIPLIER: f64 = 10.0;
/// Longest a breaker may stay open (one day).
pub const MAX_OPEN_TIMEOUT_MS: u64 = 86_400_000;

fn valid_multiplier(value: f64) -> bool {
    value.is_finite() && (1.0..=MAX_BACKOFF_MULTIPLIER).contains(&value)
}

/// A single semantic violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field (e.g. `retry.max_attempts`).
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate the whole configuration.
pub fn validate_config(config: &BridgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.request_timeout_secs", "must be greater than 0"));
    }

    errors.extend(validate_routing(&config.routing));

    let retry = &config.retry;
    if retry.max_attempts == 0 {
        errors.push(ValidationError::new("retry.max_attempts", "must be at least 1"));
    }
    if retry.initial_delay_ms > retry.max_delay_ms {
        errors.push(ValidationError::new(
            "retry.initial_delay_ms",
            "must not exceed retry.max_delay_ms",
        ));
    }
    if !valid_multiplier(retry.backoff_multiplier) {
        errors.push(ValidationError::new("retry.backoff_multiplier", "must be within [1, 10]"));
    }
    if !(0.0..=1.0).contains(&retry.jitter_factor) {
        errors.push(ValidationError::new("retry.jitter_factor", "must be within [0, 1]"));
    }

    let cb = &config.circuit_breaker;
    if !(cb.failure_threshold > 0.0 && cb.failure_threshold <= 100.0) {
        errors.push(ValidationError::new(
            "circuit_breaker.failure_threshold",
            "must be within (0, 100]",
        ));
    }
    if cb.minimum_requests == 0 {
        errors.push(ValidationError::new("circuit_breaker.minimum_requests", "must be at least 1"));
    }
    if cb.window_size_ms == 0 {
        errors.push(ValidationError::new("circuit_breaker.window_size_ms", "must be greater than 0"));
    }
    if cb.open_timeout_ms == 0 {
        errors.push(ValidationError::new("circuit_breaker.open_timeout_ms", "must be greater than 0"));
    }
    if cb.max_open_timeout_ms < cb.open_timeout_ms {
        errors.push(ValidationError::new(
            "circuit_breaker.max_open_timeout_ms",
            "must be >= circuit_breaker.open_timeout_ms",
        ));
    }
    if cb.success_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.success_threshold", "must be at least 1"));
    }
    if cb.max_open_timeout_ms > MAX_OPEN_TIMEOUT_MS {
        errors.push(ValidationError::new(
            "circuit_breaker.max_open_timeout_ms",
            "must not exceed one day",
        ));
    }
    if !valid_multiplier(cb.backoff_multiplier) {
        errors.push(ValidationError::new(
            "circuit_breaker.backoff_multiplier",
            "must be within [1, 10]",
        ));
    }

    if config.token.ttl_seconds == 0 {
        errors.push(ValidationError::new("token.ttl_seconds", "must be greater than 0"));
    }
    if config.token.refresh_buffer_seconds >= config.token.ttl_seconds {
        errors.push(ValidationError::new(
            "token.refresh_buffer_seconds",
            "must be smaller than token.ttl_seconds",
        ));
    }

    if !config.token.token_path.starts_with('/') {
        errors.push(ValidationError::new("token.token_path", "must start with '/'"));
    }
    for (i, entry) in config.credentials.iter().enumerate() {
        errors.extend(validate_credentials(i, entry));
    }

    errors.extend(validate_endpoint("providers.legacy", &config.providers.legacy));
    errors.extend(validate_endpoint("providers.replacement", &config.providers.replacement));

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if config.admin.enabled && config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::new("admin.api_key", "must be set when admin is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate the hot-reloadable routing section on its own.
pub fn validate_routing(routing: &RoutingSettings) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if !(0.0..=100.0).contains(&routing.percentage) {
        errors.push(ValidationError::new("routing.percentage", "must be within [0, 100]"));
    }
    if routing.ignore_fields.iter().any(|f| f.trim().is_empty()) {
        errors.push(ValidationError::new("routing.ignore_fields", "must not contain empty names"));
    }
    errors
}

fn validate_endpoint(prefix: &str, endpoint: &ProviderEndpoint) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    match Url::parse(&endpoint.base_url) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(url) => errors.push(ValidationError::new(
            format!("{}.base_url", prefix),
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new(
            format!("{}.base_url", prefix),
            format!("'{}' is not a valid URL: {}", endpoint.base_url, e),
        )),
    }
    if endpoint.timeout_ms == 0 {
        errors.push(ValidationError::new(
            format!("{}.timeout_ms", prefix),
            "must be greater than 0",
        ));
    }
    errors
}

fn validate_credentials(index: usize, entry: &CredentialEntry) -> Vec<ValidationError> {
    let field = |name: &str| format!("credentials[{}].{}", index, name);
    let mut errors = Vec::new();
    if entry.member_id.is_empty() || entry.branch_id.is_empty() {
        errors.push(ValidationError::new(field("member_id"), "member_id and branch_id are required"));
    }
    match entry.auth_method {
        AuthMethod::ApiKey if entry.api_key.as_deref().unwrap_or("").is_empty() => {
            errors.push(ValidationError::new(field("api_key"), "required for api_key auth"));
        }
        AuthMethod::ClientCredentials => {
            if entry.client_id.is_empty() || entry.client_secret.is_empty() {
                errors.push(ValidationError::new(
                    field("client_id"),
                    "client_id and client_secret are required for client_credentials auth",
                ));
            }
            if Url::parse(&entry.base_url).is_err() {
                errors.push(ValidationError::new(field("base_url"), "must be a valid URL"));
            }
        }
        _ => {}
    }
    errors
}
