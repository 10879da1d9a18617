//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the bridge.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::credentials::AuthMethod;
use crate::routing::RoutingMode;

/// Root configuration for the provider bridge.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    /// Listener configuration (bind address, request budget).
    pub listener: ListenerConfig,

    /// How requests are split between the two providers.
    pub routing: RoutingSettings,

    /// Retry configuration.
    pub retry: RetrySettings,

    /// Circuit breaker configuration.
    pub circuit_breaker: CircuitBreakerSettings,

    /// Credential/token cache configuration.
    pub token: TokenSettings,

    /// Upstream provider endpoints.
    pub providers: ProvidersConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,

    /// Statically configured tenant credentials.
    pub credentials: Vec<CredentialEntry>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Total budget for one client request, retries and fallback included.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Routing configuration. Hot-reloadable.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingSettings {
    /// Routing mode.
    pub mode: RoutingMode,

    /// Share of traffic (0-100) sent to the replacement provider in percentage mode.
    pub percentage: f64,

    /// Retry on the other provider when a single-target call fails.
    pub fallback_enabled: bool,

    /// Compare results in dual and shadow modes.
    pub comparison_enabled: bool,

    /// Payload field names ignored, at any depth, when comparing results.
    pub ignore_fields: Vec<String>,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            mode: RoutingMode::SingleLegacy,
            percentage: 0.0,
            fallback_enabled: true,
            comparison_enabled: true,
            ignore_fields: Vec::new(),
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum number of calls per provider, the first included.
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u64,

    /// Maximum delay between attempts in milliseconds.
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,

    /// Symmetric jitter band as a fraction of the delay (0.0 - 1.0).
    pub jitter_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Failure rate percentage that opens the circuit.
    pub failure_threshold: f64,

    /// Minimum samples in the window before the circuit may open.
    pub minimum_requests: usize,

    /// Rolling window length in milliseconds.
    pub window_size_ms: u64,

    /// Initial open duration in milliseconds.
    pub open_timeout_ms: u64,

    /// Cap for the grown open duration in milliseconds.
    pub max_open_timeout_ms: u64,

    /// Consecutive half-open successes needed to close.
    pub success_threshold: u32,

    /// Growth factor applied to the open duration after a failed half-open trial.
    pub backoff_multiplier: f64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 50.0,
            minimum_requests: 10,
            window_size_ms: 60_000,
            open_timeout_ms: 30_000,
            max_open_timeout_ms: 300_000,
            success_threshold: 3,
            backoff_multiplier: 2.0,
        }
    }
}

/// Token cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenSettings {
    /// Lifetime assumed when the authority does not state one.
    pub ttl_seconds: u64,

    /// Refresh this many seconds before expiry.
    pub refresh_buffer_seconds: u64,

    /// Path of the token endpoint, relative to the credentials' base URL.
    pub token_path: String,

    /// Timeout for one token request in milliseconds.
    pub timeout_ms: u64,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            ttl_seconds: 3600,
            refresh_buffer_seconds: 300,
            token_path: "/oauth/token".to_string(),
            timeout_ms: 5_000,
        }
    }
}

/// Credentials for one (member, branch) pair.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CredentialEntry {
    pub member_id: String,
    pub branch_id: String,
    #[serde(default)]
    pub auth_method: AuthMethod,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Base URL of the token issuer.
    #[serde(default)]
    pub base_url: String,
}

/// Endpoints for both providers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub legacy: ProviderEndpoint,
    pub replacement: ProviderEndpoint,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            legacy: ProviderEndpoint {
                base_url: "http://localhost:9001".to_string(),
                ..ProviderEndpoint::default()
            },
            replacement: ProviderEndpoint {
                base_url: "http://localhost:9002".to_string(),
                ..ProviderEndpoint::default()
            },
        }
    }
}

/// A single upstream provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderEndpoint {
    /// Base URL operations are appended to.
    pub base_url: String,

    /// Per-call timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ProviderEndpoint {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_ms: 10_000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}
