//! Error classification.
//!
//! # Responsibilities
//! - Turn a raw provider failure into a `ClassifiedError`
//! - Decide retryability and severity in one place
//! - Extract `Retry-After` hints and validation details
//!
//! # Rule Order
//! ```text
//! 1. connection refused / timeout / reset  → Transient, retryable
//! 2. HTTP 429                              → Transient, retryable, retry_after
//! 3. HTTP 5xx                              → Transient, retryable
//! 4. HTTP 401 / 403                        → Permanent, critical
//! 5. HTTP 400 / 422                        → Permanent, validation details
//! 6. HTTP 404                              → Permanent
//! 7. anything else with a known provider   → Provider, retryable
//! 8. anything else                         → Transient, retryable
//! ```

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::provider::Provider;

/// How a connection-level failure manifested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionFailure {
    Refused,
    Timeout,
    Reset,
}

impl fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionFailure::Refused => f.write_str("refused"),
            ConnectionFailure::Timeout => f.write_str("timed out"),
            ConnectionFailure::Reset => f.write_str("reset"),
        }
    }
}

/// A failure exactly as an executor observed it.
#[derive(Debug, Clone)]
pub enum RawFailure {
    /// The request never produced an HTTP response.
    Connection {
        kind: ConnectionFailure,
        message: String,
    },
    /// The provider answered with a non-success status.
    Http {
        status: u16,
        retry_after: Option<String>,
        body: Option<Value>,
    },
    /// The provider answered successfully but reported a business failure.
    Provider {
        code: Option<String>,
        message: String,
        payload: Option<Value>,
    },
    /// The payload could not be mapped to or from the provider's format.
    Transformation(String),
    /// Classified further up (e.g. a failed credential refresh).
    Classified(ClassifiedError),
    Unknown(String),
}

impl From<reqwest::Error> for RawFailure {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ConnectionFailure::Timeout
        } else if err.is_connect() {
            ConnectionFailure::Refused
        } else if err.is_request() || err.is_body() {
            ConnectionFailure::Reset
        } else {
            return RawFailure::Unknown(err.to_string());
        };
        RawFailure::Connection {
            kind,
            message: err.to_string(),
        }
    }
}

impl From<ClassifiedError> for RawFailure {
    fn from(err: ClassifiedError) -> Self {
        RawFailure::Classified(err)
    }
}

/// Error taxonomy with a structured payload per kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network, 5xx, 429. Worth retrying.
    Transient,
    /// Auth, validation, not-found. Retrying cannot help.
    Permanent {
        #[serde(skip_serializing_if = "Vec::is_empty")]
        validation: Vec<String>,
    },
    /// Provider-specific business failure.
    Provider {
        code: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Payload mapping failure; detail owned by the transformer.
    Transformation { detail: String },
    /// Invalid routing/retry/breaker settings. Fatal at startup.
    Configuration { key: String },
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent { .. } => "permanent",
            ErrorKind::Provider { .. } => "provider",
            ErrorKind::Transformation { .. } => "transformation",
            ErrorKind::Configuration { .. } => "configuration",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A failure with a stable shape, whatever the provider's raw error looked like.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("{message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub retryable: bool,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub message: String,
}

impl ClassifiedError {
    fn new(kind: ErrorKind, retryable: bool, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            retryable,
            severity,
            retry_after_secs: None,
            provider: None,
            status_code: None,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, true, Severity::Medium, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Permanent { validation: Vec::new() },
            false,
            Severity::Medium,
            message,
        )
    }

    pub fn transformation(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self::new(
            ErrorKind::Transformation { detail: detail.clone() },
            false,
            Severity::High,
            format!("payload transformation failed: {}", detail),
        )
    }

    pub fn configuration(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Configuration { key: key.into() },
            false,
            Severity::Critical,
            message,
        )
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Explicit delay requested by the provider.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_secs.map(Duration::from_secs)
    }
}

/// Classify a raw failure. `provider` is the provider the call was made to, if known.
pub fn classify(raw: &RawFailure, provider: Option<Provider>) -> ClassifiedError {
    let label = provider.map(|p| p.as_str()).unwrap_or("upstream");

    let classified = match raw {
        RawFailure::Connection { kind, message } => ClassifiedError::transient(format!(
            "connection {} talking to {}: {}",
            kind, label, message
        ))
        .with_severity(Severity::High),

        RawFailure::Http { status: 429, retry_after, .. } => {
            let mut err = ClassifiedError::transient(format!("{} rate limited the request", label))
                .with_status(429)
                .with_severity(Severity::Low);
            err.retry_after_secs = retry_after.as_deref().and_then(parse_retry_after);
            err
        }

        RawFailure::Http { status, .. } if (500..600).contains(status) => {
            ClassifiedError::transient(format!("{} responded with HTTP {}", label, status))
                .with_status(*status)
                .with_severity(Severity::High)
        }

        RawFailure::Http { status: status @ (401 | 403), .. } => {
            ClassifiedError::permanent(format!("{} rejected our credentials (HTTP {})", label, status))
                .with_status(*status)
                .with_severity(Severity::Critical)
        }

        RawFailure::Http { status: status @ (400 | 422), body, .. } => {
            let validation = body.as_ref().map(validation_details).unwrap_or_default();
            let mut err =
                ClassifiedError::permanent(format!("{} rejected the request (HTTP {})", label, status))
                    .with_status(*status)
                    .with_severity(Severity::Low);
            err.kind = ErrorKind::Permanent { validation };
            err
        }

        RawFailure::Http { status: 404, .. } => {
            ClassifiedError::permanent(format!("{} has no such resource (HTTP 404)", label))
                .with_status(404)
                .with_severity(Severity::Low)
        }

        RawFailure::Http { status, body, .. } => match provider {
            Some(p) => provider_error(
                body.as_ref().and_then(provider_code),
                format!("{} responded with HTTP {}", p, status),
                body.clone(),
            )
            .with_status(*status),
            None => ClassifiedError::transient(format!("upstream responded with HTTP {}", status))
                .with_status(*status),
        },

        RawFailure::Provider { code, message, payload } => {
            provider_error(code.clone(), message.clone(), payload.clone())
        }

        RawFailure::Transformation(detail) => ClassifiedError::transformation(detail.clone()),

        RawFailure::Classified(err) => err.clone(),

        RawFailure::Unknown(message) => match provider {
            Some(_) => provider_error(None, message.clone(), None),
            None => ClassifiedError::transient(message.clone()),
        },
    };

    match (classified.provider, provider) {
        (None, Some(p)) => classified.with_provider(p),
        _ => classified,
    }
}

fn provider_error(code: Option<String>, message: String, payload: Option<Value>) -> ClassifiedError {
    let mut err = ClassifiedError::transient(message);
    err.kind = ErrorKind::Provider { code, payload };
    err
}

/// Longest `Retry-After` honoured; larger values are clamped to it.
pub const MAX_RETRY_AFTER_SECS: u64 = 86_400;

/// Parse a `Retry-After` delta-seconds value, rounding fractions up.
pub fn parse_retry_after(value: &str) -> Option<u64> {
    let secs: f64 = value.trim().parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(secs.ceil().min(MAX_RETRY_AFTER_SECS as f64) as u64)
}

fn validation_details(body: &Value) -> Vec<String> {
    ["errors", "validationErrors", "details"]
        .iter()
        .filter_map(|key| body.get(*key).and_then(Value::as_array))
        .flatten()
        .map(|item| match item {
            Value::String(s) => s.clone(),
            Value::Object(obj) => {
                let message = obj.get("message").and_then(Value::as_str);
                let field = obj.get("field").and_then(Value::as_str);
                match (field, message) {
                    (Some(field), Some(message)) => format!("{}: {}", field, message),
                    (None, Some(message)) => message.to_string(),
                    _ => item.to_string(),
                }
            }
            other => other.to_string(),
        })
        .collect()
}

fn provider_code(body: &Value) -> Option<String> {
    ["code", "errorCode"]
        .iter()
        .find_map(|key| match body.get(*key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}
