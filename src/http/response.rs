//! Response mapping.
//!
//! # Responsibilities
//! - Turn a `RoutingResult` into the client response
//! - Map bridge errors to HTTP status codes and `Retry-After`
//!
//! # Status Mapping
//! ```text
//! circuit open                 → 503 + Retry-After
//! rate limited (429)           → 429 + Retry-After (when known)
//! permanent with status        → that status
//! permanent without status     → 400
//! provider failure (4xx)       → that status, otherwise 502
//! transient                    → 502
//! transformation/configuration → 500
//! ```

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::ForwardError;
use crate::resilience::ErrorKind;
use crate::routing::RoutingResult;

pub const X_BRIDGE_PROVIDER: &str = "x-bridge-provider";
pub const X_BRIDGE_MODE: &str = "x-bridge-mode";
pub const X_BRIDGE_FALLBACK: &str = "x-bridge-fallback";

/// Status code and `Retry-After` seconds for a failed request.
pub fn error_status(err: &ForwardError) -> (StatusCode, Option<u64>) {
    let classified = match err {
        ForwardError::CircuitOpen(_) => {
            return (StatusCode::SERVICE_UNAVAILABLE, err.to_classified().retry_after_secs);
        }
        ForwardError::Classified(e) => e,
    };

    let status_from = |code: Option<u16>| code.and_then(|c| StatusCode::from_u16(c).ok());
    let status = match &classified.kind {
        _ if classified.status_code == Some(429) => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Permanent { .. } => status_from(classified.status_code).unwrap_or(StatusCode::BAD_REQUEST),
        ErrorKind::Provider { .. } => status_from(classified.status_code)
            .filter(StatusCode::is_client_error)
            .unwrap_or(StatusCode::BAD_GATEWAY),
        ErrorKind::Transient => StatusCode::BAD_GATEWAY,
        ErrorKind::Transformation { .. } | ErrorKind::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, classified.retry_after_secs)
}

/// Client-facing error response.
pub struct ErrorResponse {
    pub error: ForwardError,
    pub request_id: String,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let (status, retry_after) = error_status(&self.error);
        let body = json!({
            "error": self.error.to_classified(),
            "request_id": self.request_id,
        });
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Build the client response for a routed request.
pub fn routing_response(result: RoutingResult, request_id: &str) -> Response {
    let provider = result.provider;
    let mode = result.mode;
    let fallback = result.fallback;

    let mut response = match result.response.outcome {
        Ok(reply) => {
            let status = StatusCode::from_u16(reply.status_code).unwrap_or(StatusCode::OK);
            (status, Json(reply.data)).into_response()
        }
        Err(error) => ErrorResponse {
            error,
            request_id: request_id.to_string(),
        }
        .into_response(),
    };

    let headers = response.headers_mut();
    headers.insert(X_BRIDGE_PROVIDER, HeaderValue::from_static(provider.as_str()));
    headers.insert(X_BRIDGE_MODE, HeaderValue::from_static(mode.as_str()));
    headers.insert(X_BRIDGE_FALLBACK, HeaderValue::from_static(if fallback { "true" } else { "false" }));
    response
}
