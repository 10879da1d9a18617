//! Request identification and tenant extraction.
//!
//! # Responsibilities
//! - Generate a request ID (UUID v4) unless the client sent one
//! - Echo the ID back on the response
//! - Read tenant headers into a `ForwardRequest`
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Member and branch headers only count when both are present

use axum::http::{HeaderMap, HeaderName};
use serde_json::Value;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::credentials::CredentialKey;
use crate::routing::ForwardRequest;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_ORGANIZATION_ID: &str = "x-organization-id";
pub const X_MEMBER_ID: &str = "x-member-id";
pub const X_BRANCH_ID: &str = "x-branch-id";

fn request_id_header() -> HeaderName {
    HeaderName::from_static(X_REQUEST_ID)
}

/// Sets `x-request-id` on incoming requests that lack one.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(request_id_header(), MakeRequestUuid)
}

/// Copies `x-request-id` from the request onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(request_id_header())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub fn request_id(headers: &HeaderMap) -> &str {
    header_str(headers, X_REQUEST_ID).unwrap_or("unknown")
}

/// Build a `ForwardRequest` from the operation path segment, tenant headers and body.
pub fn forward_request(operation: &str, headers: &HeaderMap, payload: Value) -> ForwardRequest {
    let mut request = ForwardRequest::new(operation, payload);
    if let Some(id) = header_str(headers, X_REQUEST_ID) {
        request = request.with_request_id(id);
    }
    if let Some(org) = header_str(headers, X_ORGANIZATION_ID) {
        request = request.with_organization(org);
    }
    if let (Some(member), Some(branch)) = (header_str(headers, X_MEMBER_ID), header_str(headers, X_BRANCH_ID)) {
        request = request.with_credentials(CredentialKey::new(member, branch));
    }
    request
}
