//! Payload mapping between the neutral request shape and a provider's wire format.

use serde_json::Value;

/// Maps payloads to and from one provider's format.
///
/// Errors carry a human-readable detail and surface as non-retryable
/// `Transformation` failures.
pub trait PayloadTransformer: Send + Sync {
    fn to_provider(&self, operation: &str, payload: &Value) -> Result<Value, String>;

    fn from_provider(&self, operation: &str, body: Value) -> Result<Value, String>;
}

/// Passes payloads through untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTransformer;

impl PayloadTransformer for IdentityTransformer {
    fn to_provider(&self, _operation: &str, payload: &Value) -> Result<Value, String> {
        Ok(payload.clone())
    }

    fn from_provider(&self, _operation: &str, body: Value) -> Result<Value, String> {
        Ok(body)
    }
}
