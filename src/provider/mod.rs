//! Provider subsystem.
//!
//! # Data Flow
//! ```text
//! Router picks a Provider
//!     → ProviderExecutor::execute (one per provider, opaque to the core)
//!         → http.rs: transform payload, attach auth header, POST upstream
//!     → Ok(ProviderResponse) or Err(RawFailure) for the classifier
//! ```
//!
//! # Design Decisions
//! - The set of providers is fixed: legacy and replacement
//! - Executors never classify; they report what happened and the
//!   resilience layer decides what it means

pub mod http;
pub mod transform;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::credentials::CredentialKey;
use crate::resilience::classifier::RawFailure;

/// The two backends a client can be served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// The provider clients were originally integrated with.
    Legacy,
    /// The provider traffic is being migrated to.
    Replacement,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Legacy => "legacy",
            Provider::Replacement => "replacement",
        }
    }

    /// The other provider, used for fallback.
    pub fn alternate(&self) -> Provider {
        match self {
            Provider::Legacy => Provider::Replacement,
            Provider::Replacement => Provider::Legacy,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logical operation as it is handed to a provider executor.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// Logical operation name, e.g. `"applications.submit"`.
    pub operation: String,
    /// Tenant the request belongs to.
    pub organization_id: Option<String>,
    /// Which cached credentials to authenticate with, if any.
    pub credentials: Option<CredentialKey>,
    /// Provider-neutral payload.
    pub payload: Value,
}

/// A successful provider reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub status_code: u16,
    pub data: Value,
}

impl ProviderResponse {
    pub fn new(status_code: u16, data: Value) -> Self {
        Self { status_code, data }
    }
}

/// Executes one call against one provider.
#[async_trait]
pub trait ProviderExecutor: Send + Sync {
    async fn execute(&self, request: &ProviderRequest) -> Result<ProviderResponse, RawFailure>;
}

/// The executors for both providers.
#[derive(Clone)]
pub struct ProviderSet {
    legacy: Arc<dyn ProviderExecutor>,
    replacement: Arc<dyn ProviderExecutor>,
}

impl ProviderSet {
    pub fn new(legacy: Arc<dyn ProviderExecutor>, replacement: Arc<dyn ProviderExecutor>) -> Self {
        Self { legacy, replacement }
    }

    pub fn get(&self, provider: Provider) -> &Arc<dyn ProviderExecutor> {
        match provider {
            Provider::Legacy => &self.legacy,
            Provider::Replacement => &self.replacement,
        }
    }
}

impl fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSet").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alternate_provider() {
        assert_eq!(Provider::Legacy.alternate(), Provider::Replacement);
        assert_eq!(Provider::Replacement.alternate(), Provider::Legacy);
    }

    #[test]
    fn test_provider_serde_names() {
        let json = serde_json::to_string(&Provider::Replacement).unwrap();
        assert_eq!(json, "\"replacement\"");
        let parsed: Provider = serde_json::from_str("\"legacy\"").unwrap();
        assert_eq!(parsed, Provider::Legacy);
    }
}
