//! Credential subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP executor needs a bearer token for (member_id, branch_id)
//!     → cache.rs: fresh token cached? return it
//!     → refresh in flight? await the same shared future
//!     → otherwise spawn one refresh:
//!         → CredentialSource::lookup (who is this tenant?)
//!         → TokenAuthority::issue (exchange credentials for a token)
//!     → store the token, or drop the cached one on failure
//! ```
//!
//! # Design Decisions
//! - At most one refresh per key is in flight at any time
//! - Refreshes run on their own task; a cancelled caller never strands
//!   the other waiters
//! - Tokens are refreshed a configurable buffer before they expire

pub mod cache;

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::CredentialEntry;
use crate::resilience::ClassifiedError;

pub use cache::{CachedToken, CredentialCache};

/// Identifies one set of tenant credentials.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialKey {
    pub member_id: String,
    pub branch_id: String,
}

impl CredentialKey {
    pub fn new(member_id: impl Into<String>, branch_id: impl Into<String>) -> Self {
        Self {
            member_id: member_id.into(),
            branch_id: branch_id.into(),
        }
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.member_id, self.branch_id)
    }
}

/// How a tenant authenticates with the token issuer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// OAuth2 client-credentials grant.
    #[default]
    ClientCredentials,
    /// A long-lived API key used directly as the bearer token.
    ApiKey,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub api_key: Option<String>,
    pub auth_method: AuthMethod,
    pub base_url: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("auth_method", &self.auth_method)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl From<&CredentialEntry> for Credentials {
    fn from(entry: &CredentialEntry) -> Self {
        Self {
            client_id: entry.client_id.clone(),
            client_secret: entry.client_secret.clone(),
            api_key: entry.api_key.clone(),
            auth_method: entry.auth_method,
            base_url: entry.base_url.clone(),
        }
    }
}

/// A token as issued by the authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub access_token: String,
    /// Lifetime stated by the issuer; the configured TTL applies when absent.
    pub expires_in: Option<Duration>,
}

/// Resolves tenant credentials.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn lookup(&self, key: &CredentialKey) -> Result<Credentials, ClassifiedError>;
}

/// Exchanges credentials for an access token.
#[async_trait]
pub trait TokenAuthority: Send + Sync {
    async fn issue(&self, credentials: &Credentials) -> Result<IssuedToken, ClassifiedError>;
}

/// Credentials fixed at startup (from the `[[credentials]]` config section).
#[derive(Debug, Default)]
pub struct StaticCredentialSource {
    entries: HashMap<CredentialKey, Credentials>,
}

impl StaticCredentialSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: &[CredentialEntry]) -> Self {
        let entries = entries
            .iter()
            .map(|e| (CredentialKey::new(&e.member_id, &e.branch_id), Credentials::from(e)))
            .collect();
        Self { entries }
    }

    pub fn insert(&mut self, key: CredentialKey, credentials: Credentials) {
        self.entries.insert(key, credentials);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CredentialSource for StaticCredentialSource {
    async fn lookup(&self, key: &CredentialKey) -> Result<Credentials, ClassifiedError> {
        self.entries.get(key).cloned().ok_or_else(|| {
            ClassifiedError::permanent(format!("no credentials configured for {}", key)).with_status(401)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_source_lookup() {
        let entry = CredentialEntry {
            member_id: "m-1".to_string(),
            branch_id: "b-1".to_string(),
            auth_method: AuthMethod::ApiKey,
            client_id: String::new(),
            client_secret: String::new(),
            api_key: Some("k".to_string()),
            base_url: String::new(),
        };
        let source = StaticCredentialSource::from_entries(&[entry]);

        let creds = source.lookup(&CredentialKey::new("m-1", "b-1")).await.unwrap();
        assert_eq!(creds.auth_method, AuthMethod::ApiKey);
        assert_eq!(creds.api_key.as_deref(), Some("k"));

        let err = source.lookup(&CredentialKey::new("m-1", "b-2")).await.unwrap_err();
        assert!(!err.retryable);
        assert_eq!(err.status_code, Some(401));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let creds = Credentials {
            client_id: "id".to_string(),
            client_secret: "hunter2".to_string(),
            api_key: Some("key".to_string()),
            auth_method: AuthMethod::ClientCredentials,
            base_url: "https://auth".to_string(),
        };
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("\"key\""));
    }
}
