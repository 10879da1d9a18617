//! HTTP provider executor and token authority.
//!
//! # Responsibilities
//! - POST the transformed payload to `{base_url}/{operation}`
//! - Attach a bearer token from the credential cache when the request has one
//! - Report non-2xx replies, transport errors and business failures as
//!   `RawFailure` for the classifier
//! - Exchange tenant credentials for access tokens
//!
//! # Design Decisions
//! - One `reqwest::Client` per executor so connections are pooled
//! - A 401 drops the rejected token, unless it was already replaced, so the
//!   next request fetches a fresh one
//! - `{"success": false, ...}` inside a 2xx body is a provider failure

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::config::{ProviderEndpoint, TokenSettings};
use crate::credentials::{AuthMethod, CredentialCache, Credentials, IssuedToken, TokenAuthority};
use crate::http::request::X_ORGANIZATION_ID;
use crate::provider::transform::{IdentityTransformer, PayloadTransformer};
use crate::provider::{Provider, ProviderExecutor, ProviderRequest, ProviderResponse};
use crate::resilience::classifier::{classify, ClassifiedError, RawFailure};

/// Calls one provider over HTTP.
pub struct HttpProviderExecutor {
    provider: Provider,
    client: reqwest::Client,
    base_url: String,
    transformer: Arc<dyn PayloadTransformer>,
    credentials: Option<Arc<CredentialCache>>,
}

impl HttpProviderExecutor {
    pub fn new(provider: Provider, endpoint: &ProviderEndpoint) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(endpoint.timeout_ms))
            .build()?;
        Ok(Self {
            provider,
            client,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            transformer: Arc::new(IdentityTransformer),
            credentials: None,
        })
    }

    pub fn with_transformer(mut self, transformer: Arc<dyn PayloadTransformer>) -> Self {
        self.transformer = transformer;
        self
    }

    pub fn with_credentials(mut self, cache: Arc<CredentialCache>) -> Self {
        self.credentials = Some(cache);
        self
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// URL an operation is posted to.
    pub fn operation_url(&self, operation: &str) -> String {
        format!("{}/{}", self.base_url, operation.trim_start_matches('/'))
    }
}

#[async_trait]
impl ProviderExecutor for HttpProviderExecutor {
    async fn execute(&self, request: &ProviderRequest) -> Result<ProviderResponse, RawFailure> {
        let body = self
            .transformer
            .to_provider(&request.operation, &request.payload)
            .map_err(RawFailure::Transformation)?;

        let mut builder = self.client.post(self.operation_url(&request.operation)).json(&body);
        if let Some(org) = &request.organization_id {
            builder = builder.header(X_ORGANIZATION_ID, org);
        }
        let mut presented = None;
        if let (Some(key), Some(cache)) = (&request.credentials, &self.credentials) {
            let token = cache.get_token(key).await.map_err(RawFailure::Classified)?;
            builder = builder.bearer_auth(&token);
            presented = Some((key, cache, token));
        }

        let response = builder.send().await?;
        let status = response.status();
        let retry_after = retry_after_header(response.headers());
        let bytes = response.bytes().await?;
        let parsed = parse_body(&bytes);

        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED {
                if let Some((key, cache, token)) = &presented {
                    tracing::warn!(provider = %self.provider, key = %key, "Provider rejected token, dropping it");
                    cache.invalidate(key, token);
                }
            }
            return Err(RawFailure::Http {
                status: status.as_u16(),
                retry_after,
                body: parsed,
            });
        }

        let data = parsed.unwrap_or(Value::Null);
        if let Some(failure) = business_failure(&data) {
            return Err(failure);
        }

        let data = self
            .transformer
            .from_provider(&request.operation, data)
            .map_err(RawFailure::Transformation)?;
        Ok(ProviderResponse::new(status.as_u16(), data))
    }
}

fn retry_after_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn parse_body(bytes: &[u8]) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }
    Some(
        serde_json::from_slice(bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned())),
    )
}

/// A 2xx body that reports `"success": false`.
fn business_failure(body: &Value) -> Option<RawFailure> {
    if body.get("success").and_then(Value::as_bool) != Some(false) {
        return None;
    }
    let code = ["code", "errorCode"]
        .iter()
        .find_map(|k| body.get(*k))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
    let message = ["message", "error"]
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_str))
        .unwrap_or("provider reported failure")
        .to_string();
    Some(RawFailure::Provider {
        code,
        message,
        payload: Some(body.clone()),
    })
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Issues tokens with the client-credentials grant, or passes API keys through.
pub struct HttpTokenAuthority {
    client: reqwest::Client,
    token_path: String,
}

impl HttpTokenAuthority {
    pub fn new(settings: &TokenSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            token_path: settings.token_path.clone(),
        })
    }

    fn token_url(&self, base_url: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), self.token_path)
    }
}

#[async_trait]
impl TokenAuthority for HttpTokenAuthority {
    async fn issue(&self, credentials: &Credentials) -> Result<IssuedToken, ClassifiedError> {
        match credentials.auth_method {
            AuthMethod::ApiKey => {
                let key = credentials.api_key.clone().ok_or_else(|| {
                    ClassifiedError::configuration("credentials.api_key", "api_key auth without an api key")
                })?;
                Ok(IssuedToken {
                    access_token: key,
                    expires_in: None,
                })
            }
            AuthMethod::ClientCredentials => {
                let form = [
                    ("grant_type", "client_credentials"),
                    ("client_id", credentials.client_id.as_str()),
                    ("client_secret", credentials.client_secret.as_str()),
                ];
                let response = self
                    .client
                    .post(self.token_url(&credentials.base_url))
                    .form(&form)
                    .send()
                    .await
                    .map_err(|e| classify(&RawFailure::from(e), None))?;

                let status = response.status();
                if !status.is_success() {
                    let retry_after = retry_after_header(response.headers());
                    let body = response.bytes().await.ok().and_then(|b| parse_body(&b));
                    return Err(classify(
                        &RawFailure::Http {
                            status: status.as_u16(),
                            retry_after,
                            body,
                        },
                        None,
                    ));
                }

                let token: TokenResponse = response
                    .json()
                    .await
                    .map_err(|e| ClassifiedError::transient(format!("malformed token response: {}", e)))?;
                Ok(IssuedToken {
                    access_token: token.access_token,
                    expires_in: token.expires_in.map(Duration::from_secs),
                })
            }
        }
    }
}
