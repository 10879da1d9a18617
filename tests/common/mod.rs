//! Shared fixtures for the integration tests: scripted executors and a
//! programmable HTTP backend standing in for a provider.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use provider_bridge::config::{BridgeConfig, CredentialEntry};
use provider_bridge::credentials::AuthMethod;
use provider_bridge::provider::{ProviderExecutor, ProviderRequest, ProviderResponse};
use provider_bridge::resilience::RawFailure;

/// Executor that replays a script, then repeats its fallback reply.
pub struct Scripted {
    script: Mutex<VecDeque<Result<ProviderResponse, RawFailure>>>,
    fallback: Result<ProviderResponse, RawFailure>,
    calls: AtomicUsize,
    delay: Duration,
}

impl Scripted {
    pub fn always(reply: Result<ProviderResponse, RawFailure>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: reply,
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        })
    }

    pub fn ok(data: Value) -> Arc<Self> {
        Self::always(Ok(ProviderResponse::new(200, data)))
    }

    pub fn status(status: u16) -> Arc<Self> {
        Self::always(Err(http_failure(status)))
    }

    pub fn sequence(
        replies: impl IntoIterator<Item = Result<ProviderResponse, RawFailure>>,
        fallback: Result<ProviderResponse, RawFailure>,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(replies.into_iter().collect()),
            fallback,
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        })
    }

    pub fn slow(delay: Duration, data: Value) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Ok(ProviderResponse::new(200, data)),
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderExecutor for Scripted {
    async fn execute(&self, _request: &ProviderRequest) -> Result<ProviderResponse, RawFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

pub fn http_failure(status: u16) -> RawFailure {
    RawFailure::Http {
        status,
        retry_after: None,
        body: None,
    }
}

/// A reply the mock backend sends for one request.
#[derive(Clone, Debug)]
pub struct MockReply {
    pub status: u16,
    pub body: Value,
    pub retry_after: Option<&'static str>,
}

impl MockReply {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            retry_after: None,
        }
    }

    pub fn retry_after(mut self, value: &'static str) -> Self {
        self.retry_after = Some(value);
        self
    }
}

/// One request the mock backend received.
#[derive(Clone, Debug)]
pub struct Recorded {
    pub path: String,
    pub authorization: Option<String>,
    pub organization_id: Option<String>,
    pub body: Value,
}

#[derive(Default)]
struct BackendState {
    script: Mutex<VecDeque<MockReply>>,
    fallback: Mutex<Option<MockReply>>,
    requests: Mutex<Vec<Recorded>>,
    tokens_issued: AtomicUsize,
    token_delay: Mutex<Duration>,
}

/// Provider and token issuer on a random local port.
#[derive(Clone)]
pub struct MockBackend {
    pub addr: SocketAddr,
    state: Arc<BackendState>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state = Arc::new(BackendState::default());
        let app = Router::new()
            .route("/oauth/token", post(token_handler))
            .fallback(provider_handler)
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Queue replies served in order before the fallback.
    pub fn script(&self, replies: impl IntoIterator<Item = MockReply>) {
        self.state
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(replies);
    }

    /// Reply used once the script is exhausted. Defaults to `200 {"ok": true}`.
    pub fn respond_with(&self, reply: MockReply) {
        *self.state.fallback.lock().unwrap_or_else(PoisonError::into_inner) = Some(reply);
    }

    pub fn set_token_delay(&self, delay: Duration) {
        *self.state.token_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn tokens_issued(&self) -> usize {
        self.state.tokens_issued.load(Ordering::SeqCst)
    }
}

async fn provider_handler(
    State(state): State<Arc<BackendState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
    state
        .requests
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(Recorded {
            path: uri.path().to_string(),
            authorization: header("authorization"),
            organization_id: header("x-organization-id"),
            body: serde_json::from_slice(&body).unwrap_or(Value::Null),
        });

    let scripted = state
        .script
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .pop_front();
    let reply = scripted
        .or_else(|| state.fallback.lock().unwrap_or_else(PoisonError::into_inner).clone())
        .unwrap_or_else(|| MockReply::json(200, json!({"ok": true})));

    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(reply.body)).into_response();
    if let Some(value) = reply.retry_after {
        response
            .headers_mut()
            .insert("retry-after", HeaderValue::from_static(value));
    }
    response
}

async fn token_handler(State(state): State<Arc<BackendState>>) -> Json<Value> {
    let delay = *state.token_delay.lock().unwrap_or_else(PoisonError::into_inner);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    let n = state.tokens_issued.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({ "access_token": format!("token-{}", n), "expires_in": 3600 }))
}

/// Bridge config pointing both providers at `backend`, with fast retries.
pub fn config_for(backend: &MockBackend) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.providers.legacy.base_url = format!("{}/legacy", backend.url());
    config.providers.replacement.base_url = format!("{}/replacement", backend.url());
    config.retry.initial_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config.credentials.push(CredentialEntry {
        member_id: "m-1".to_string(),
        branch_id: "b-1".to_string(),
        auth_method: AuthMethod::ClientCredentials,
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        api_key: None,
        base_url: backend.url(),
    });
    config
}
