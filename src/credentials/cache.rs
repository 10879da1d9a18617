//! Token cache with single-flight refresh.
//!
//! Each `(member_id, branch_id)` owns one slot holding the cached token and
//! an explicit refresh state. A refresh is a spawned task wrapped in a
//! `Shared` future so every concurrent caller awaits the same outcome.
//!
//! Clearing a token never touches the refresh state, so at most one refresh
//! per key is in flight. A slot whose refresh failed is dropped once it is
//! idle and empty, which keeps unknown tenants from accumulating.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde_json::json;
use tokio::time::Instant;

use crate::config::TokenSettings;
use crate::credentials::{CredentialKey, CredentialSource, TokenAuthority};
use crate::observability::metrics;
use crate::observability::telemetry::TelemetrySink;
use crate::resilience::ClassifiedError;

/// A token together with the instant it stops being valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at: Instant,
}

type RefreshFuture = Shared<BoxFuture<'static, Result<CachedToken, ClassifiedError>>>;

enum RefreshState {
    Idle,
    Refreshing(RefreshFuture),
}

struct Slot {
    token: Option<CachedToken>,
    state: RefreshState,
    // Set once the slot is removed from the map; holders must look it up again.
    retired: bool,
}

impl Slot {
    fn empty() -> Self {
        Self {
            token: None,
            state: RefreshState::Idle,
            retired: false,
        }
    }

    fn is_idle_and_empty(&self) -> bool {
        self.token.is_none() && matches!(self.state, RefreshState::Idle)
    }
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

type Slots = DashMap<CredentialKey, Arc<Mutex<Slot>>>;

/// Whether `token` is still usable `buffer` from now.
fn is_fresh(token: &CachedToken, buffer: Duration) -> bool {
    Instant::now()
        .checked_add(buffer)
        .is_some_and(|horizon| horizon < token.expires_at)
}

/// Caches access tokens per credential key.
pub struct CredentialCache {
    source: Arc<dyn CredentialSource>,
    authority: Arc<dyn TokenAuthority>,
    telemetry: Arc<dyn TelemetrySink>,
    ttl: Duration,
    refresh_buffer: Duration,
    slots: Arc<Slots>,
}

impl CredentialCache {
    pub fn new(
        source: Arc<dyn CredentialSource>,
        authority: Arc<dyn TokenAuthority>,
        telemetry: Arc<dyn TelemetrySink>,
        settings: &TokenSettings,
    ) -> Self {
        Self {
            source,
            authority,
            telemetry,
            ttl: Duration::from_secs(settings.ttl_seconds),
            refresh_buffer: Duration::from_secs(settings.refresh_buffer_seconds),
            slots: Arc::new(DashMap::new()),
        }
    }

    /// Return a valid access token for `key`, refreshing at most once
    /// however many callers ask concurrently.
    pub async fn get_token(&self, key: &CredentialKey) -> Result<String, ClassifiedError> {
        let refresh = loop {
            let slot = self.slot(key);
            let mut guard = lock(&slot);
            if guard.retired {
                continue;
            }
            if let Some(token) = guard.token.as_ref().filter(|t| is_fresh(t, self.refresh_buffer)) {
                return Ok(token.access_token.clone());
            }
            break self.join_or_start(key, &slot, &mut guard);
        };
        refresh.await.map(|token| token.access_token)
    }

    /// Discard the cached token and fetch a new one. Joins a refresh that
    /// is already in flight instead of starting a second.
    pub async fn force_refresh(&self, key: &CredentialKey) -> Result<String, ClassifiedError> {
        let refresh = loop {
            let slot = self.slot(key);
            let mut guard = lock(&slot);
            if guard.retired {
                continue;
            }
            guard.token = None;
            break self.join_or_start(key, &slot, &mut guard);
        };
        refresh.await.map(|token| token.access_token)
    }

    /// Drop the cached token for `key`. A refresh already in flight keeps
    /// running and later callers join it.
    pub fn clear(&self, key: &CredentialKey) {
        if let Some(slot) = self.existing(key) {
            lock(&slot).token = None;
        }
    }

    /// Drop the cached token for `key` only if it is still `rejected`.
    ///
    /// Used when a provider answers 401: a token refreshed since the
    /// rejected request was sent stays cached.
    pub fn invalidate(&self, key: &CredentialKey, rejected: &str) -> bool {
        let Some(slot) = self.existing(key) else {
            return false;
        };
        let mut guard = lock(&slot);
        if guard.token.as_ref().is_some_and(|t| t.access_token == rejected) {
            guard.token = None;
            tracing::debug!(key = %key, "Rejected access token invalidated");
            return true;
        }
        false
    }

    /// Drop every cached token. Slots with a refresh in flight are kept.
    pub fn clear_all(&self) {
        self.slots.retain(|_, slot| {
            let mut guard = lock(slot);
            guard.token = None;
            guard.retired = guard.is_idle_and_empty();
            !guard.retired
        });
    }

    /// Number of keys with a cached token or a refresh in flight.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether a token for `key` is cached and outside the refresh buffer.
    pub fn has_fresh_token(&self, key: &CredentialKey) -> bool {
        let Some(slot) = self.existing(key) else {
            return false;
        };
        let guard = lock(&slot);
        guard.token.as_ref().is_some_and(|t| is_fresh(t, self.refresh_buffer))
    }

    pub fn is_refreshing(&self, key: &CredentialKey) -> bool {
        let Some(slot) = self.existing(key) else {
            return false;
        };
        let guard = lock(&slot);
        matches!(guard.state, RefreshState::Refreshing(_))
    }

    fn existing(&self, key: &CredentialKey) -> Option<Arc<Mutex<Slot>>> {
        self.slots.get(key).map(|s| Arc::clone(s.value()))
    }

    fn slot(&self, key: &CredentialKey) -> Arc<Mutex<Slot>> {
        if let Some(slot) = self.slots.get(key) {
            return Arc::clone(slot.value());
        }
        Arc::clone(
            self.slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(Slot::empty())))
                .value(),
        )
    }

    fn join_or_start(
        &self,
        key: &CredentialKey,
        slot: &Arc<Mutex<Slot>>,
        guard: &mut MutexGuard<'_, Slot>,
    ) -> RefreshFuture {
        if let RefreshState::Refreshing(inflight) = &guard.state {
            tracing::debug!(key = %key, "Joining in-flight token refresh");
            return inflight.clone();
        }
        let refresh = self.spawn_refresh(key.clone(), Arc::clone(slot));
        guard.state = RefreshState::Refreshing(refresh.clone());
        refresh
    }

    // Called with the slot locked; the task's own lock waits until the
    // caller has recorded the Refreshing state.
    fn spawn_refresh(&self, key: CredentialKey, slot: Arc<Mutex<Slot>>) -> RefreshFuture {
        let source = Arc::clone(&self.source);
        let authority = Arc::clone(&self.authority);
        let telemetry = Arc::clone(&self.telemetry);
        let slots = Arc::clone(&self.slots);
        let ttl = self.ttl;

        let task = tokio::spawn(async move {
            tracing::debug!(key = %key, "Refreshing access token");
            let result = async {
                let credentials = source.lookup(&key).await?;
                let issued = authority.issue(&credentials).await?;
                let now = Instant::now();
                let expires_at = issued
                    .expires_in
                    .and_then(|lifetime| now.checked_add(lifetime))
                    .or_else(|| now.checked_add(ttl))
                    .unwrap_or(now);
                Ok::<_, ClassifiedError>(CachedToken {
                    access_token: issued.access_token,
                    expires_at,
                })
            }
            .await;

            {
                let mut guard = lock(&slot);
                guard.state = RefreshState::Idle;
                guard.token = result.as_ref().ok().cloned();
            }
            if result.is_err() {
                // Only if nobody started another refresh on this slot meanwhile.
                slots.remove_if(&key, |_, current| {
                    if !Arc::ptr_eq(current, &slot) {
                        return false;
                    }
                    let mut guard = lock(current);
                    guard.retired = guard.is_idle_and_empty();
                    guard.retired
                });
            }

            match &result {
                Ok(_) => tracing::info!(key = %key, "Access token refreshed"),
                Err(e) => tracing::warn!(key = %key, error = %e, "Access token refresh failed"),
            }
            metrics::record_token_refresh(result.is_ok());
            telemetry.emit(
                "token.refresh",
                json!({
                    "key": key.to_string(),
                    "success": result.is_ok(),
                    "error": result.as_ref().err().map(|e| e.message.clone()),
                }),
            );
            result
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(ClassifiedError::transient(format!("token refresh task failed: {}", e)))
            })
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{AuthMethod, Credentials, IssuedToken, StaticCredentialSource};
    use crate::observability::telemetry::BufferedTelemetry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingAuthority {
        calls: AtomicUsize,
        fail: AtomicBool,
        latency: Duration,
        expires_in: Option<Duration>,
    }

    impl CountingAuthority {
        fn new(latency: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                latency,
                expires_in: None,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenAuthority for CountingAuthority {
        async fn issue(&self, _credentials: &Credentials) -> Result<IssuedToken, ClassifiedError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.latency).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(ClassifiedError::transient("issuer unavailable"));
            }
            Ok(IssuedToken {
                access_token: format!("token-{}", n),
                expires_in: self.expires_in,
            })
        }
    }

    fn key() -> CredentialKey {
        CredentialKey::new("member-1", "branch-1")
    }

    fn source() -> Arc<StaticCredentialSource> {
        let mut source = StaticCredentialSource::new();
        source.insert(
            key(),
            Credentials {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
                api_key: None,
                auth_method: AuthMethod::ClientCredentials,
                base_url: "https://auth.example.com".to_string(),
            },
        );
        Arc::new(source)
    }

    fn settings() -> TokenSettings {
        TokenSettings {
            ttl_seconds: 3600,
            refresh_buffer_seconds: 300,
            ..TokenSettings::default()
        }
    }

    fn cache(authority: Arc<CountingAuthority>, telemetry: Arc<BufferedTelemetry>) -> Arc<CredentialCache> {
        Arc::new(CredentialCache::new(source(), authority, telemetry, &settings()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_cold_calls_refresh_once() {
        let authority = Arc::new(CountingAuthority::new(Duration::from_millis(100)));
        let telemetry = Arc::new(BufferedTelemetry::new());
        let cache = cache(authority.clone(), telemetry.clone());

        let mut handles = Vec::new();
        for _ in 0..20 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get_token(&key()).await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "token-1");
        }

        assert_eq!(authority.calls(), 1);
        assert_eq!(telemetry.count("token.refresh"), 1);
        assert!(!cache.is_refreshing(&key()));
        assert!(cache.has_fresh_token(&key()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_until_refresh_buffer() {
        let authority = Arc::new(CountingAuthority::new(Duration::ZERO));
        let cache = cache(authority.clone(), Arc::new(BufferedTelemetry::new()));

        assert_eq!(cache.get_token(&key()).await.unwrap(), "token-1");

        // 3600s TTL with a 300s buffer: still fresh just before 3300s.
        tokio::time::advance(Duration::from_secs(3299)).await;
        assert_eq!(cache.get_token(&key()).await.unwrap(), "token-1");
        assert_eq!(authority.calls(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get_token(&key()).await.unwrap(), "token-2");
        assert_eq!(authority.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_issuer_lifetime_overrides_ttl() {
        let mut authority = CountingAuthority::new(Duration::ZERO);
        authority.expires_in = Some(Duration::from_secs(600));
        let authority = Arc::new(authority);
        let cache = cache(authority.clone(), Arc::new(BufferedTelemetry::new()));

        cache.get_token(&key()).await.unwrap();
        tokio::time::advance(Duration::from_secs(300)).await;
        assert_eq!(cache.get_token(&key()).await.unwrap(), "token-2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_clears_token_and_next_call_retries() {
        let authority = Arc::new(CountingAuthority::new(Duration::ZERO));
        let telemetry = Arc::new(BufferedTelemetry::new());
        let cache = cache(authority.clone(), telemetry.clone());

        cache.get_token(&key()).await.unwrap();
        authority.fail.store(true, Ordering::SeqCst);

        let err = cache.force_refresh(&key()).await.unwrap_err();
        assert!(err.retryable);
        assert!(!cache.has_fresh_token(&key()));
        assert!(!cache.is_refreshing(&key()));

        authority.fail.store(false, Ordering::SeqCst);
        assert_eq!(cache.get_token(&key()).await.unwrap(), "token-3");

        let events = telemetry.events();
        assert_eq!(events[1].1["success"], false);
        assert_eq!(events[2].1["success"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_key_is_permanent() {
        let authority = Arc::new(CountingAuthority::new(Duration::ZERO));
        let cache = cache(authority.clone(), Arc::new(BufferedTelemetry::new()));

        let err = cache.get_token(&CredentialKey::new("nobody", "nowhere")).await.unwrap_err();
        assert!(!err.retryable);
        assert_eq!(authority.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_refresh_joins_inflight() {
        let authority = Arc::new(CountingAuthority::new(Duration::from_millis(50)));
        let cache = cache(authority.clone(), Arc::new(BufferedTelemetry::new()));

        let (k1, k2) = (key(), key());
        let (a, b) = tokio::join!(cache.get_token(&k1), cache.force_refresh(&k2));
        assert_eq!(a.unwrap(), "token-1");
        assert_eq!(b.unwrap(), "token-1");
        assert_eq!(authority.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_during_refresh_keeps_single_flight() {
        let authority = Arc::new(CountingAuthority::new(Duration::from_millis(100)));
        let cache = cache(authority.clone(), Arc::new(BufferedTelemetry::new()));

        let first = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_token(&key()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.is_refreshing(&key()));

        cache.clear(&key());
        assert!(cache.is_refreshing(&key()));
        assert_eq!(cache.get_token(&key()).await.unwrap(), "token-1");
        assert_eq!(first.await.unwrap().unwrap(), "token-1");
        assert_eq!(authority.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all_during_refresh_keeps_single_flight() {
        let authority = Arc::new(CountingAuthority::new(Duration::from_millis(100)));
        let cache = cache(authority.clone(), Arc::new(BufferedTelemetry::new()));

        let first = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_token(&key()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        cache.clear_all();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_token(&key()).await.unwrap(), "token-1");
        assert_eq!(first.await.unwrap().unwrap(), "token-1");
        assert_eq!(authority.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_only_drops_the_rejected_token() {
        let authority = Arc::new(CountingAuthority::new(Duration::ZERO));
        let cache = cache(authority.clone(), Arc::new(BufferedTelemetry::new()));

        assert_eq!(cache.get_token(&key()).await.unwrap(), "token-1");
        assert!(!cache.invalidate(&key(), "token-0"));
        assert!(cache.has_fresh_token(&key()));

        assert!(cache.invalidate(&key(), "token-1"));
        assert!(!cache.has_fresh_token(&key()));
        assert_eq!(cache.get_token(&key()).await.unwrap(), "token-2");

        // A second 401 for the already replaced token is ignored.
        assert!(!cache.invalidate(&key(), "token-1"));
        assert_eq!(cache.get_token(&key()).await.unwrap(), "token-2");
        assert_eq!(authority.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_leaves_inflight_refresh_alone() {
        let authority = Arc::new(CountingAuthority::new(Duration::from_millis(100)));
        let cache = cache(authority.clone(), Arc::new(BufferedTelemetry::new()));

        cache.get_token(&key()).await.unwrap();
        let refresh = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.force_refresh(&key()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!cache.invalidate(&key(), "token-1"));
        assert!(cache.is_refreshing(&key()));
        assert_eq!(cache.get_token(&key()).await.unwrap(), "token-2");
        assert_eq!(refresh.await.unwrap().unwrap(), "token-2");
        assert_eq!(authority.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_lookups_leave_no_slots() {
        let authority = Arc::new(CountingAuthority::new(Duration::ZERO));
        let cache = cache(authority.clone(), Arc::new(BufferedTelemetry::new()));

        for i in 0..50 {
            let stranger = CredentialKey::new(format!("member-{}", i), "branch-x");
            assert!(cache.get_token(&stranger).await.is_err());
        }
        assert!(cache.is_empty());

        authority.fail.store(true, Ordering::SeqCst);
        assert!(cache.get_token(&key()).await.is_err());
        assert!(cache.is_empty());

        authority.fail.store(false, Ordering::SeqCst);
        cache.get_token(&key()).await.unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_caller_does_not_strand_refresh() {
        let authority = Arc::new(CountingAuthority::new(Duration::from_millis(100)));
        let cache = cache(authority.clone(), Arc::new(BufferedTelemetry::new()));

        let abandoned =
            tokio::time::timeout(Duration::from_millis(10), cache.get_token(&key())).await;
        assert!(abandoned.is_err());
        assert!(cache.is_refreshing(&key()));

        assert_eq!(cache.get_token(&key()).await.unwrap(), "token-1");
        assert_eq!(authority.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_forgets_tokens() {
        let authority = Arc::new(CountingAuthority::new(Duration::ZERO));
        let cache = cache(authority.clone(), Arc::new(BufferedTelemetry::new()));

        cache.get_token(&key()).await.unwrap();
        cache.clear(&key());
        assert!(!cache.has_fresh_token(&key()));
        assert_eq!(cache.get_token(&key()).await.unwrap(), "token-2");

        cache.clear_all();
        assert_eq!(cache.get_token(&key()).await.unwrap(), "token-3");
    }
}
