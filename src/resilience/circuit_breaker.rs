//! Circuit breaker for provider protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: provider assumed down, calls fail fast
//! - Half-Open: probing whether the provider recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: window_requests >= minimum_requests
//!                AND failure_rate >= failure_threshold%
//! Open → Half-Open: first call after next_attempt_at
//! Half-Open → Closed: success_threshold consecutive successes
//! Half-Open → Open: any failure (open timeout grows by backoff_multiplier)
//! ```
//!
//! # Design Decisions
//! - One breaker per (organization, provider), see registry.rs
//! - Rolling time window of outcome instants instead of fixed buckets
//! - Recording and the resulting transition happen under one lock
//! - Fast-fail rejections are not failure samples

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;

use crate::config::CircuitBreakerSettings;
use crate::observability::metrics;
use crate::provider::Provider;

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker tuning.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failure rate (percent) at or above which the circuit opens.
    pub failure_threshold: f64,
    /// Samples required in the window before the circuit may open.
    pub minimum_requests: usize,
    /// Length of the rolling window.
    pub window_size: Duration,
    /// Initial time spent open before probing.
    pub open_timeout: Duration,
    /// Upper bound for the grown open timeout.
    pub max_open_timeout: Duration,
    /// Consecutive half-open successes needed to close.
    pub success_threshold: u32,
    /// Growth factor for the open timeout after a failed half-open trial.
    pub backoff_multiplier: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from(&CircuitBreakerSettings::default())
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(s: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: s.failure_threshold,
            minimum_requests: s.minimum_requests,
            window_size: Duration::from_millis(s.window_size_ms),
            open_timeout: Duration::from_millis(s.open_timeout_ms),
            max_open_timeout: Duration::from_millis(s.max_open_timeout_ms),
            success_threshold: s.success_threshold,
            backoff_multiplier: s.backoff_multiplier,
        }
    }
}

/// Identity of a breaker: tenant plus provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BreakerKey {
    pub organization_id: Option<String>,
    pub provider: Provider,
}

impl BreakerKey {
    pub fn new(provider: Provider, organization_id: Option<&str>) -> Self {
        Self {
            organization_id: organization_id.map(str::to_string),
            provider,
        }
    }
}

impl fmt::Display for BreakerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.organization_id {
            Some(org) => write!(f, "{}:{}", org, self.provider),
            None => write!(f, "{}", self.provider),
        }
    }
}

/// Returned instead of calling the provider while the circuit is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitOpenError {
    pub provider: Provider,
    pub organization_id: Option<String>,
    pub next_attempt_at: Instant,
}

impl CircuitOpenError {
    /// Time left until the breaker will admit a trial call.
    pub fn retry_in(&self) -> Duration {
        self.next_attempt_at.saturating_duration_since(Instant::now())
    }
}

impl fmt::Display for CircuitOpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "circuit open for {}, next attempt in {}ms",
            BreakerKey::new(self.provider, self.organization_id.as_deref()),
            self.retry_in().as_millis()
        )
    }
}

impl std::error::Error for CircuitOpenError {}

/// Outcome of a call made through a breaker.
#[derive(Debug)]
pub enum CallError<E> {
    /// Rejected without calling the operation.
    Open(CircuitOpenError),
    /// The operation ran and failed.
    Failed(E),
}

impl<E> From<CircuitOpenError> for CallError<E> {
    fn from(err: CircuitOpenError) -> Self {
        CallError::Open(err)
    }
}

/// State change notification.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitTransition {
    pub key: String,
    pub provider: Provider,
    pub organization_id: Option<String>,
    pub from: CircuitState,
    pub to: CircuitState,
    pub failure_rate: f64,
    pub window_requests: usize,
    /// Set when the transition is into `Open`.
    pub open_for_ms: Option<u64>,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub key: String,
    pub provider: Provider,
    pub organization_id: Option<String>,
    pub state: CircuitState,
    pub window_requests: usize,
    pub window_failures: usize,
    pub window_successes: usize,
    pub failure_rate: f64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub current_open_timeout_ms: u64,
    pub next_attempt_in_ms: Option<u64>,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    pub times_opened: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    requests: u64,
    successes: u64,
    failures: u64,
    rejections: u64,
    times_opened: u64,
}

/// Mutable breaker state, only touched under the breaker lock.
#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    successes: VecDeque<Instant>,
    failures: VecDeque<Instant>,
    consecutive_successes: u32,
    consecutive_failures: u32,
    current_timeout: Duration,
    opened_at: Option<Instant>,
    next_attempt_at: Option<Instant>,
    totals: Totals,
}

impl BreakerState {
    fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            successes: VecDeque::new(),
            failures: VecDeque::new(),
            consecutive_successes: 0,
            consecutive_failures: 0,
            current_timeout: config.open_timeout,
            opened_at: None,
            next_attempt_at: None,
            totals: Totals::default(),
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        let Some(cutoff) = now.checked_sub(window) else {
            return;
        };
        for samples in [&mut self.successes, &mut self.failures] {
            while samples.front().is_some_and(|t| *t < cutoff) {
                samples.pop_front();
            }
        }
    }

    fn window_requests(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    fn failure_rate(&self) -> f64 {
        let total = self.window_requests();
        if total == 0 {
            return 0.0;
        }
        self.failures.len() as f64 * 100.0 / total as f64
    }

    fn should_open(&self, config: &CircuitBreakerConfig) -> bool {
        self.window_requests() >= config.minimum_requests
            && self.failure_rate() >= config.failure_threshold
    }

    fn open(&mut self, now: Instant, config: &CircuitBreakerConfig) -> Duration {
        let open_for = self.current_timeout;
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.next_attempt_at = Some(now + open_for);
        self.consecutive_successes = 0;
        self.totals.times_opened += 1;
        let grown = open_for.as_secs_f64() * config.backoff_multiplier;
        self.current_timeout = Duration::try_from_secs_f64(grown)
            .unwrap_or(config.max_open_timeout)
            .min(config.max_open_timeout);
        open_for
    }

    fn close(&mut self, config: &CircuitBreakerConfig) {
        self.state = CircuitState::Closed;
        self.current_timeout = config.open_timeout;
        self.opened_at = None;
        self.next_attempt_at = None;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.successes.clear();
        self.failures.clear();
    }
}

/// A single breaker guarding calls to one provider for one tenant.
#[derive(Debug)]
pub struct CircuitBreaker {
    key: BreakerKey,
    config: Arc<CircuitBreakerConfig>,
    state: Mutex<BreakerState>,
    notifier: Option<UnboundedSender<CircuitTransition>>,
}

impl CircuitBreaker {
    pub fn new(key: BreakerKey, config: Arc<CircuitBreakerConfig>) -> Self {
        let state = Mutex::new(BreakerState::new(&config));
        Self {
            key,
            config,
            state,
            notifier: None,
        }
    }

    /// Send state transitions to `notifier`.
    pub fn with_notifier(mut self, notifier: UnboundedSender<CircuitTransition>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn key(&self) -> &BreakerKey {
        &self.key
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Run `op` if the circuit admits it, recording the outcome.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.try_acquire()?;
        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(CallError::Failed(err))
            }
        }
    }

    /// Gate a call. Moves an expired `Open` circuit to `HalfOpen`.
    pub fn try_acquire(&self) -> Result<(), CircuitOpenError> {
        let now = Instant::now();
        let mut state = self.lock();

        if state.state == CircuitState::Open {
            let next_attempt_at = state.next_attempt_at.unwrap_or(now);
            if now < next_attempt_at {
                state.totals.rejections += 1;
                drop(state);
                metrics::record_circuit_rejection(&self.key);
                tracing::debug!(key = %self.key, "Circuit open, failing fast");
                return Err(CircuitOpenError {
                    provider: self.key.provider,
                    organization_id: self.key.organization_id.clone(),
                    next_attempt_at,
                });
            }
            state.state = CircuitState::HalfOpen;
            state.consecutive_successes = 0;
            let transition = self.transition(&state, CircuitState::Open, None);
            state.totals.requests += 1;
            drop(state);
            self.publish(transition);
            return Ok(());
        }

        state.totals.requests += 1;
        Ok(())
    }

    /// Record a successful call.
    pub fn on_success(&self) {
        let now = Instant::now();
        let mut state = self.lock();
        state.prune(now, self.config.window_size);
        state.successes.push_back(now);
        state.totals.successes += 1;
        state.consecutive_failures = 0;
        state.consecutive_successes = state.consecutive_successes.saturating_add(1);

        if state.state == CircuitState::HalfOpen
            && state.consecutive_successes >= self.config.success_threshold
        {
            let rate = state.failure_rate();
            let window_requests = state.window_requests();
            state.close(&self.config);
            let mut transition = self.transition(&state, CircuitState::HalfOpen, None);
            transition.failure_rate = rate;
            transition.window_requests = window_requests;
            drop(state);
            self.publish(transition);
        }
    }

    /// Record a failed call.
    pub fn on_failure(&self) {
        let now = Instant::now();
        let mut state = self.lock();
        state.prune(now, self.config.window_size);
        state.failures.push_back(now);
        state.totals.failures += 1;
        state.consecutive_successes = 0;
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        let from = state.state;
        let reopen = match from {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => state.should_open(&self.config),
            CircuitState::Open => false,
        };
        if reopen {
            let open_for = state.open(now, &self.config);
            let transition = self.transition(&state, from, Some(open_for));
            drop(state);
            self.publish(transition);
        }
    }

    /// Current statistics.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = Instant::now();
        let mut state = self.lock();
        state.prune(now, self.config.window_size);
        let next_attempt_in_ms = match (state.state, state.next_attempt_at) {
            (CircuitState::Open, Some(at)) => Some(at.saturating_duration_since(now).as_millis() as u64),
            _ => None,
        };
        BreakerSnapshot {
            key: self.key.to_string(),
            provider: self.key.provider,
            organization_id: self.key.organization_id.clone(),
            state: state.state,
            window_requests: state.window_requests(),
            window_failures: state.failures.len(),
            window_successes: state.successes.len(),
            failure_rate: state.failure_rate(),
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
            current_open_timeout_ms: state.current_timeout.as_millis() as u64,
            next_attempt_in_ms,
            total_requests: state.totals.requests,
            total_successes: state.totals.successes,
            total_failures: state.totals.failures,
            total_rejections: state.totals.rejections,
            times_opened: state.totals.times_opened,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(
        &self,
        state: &BreakerState,
        from: CircuitState,
        open_for: Option<Duration>,
    ) -> CircuitTransition {
        CircuitTransition {
            key: self.key.to_string(),
            provider: self.key.provider,
            organization_id: self.key.organization_id.clone(),
            from,
            to: state.state,
            failure_rate: state.failure_rate(),
            window_requests: state.window_requests(),
            open_for_ms: open_for.map(|d| d.as_millis() as u64),
        }
    }

    fn publish(&self, transition: CircuitTransition) {
        match transition.to {
            CircuitState::Open => tracing::warn!(
                key = %transition.key,
                from = %transition.from,
                failure_rate = transition.failure_rate,
                open_for_ms = ?transition.open_for_ms,
                "Circuit opened"
            ),
            _ => tracing::info!(
                key = %transition.key,
                from = %transition.from,
                to = %transition.to,
                "Circuit state changed"
            ),
        }
        metrics::record_circuit_transition(&self.key, transition.to);
        if let Some(tx) = &self.notifier {
            let _ = tx.send(transition);
        }
    }
}
