//! Per-tenant circuit breaker registry.
//!
//! # Responsibilities
//! - Create breakers lazily, one per (organization, provider)
//! - Route calls to the right breaker
//! - Expose snapshots of every breaker for the health surface
//!
//! # Design Decisions
//! - One tenant's outage never opens another tenant's circuit
//! - Breakers live for the process lifetime once created
//! - Constructed explicitly and shared via Arc, never a global

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedSender;

use crate::provider::Provider;
use crate::resilience::circuit_breaker::{
    BreakerKey, BreakerSnapshot, CallError, CircuitBreaker, CircuitBreakerConfig, CircuitTransition,
};

/// Owns every breaker in the process.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: Arc<CircuitBreakerConfig>,
    breakers: DashMap<BreakerKey, Arc<CircuitBreaker>>,
    notifier: Option<UnboundedSender<CircuitTransition>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: Arc::new(config),
            breakers: DashMap::new(),
            notifier: None,
        }
    }

    /// Every breaker created by this registry publishes transitions to `notifier`.
    pub fn with_notifier(mut self, notifier: UnboundedSender<CircuitTransition>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Look up the breaker for a tenant/provider pair, creating it on first use.
    pub fn breaker(&self, provider: Provider, organization_id: Option<&str>) -> Arc<CircuitBreaker> {
        let key = BreakerKey::new(provider, organization_id);
        if let Some(existing) = self.breakers.get(&key) {
            return existing.clone();
        }
        self.breakers
            .entry(key.clone())
            .or_insert_with(|| {
                tracing::debug!(key = %key, "Creating circuit breaker");
                let breaker = CircuitBreaker::new(key.clone(), self.config.clone());
                let breaker = match &self.notifier {
                    Some(tx) => breaker.with_notifier(tx.clone()),
                    None => breaker,
                };
                Arc::new(breaker)
            })
            .clone()
    }

    /// Run `op` through the breaker for (`organization_id`, `provider`).
    pub async fn execute<T, E, F, Fut>(
        &self,
        provider: Provider,
        organization_id: Option<&str>,
        op: F,
    ) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let breaker = self.breaker(provider, organization_id);
        breaker.execute(op).await
    }

    /// Snapshot of every breaker, sorted by key.
    pub fn stats(&self) -> Vec<BreakerSnapshot> {
        let mut stats: Vec<_> = self.breakers.iter().map(|b| b.value().snapshot()).collect();
        stats.sort_by(|a, b| a.key.cmp(&b.key));
        stats
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
