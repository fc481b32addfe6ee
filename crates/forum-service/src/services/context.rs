//! Service context - dependency container for services
//!
//! Holds the four stores, the id issuer and the tuning every service reads.
//! Every store call made through the context runs under that store's timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use forum_cache::KeySpace;
use forum_common::{AppConfig, DrainConfig, FilterConfig, TimeoutConfig};
use forum_core::{
    AuthoritativeStore, CounterStore, DomainError, EventQueue, IdentityProvider,
    MembershipFilter, PolicyTable, RepoResult, Snowflake, StoreKind,
};

use super::error::{ServiceError, ServiceResult};

/// Per-store call deadlines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreTimeouts {
    pub relational: Duration,
    pub fast: Duration,
    pub queue: Duration,
}

impl StoreTimeouts {
    pub fn for_store(&self, store: StoreKind) -> Duration {
        match store {
            StoreKind::Relational => self.relational,
            // The filter lives on the same Redis as the counters
            StoreKind::Fast | StoreKind::Filter => self.fast,
            StoreKind::Queue => self.queue,
        }
    }
}

impl From<TimeoutConfig> for StoreTimeouts {
    fn from(config: TimeoutConfig) -> Self {
        Self {
            relational: Duration::from_millis(config.relational_ms),
            fast: Duration::from_millis(config.fast_ms),
            queue: Duration::from_millis(config.queue_ms),
        }
    }
}

impl Default for StoreTimeouts {
    fn default() -> Self {
        TimeoutConfig::default().into()
    }
}

/// Run a store call, failing with `DomainError::Timeout` once `limit` elapses
pub async fn bounded<T, F>(store: StoreKind, limit: Duration, call: F) -> RepoResult<T>
where
    F: Future<Output = RepoResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(DomainError::Timeout {
            store,
            after_ms: limit.as_millis() as u64,
        }),
    }
}

/// Service context containing all dependencies
///
/// This is the main dependency container that gets passed to all services.
/// It provides access to:
/// - The authoritative relational store
/// - The fast store (counters, sets, hashes)
/// - The membership filter
/// - The event queue feeding the batched drain
/// - The id issuer
#[derive(Clone)]
pub struct ServiceContext {
    store: Arc<dyn AuthoritativeStore>,
    counters: Arc<dyn CounterStore>,
    filter: Arc<dyn MembershipFilter>,
    queue: Arc<dyn EventQueue>,
    ids: Arc<dyn IdentityProvider>,

    keys: KeySpace,
    filter_config: FilterConfig,
    drain_config: DrainConfig,
    timeouts: StoreTimeouts,
    policies: PolicyTable,
}

impl ServiceContext {
    pub fn builder() -> ServiceContextBuilder {
        ServiceContextBuilder::new()
    }

    // === Stores ===

    pub fn store(&self) -> &dyn AuthoritativeStore {
        self.store.as_ref()
    }

    pub fn counters(&self) -> &dyn CounterStore {
        self.counters.as_ref()
    }

    pub fn filter(&self) -> &dyn MembershipFilter {
        self.filter.as_ref()
    }

    pub fn queue(&self) -> &dyn EventQueue {
        self.queue.as_ref()
    }

    /// Generate a new Snowflake ID
    pub fn next_id(&self) -> Snowflake {
        self.ids.next_id()
    }

    // === Settings ===

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    pub fn filter_config(&self) -> &FilterConfig {
        &self.filter_config
    }

    pub fn drain_config(&self) -> &DrainConfig {
        &self.drain_config
    }

    pub fn timeouts(&self) -> StoreTimeouts {
        self.timeouts
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    // === Bounded store calls ===

    pub async fn relational<T, F>(&self, call: F) -> RepoResult<T>
    where
        F: Future<Output = RepoResult<T>>,
    {
        bounded(StoreKind::Relational, self.timeouts.relational, call).await
    }

    pub async fn fast<T, F>(&self, call: F) -> RepoResult<T>
    where
        F: Future<Output = RepoResult<T>>,
    {
        bounded(StoreKind::Fast, self.timeouts.fast, call).await
    }

    pub async fn filtered<T, F>(&self, call: F) -> RepoResult<T>
    where
        F: Future<Output = RepoResult<T>>,
    {
        bounded(StoreKind::Filter, self.timeouts.for_store(StoreKind::Filter), call).await
    }

    pub async fn queued<T, F>(&self, call: F) -> RepoResult<T>
    where
        F: Future<Output = RepoResult<T>>,
    {
        bounded(StoreKind::Queue, self.timeouts.queue, call).await
    }
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("stores", &"...")
            .field("keys", &self.keys)
            .field("timeouts", &self.timeouts)
            .field("policies", &self.policies)
            .finish()
    }
}

/// Builder for creating ServiceContext with custom configuration
pub struct ServiceContextBuilder {
    store: Option<Arc<dyn AuthoritativeStore>>,
    counters: Option<Arc<dyn CounterStore>>,
    filter: Option<Arc<dyn MembershipFilter>>,
    queue: Option<Arc<dyn EventQueue>>,
    ids: Option<Arc<dyn IdentityProvider>>,
    keys: KeySpace,
    filter_config: FilterConfig,
    drain_config: DrainConfig,
    timeouts: StoreTimeouts,
    policies: PolicyTable,
}

impl ServiceContextBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            counters: None,
            filter: None,
            queue: None,
            ids: None,
            keys: KeySpace::default(),
            filter_config: FilterConfig::default(),
            drain_config: DrainConfig::default(),
            timeouts: StoreTimeouts::default(),
            policies: PolicyTable::default(),
        }
    }

    pub fn store(mut self, store: Arc<dyn AuthoritativeStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn counters(mut self, counters: Arc<dyn CounterStore>) -> Self {
        self.counters = Some(counters);
        self
    }

    pub fn filter(mut self, filter: Arc<dyn MembershipFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn queue(mut self, queue: Arc<dyn EventQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn ids(mut self, ids: Arc<dyn IdentityProvider>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn keys(mut self, keys: KeySpace) -> Self {
        self.keys = keys;
        self
    }

    pub fn filter_config(mut self, config: FilterConfig) -> Self {
        self.filter_config = config;
        self
    }

    pub fn drain_config(mut self, config: DrainConfig) -> Self {
        self.drain_config = config;
        self
    }

    pub fn timeouts(mut self, timeouts: StoreTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn policies(mut self, policies: PolicyTable) -> Self {
        self.policies = policies;
        self
    }

    /// Take key prefix, filter, drain, timeout and policy settings from loaded config
    pub fn config(self, config: &AppConfig) -> Self {
        self.keys(KeySpace::new(config.redis.key_prefix.clone()))
            .filter_config(config.filter.clone())
            .drain_config(config.drain.clone())
            .timeouts(config.timeouts.into())
            .policies(config.policies.clone())
    }

    /// Build the ServiceContext
    ///
    /// # Errors
    /// Returns `ServiceError::Validation` if any store is missing
    pub fn build(self) -> ServiceResult<ServiceContext> {
        Ok(ServiceContext {
            store: self
                .store
                .ok_or_else(|| ServiceError::validation("store is required"))?,
            counters: self
                .counters
                .ok_or_else(|| ServiceError::validation("counters is required"))?,
            filter: self
                .filter
                .ok_or_else(|| ServiceError::validation("filter is required"))?,
            queue: self
                .queue
                .ok_or_else(|| ServiceError::validation("queue is required"))?,
            ids: self
                .ids
                .ok_or_else(|| ServiceError::validation("ids is required"))?,
            keys: self.keys,
            filter_config: self.filter_config,
            drain_config: self.drain_config,
            timeouts: self.timeouts,
            policies: self.policies,
        })
    }
}

impl Default for ServiceContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;

    #[test]
    fn test_builder_requires_stores() {
        let err = ServiceContextBuilder::new().build().unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_timeouts_from_config() {
        let timeouts = StoreTimeouts::from(TimeoutConfig {
            relational_ms: 30,
            fast_ms: 5,
            queue_ms: 10,
        });
        assert_eq!(timeouts.for_store(StoreKind::Filter), Duration::from_millis(5));
        assert_eq!(timeouts.for_store(StoreKind::Queue), Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_call_times_out() {
        let result: RepoResult<()> = bounded(StoreKind::Fast, Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await;
        match result {
            Err(DomainError::Timeout { store, after_ms }) => {
                assert_eq!(store, StoreKind::Fast);
                assert_eq!(after_ms, 50);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_context_routes_to_stores() {
        let harness = Harness::new();
        let ctx = &harness.ctx;
        ctx.fast(ctx.counters().increment_by("k", "m", 2.0)).await.unwrap();
        assert_eq!(harness.counters.score("k", "m").await.unwrap(), Some(2.0));
        assert_ne!(ctx.next_id(), ctx.next_id());
    }
}
