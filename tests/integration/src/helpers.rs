//! Test helpers for integration tests
//!
//! Provides the in-memory forum used by most scenarios and the wiring for a
//! live PostgreSQL + Redis stack.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use forum_cache::{
    InMemoryCounterStore, InMemoryEventQueue, InMemoryFilter, KeySpace, RedisBloomFilter,
    RedisCounterStore, RedisEventQueue, RedisPool, RedisPoolConfig,
};
use forum_common::{AppConfig, DrainConfig};
use forum_core::{CounterStore, Metric, PolicyTable, Snowflake, SnowflakeGenerator};
use forum_db::{create_pool, DatabaseConfig, InMemoryAuthoritativeStore, PgAuthoritativeStore};
use forum_service::ServiceContext;

/// A forum wired to in-process stores, with handles to poke at each store
pub struct TestForum {
    pub store: InMemoryAuthoritativeStore,
    pub counters: Arc<InMemoryCounterStore>,
    pub filter: Arc<InMemoryFilter>,
    pub queue: InMemoryEventQueue,
    pub ctx: ServiceContext,
}

impl TestForum {
    pub fn new() -> Self {
        Self::build(PolicyTable::default(), quick_drain())
    }

    pub fn with_policies(policies: PolicyTable) -> Self {
        Self::build(policies, quick_drain())
    }

    pub fn build(policies: PolicyTable, drain: DrainConfig) -> Self {
        let store = InMemoryAuthoritativeStore::new();
        let counters = Arc::new(InMemoryCounterStore::new());
        let filter = Arc::new(InMemoryFilter::new());
        let queue = InMemoryEventQueue::with_poll_timeout(std::time::Duration::from_millis(10));

        let ctx = ServiceContext::builder()
            .store(Arc::new(store.clone()))
            .counters(counters.clone())
            .filter(filter.clone())
            .queue(Arc::new(queue.clone()))
            .ids(Arc::new(SnowflakeGenerator::new(7)))
            .policies(policies)
            .drain_config(drain)
            .build()
            .expect("in-memory context is complete");

        Self {
            store,
            counters,
            filter,
            queue,
            ctx,
        }
    }

    pub fn keys(&self) -> &KeySpace {
        self.ctx.keys()
    }

    /// Fast-store value of a counter, 0 when absent
    pub async fn counter(&self, metric: Metric, id: Snowflake) -> i64 {
        self.counters
            .score(&self.keys().metric(metric), &id.member())
            .await
            .unwrap()
            .map_or(0, |v| v as i64)
    }
}

impl Default for TestForum {
    fn default() -> Self {
        Self::new()
    }
}

/// Drain settings that flush within a test's patience
pub fn quick_drain() -> DrainConfig {
    DrainConfig {
        max_batch_size: 50,
        max_wait_ms: 200,
        max_retries: 1,
        retry_backoff_ms: 10,
        overflow_log: temp_overflow_path(),
        ..DrainConfig::default()
    }
}

/// A fresh overflow log path under the system temp dir
pub fn temp_overflow_path() -> PathBuf {
    std::env::temp_dir().join(format!("forum-it-{}.jsonl", uuid::Uuid::new_v4()))
}

/// Create a test configuration
pub fn test_config() -> Result<AppConfig> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env().map_err(|e| anyhow::anyhow!("Config error: {}", e))?;
    Ok(config)
}

/// Helper to check if a live test environment is available
pub async fn check_test_env() -> bool {
    if std::env::var("DATABASE_URL").is_err() {
        eprintln!("Skipping test: DATABASE_URL not set");
        return false;
    }

    if std::env::var("REDIS_URL").is_err() {
        eprintln!("Skipping test: REDIS_URL not set");
        return false;
    }

    true
}

/// Wire the services to PostgreSQL and Redis as configured
pub async fn live_context(config: &AppConfig) -> Result<ServiceContext> {
    let pool = create_pool(&DatabaseConfig::from(&config.database)).await?;
    forum_db::schema::bootstrap(&pool).await?;

    let redis = RedisPool::new(RedisPoolConfig::from(&config.redis))?;
    let keys = KeySpace::new(config.redis.key_prefix.clone());

    let ctx = ServiceContext::builder()
        .config(config)
        .store(Arc::new(PgAuthoritativeStore::new(pool)))
        .counters(Arc::new(RedisCounterStore::new(redis.clone())))
        .filter(Arc::new(RedisBloomFilter::new(redis.clone())))
        .queue(Arc::new(RedisEventQueue::new(redis, keys)))
        .ids(Arc::new(SnowflakeGenerator::new(config.snowflake.worker_id)))
        .build()?;
    Ok(ctx)
}
