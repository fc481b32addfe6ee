//! # forum-cache
//!
//! Redis layer of the forum consistency core.
//!
//! ## Features
//!
//! - **Connection Pool**: Managed Redis connection pool with deadpool
//! - **Counter Store**: Sorted sets, sets and hashes behind [`forum_core::CounterStore`]
//! - **Membership Filter**: RedisBloom filters behind [`forum_core::MembershipFilter`]
//! - **Event Queue**: Redis lists with a processing list per class
//! - **Key Space**: The prefixed key layout shared by every writer
//!
//! The `memory` module holds in-process doubles of the three stores.
//!
//! ## Example
//!
//! ```ignore
//! use forum_cache::{KeySpace, RedisCounterStore, RedisPool, RedisPoolConfig};
//!
//! let pool = RedisPool::new(RedisPoolConfig::default())?;
//! let counters = RedisCounterStore::new(pool.clone());
//! let keys = KeySpace::default();
//!
//! let ups = counters.score(&keys.metric(Metric::VoteUp), &post_id.member()).await?;
//! ```

pub mod counter;
pub mod filter;
pub mod keys;
pub mod memory;
pub mod pool;
pub mod queue;

pub use counter::RedisCounterStore;
pub use filter::RedisBloomFilter;
pub use keys::KeySpace;
pub use memory::{InMemoryCounterStore, InMemoryEventQueue, InMemoryFilter};
pub use pool::{
    create_shared_pool, RedisPool, RedisPoolConfig, RedisPoolError, RedisResult, SharedRedisPool,
};
pub use queue::{RedisEventConsumer, RedisEventQueue};
