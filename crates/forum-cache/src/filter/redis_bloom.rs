//! Membership filter backed by the RedisBloom module (`BF.*` commands).

use async_trait::async_trait;
use forum_core::{DomainError, MembershipFilter, RepoResult, StoreKind};
use redis::AsyncCommands;

use crate::pool::{RedisPool, RedisPoolError};

fn filter_err(err: impl Into<RedisPoolError>) -> DomainError {
    err.into().into_domain(StoreKind::Filter)
}

#[derive(Clone, Debug)]
pub struct RedisBloomFilter {
    pool: RedisPool,
}

impl RedisBloomFilter {
    #[must_use]
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MembershipFilter for RedisBloomFilter {
    async fn exists(&self, filter: &str) -> RepoResult<bool> {
        let mut conn = self.pool.get().await.map_err(filter_err)?;
        let exists: bool = conn.exists(filter).await.map_err(filter_err)?;
        Ok(exists)
    }

    async fn reserve(&self, filter: &str, error_rate: f64, capacity: u64) -> RepoResult<()> {
        let mut conn = self.pool.get().await.map_err(filter_err)?;
        let result = redis::cmd("BF.RESERVE")
            .arg(filter)
            .arg(error_rate)
            .arg(capacity)
            .query_async::<()>(&mut conn)
            .await;

        match result {
            Ok(()) => {
                tracing::info!(filter = %filter, error_rate, capacity, "Reserved bloom filter");
                Ok(())
            }
            // Lost a race with another reserver
            Err(e) if e.to_string().contains("item exists") => Ok(()),
            Err(e) => {
                tracing::error!(filter = %filter, error = %e, "Could not create bloom filter");
                Err(filter_err(e))
            }
        }
    }

    async fn add(&self, filter: &str, item: &str) -> RepoResult<bool> {
        let mut conn = self.pool.get().await.map_err(filter_err)?;
        let added: bool = redis::cmd("BF.ADD")
            .arg(filter)
            .arg(item)
            .query_async(&mut conn)
            .await
            .map_err(filter_err)?;

        tracing::trace!(filter = %filter, item = %item, added, "Bloom filter add");
        Ok(added)
    }

    async fn may_contain(&self, filter: &str, item: &str) -> RepoResult<bool> {
        let mut conn = self.pool.get().await.map_err(filter_err)?;
        let exists: bool = redis::cmd("BF.EXISTS")
            .arg(filter)
            .arg(item)
            .query_async(&mut conn)
            .await
            .map_err(filter_err)?;
        Ok(exists)
    }
}
