//! Redis-backed counter store.
//!
//! Each trait method is a single round trip. Batches become one pipeline,
//! wrapped in MULTI/EXEC when the batch is atomic.

use async_trait::async_trait;
use forum_core::{CounterBatch, CounterOp, CounterStore, RepoResult};
use redis::AsyncCommands;
use std::time::Duration;

use crate::pool::{RedisPool, RedisPoolError};

#[derive(Clone, Debug)]
pub struct RedisCounterStore {
    pool: RedisPool,
}

impl RedisCounterStore {
    #[must_use]
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    fn build_pipeline(batch: &CounterBatch) -> redis::Pipeline {
        let mut pipe = redis::pipe();
        if batch.is_atomic() {
            pipe.atomic();
        }

        for op in batch.ops() {
            match op {
                CounterOp::IncrementBy { key, member, delta } => {
                    pipe.zincr(key, member, *delta).ignore();
                }
                CounterOp::IncrementExisting { key, member, delta } => {
                    pipe.cmd("ZADD")
                        .arg(key)
                        .arg("XX")
                        .arg("INCR")
                        .arg(*delta)
                        .arg(member)
                        .ignore();
                }
                CounterOp::SetScore { key, member, score } => {
                    pipe.zadd(key, member, *score).ignore();
                }
                CounterOp::RemoveMember { key, member } => {
                    pipe.zrem(key, member).ignore();
                }
                CounterOp::SetAdd { key, member } => {
                    pipe.sadd(key, member).ignore();
                }
                CounterOp::SetRemove { key, member } => {
                    pipe.srem(key, member).ignore();
                }
                CounterOp::HashSet { key, field, value } => {
                    pipe.hset(key, field, value).ignore();
                }
                CounterOp::HashSetIfAbsent { key, field, value } => {
                    pipe.hset_nx(key, field, value).ignore();
                }
                CounterOp::HashDelete { key, field } => {
                    pipe.hdel(key, field).ignore();
                }
                CounterOp::Delete { key } => {
                    pipe.del(key).ignore();
                }
            }
        }
        pipe
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment_by(&self, key: &str, member: &str, delta: f64) -> RepoResult<f64> {
        let mut conn = self.pool.get().await?;
        let score: f64 = conn
            .zincr(key, member, delta)
            .await
            .map_err(RedisPoolError::from)?;
        Ok(score)
    }

    async fn score(&self, key: &str, member: &str) -> RepoResult<Option<f64>> {
        let mut conn = self.pool.get().await?;
        let score: Option<f64> = conn
            .zscore(key, member)
            .await
            .map_err(RedisPoolError::from)?;
        Ok(score)
    }

    async fn set_add(&self, key: &str, member: &str) -> RepoResult<bool> {
        let mut conn = self.pool.get().await?;
        let added: i64 = conn.sadd(key, member).await.map_err(RedisPoolError::from)?;
        Ok(added > 0)
    }

    async fn set_is_member(&self, key: &str, member: &str) -> RepoResult<bool> {
        let mut conn = self.pool.get().await?;
        let is_member: bool = conn
            .sismember(key, member)
            .await
            .map_err(RedisPoolError::from)?;
        Ok(is_member)
    }

    async fn set_members(&self, key: &str) -> RepoResult<Vec<String>> {
        let mut conn = self.pool.get().await?;
        let members: Vec<String> = conn.smembers(key).await.map_err(RedisPoolError::from)?;
        Ok(members)
    }

    async fn range_by_score_desc(
        &self,
        key: &str,
        offset: usize,
        limit: usize,
    ) -> RepoResult<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let start = offset as isize;
        let stop = start + limit as isize - 1;

        let mut conn = self.pool.get().await?;
        let members: Vec<String> = conn
            .zrevrange(key, start, stop)
            .await
            .map_err(RedisPoolError::from)?;
        Ok(members)
    }

    async fn hash_get(&self, key: &str, field: &str) -> RepoResult<Option<String>> {
        let mut conn = self.pool.get().await?;
        let value: Option<String> = conn.hget(key, field).await.map_err(RedisPoolError::from)?;
        Ok(value)
    }

    async fn exists(&self, key: &str) -> RepoResult<bool> {
        let mut conn = self.pool.get().await?;
        let exists: bool = conn.exists(key).await.map_err(RedisPoolError::from)?;
        Ok(exists)
    }

    async fn intersect_max(&self, dest: &str, keys: &[String], ttl: Duration) -> RepoResult<()> {
        let mut conn = self.pool.get().await?;
        redis::pipe()
            .atomic()
            .cmd("ZINTERSTORE")
            .arg(dest)
            .arg(keys.len())
            .arg(keys)
            .arg("AGGREGATE")
            .arg("MAX")
            .ignore()
            .expire(dest, ttl.as_secs() as i64)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(RedisPoolError::from)?;

        tracing::debug!(dest = %dest, sources = keys.len(), "Intersected feed index");
        Ok(())
    }

    async fn execute(&self, batch: CounterBatch) -> RepoResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let pipe = Self::build_pipeline(&batch);

        let mut conn = self.pool.get().await?;
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(RedisPoolError::from)?;

        tracing::trace!(ops = batch.len(), atomic = batch.is_atomic(), "Executed counter batch");
        Ok(())
    }
}
