//! Read-through counters.
//!
//! A missing counter is recomputed from the relational store and written back
//! with a plain set, never an increment. Two concurrent misses both write the
//! same authoritative value, so no lock is taken.

use forum_core::{CounterBatch, Metric, Snowflake};
use tracing::{debug, instrument};

use super::context::ServiceContext;
use super::error::ServiceResult;

pub struct CacheFill<'a> {
    ctx: &'a ServiceContext,
}

impl<'a> CacheFill<'a> {
    pub fn new(ctx: &'a ServiceContext) -> Self {
        Self { ctx }
    }

    /// Current value of a counter, backfilled from the relational store on a miss
    #[instrument(skip(self))]
    pub async fn get_counter_or_backfill(&self, target: Snowflake, metric: Metric) -> ServiceResult<i64> {
        if let Some(value) = self.cached(target, metric).await? {
            return Ok(value);
        }
        self.backfill(target, metric, 0).await
    }

    /// Add `delta` to a counter. On a miss the counter is written as the
    /// authoritative value plus `delta`, for writes the relational store has
    /// not seen yet.
    #[instrument(skip(self))]
    pub async fn increment_or_backfill(&self, target: Snowflake, metric: Metric, delta: i64) -> ServiceResult<i64> {
        if self.cached(target, metric).await?.is_some() {
            return self.increment(target, metric, delta).await;
        }
        self.backfill(target, metric, delta).await
    }

    /// Add `delta` to a counter whose write the relational store already holds.
    /// On a miss the backfill picks the write up, so nothing is added.
    #[instrument(skip(self))]
    pub async fn refresh_after_write(&self, target: Snowflake, metric: Metric, delta: i64) -> ServiceResult<i64> {
        if self.cached(target, metric).await?.is_some() {
            return self.increment(target, metric, delta).await;
        }
        self.backfill(target, metric, 0).await
    }

    /// Backfill every listed counter that is missing
    pub async fn ensure_counters(&self, target: Snowflake, metrics: &[Metric]) -> ServiceResult<()> {
        for &metric in metrics {
            self.get_counter_or_backfill(target, metric).await?;
        }
        Ok(())
    }

    async fn cached(&self, target: Snowflake, metric: Metric) -> ServiceResult<Option<i64>> {
        let key = self.ctx.keys().metric(metric);
        let score = self
            .ctx
            .fast(self.ctx.counters().score(&key, &target.member()))
            .await?;
        Ok(score.map(|s| s as i64))
    }

    async fn increment(&self, target: Snowflake, metric: Metric, delta: i64) -> ServiceResult<i64> {
        let key = self.ctx.keys().metric(metric);
        let value = self
            .ctx
            .fast(self.ctx.counters().increment_by(&key, &target.member(), delta as f64))
            .await?;
        Ok(value as i64)
    }

    async fn backfill(&self, target: Snowflake, metric: Metric, delta: i64) -> ServiceResult<i64> {
        let count = self
            .ctx
            .relational(self.ctx.store().count_by_target_and_class(target, metric))
            .await?;
        let value = count + delta;

        let mut batch = CounterBatch::pipelined();
        batch.set_score(self.ctx.keys().metric(metric), target.member(), value as f64);
        self.ctx.fast(self.ctx.counters().execute(batch)).await?;

        debug!(target_id = %target, metric = %metric, value, "Backfilled counter");
        Ok(value)
    }
}
