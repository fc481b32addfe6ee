//! The two flush stages and their retry policy

use std::collections::HashSet;

use forum_core::{CounterBatch, EventClass, Snowflake, StoreTransaction, UpsertOutcome};
use tracing::{debug, info, instrument};

use crate::services::reconciler::recount_ops;
use crate::services::retry::RetryPolicy;
use crate::services::{FilterGate, ServiceContext, ServiceError, ServiceResult};

use super::batch::CoalescedBatch;
use super::FlushStage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub class: EventClass,
    pub received: usize,
    pub written: usize,
    /// Entries whose target no longer exists
    pub skipped: usize,
    /// Records found already in their final state, whose counters were recomputed
    pub recounted: usize,
}

/// A batch that exhausted its retries at `stage`
#[derive(Debug)]
pub struct FlushFailure {
    pub batch: CoalescedBatch,
    pub stage: FlushStage,
    pub attempts: u32,
    pub error: ServiceError,
}

impl FlushFailure {
    pub fn to_error(&self) -> ServiceError {
        ServiceError::BatchCommitFailed {
            class: self.batch.class,
            stage: self.stage,
            attempts: self.attempts,
        }
    }
}

/// Relational stage output: the batch minus deleted targets, and one outcome per action
struct Committed {
    live: CoalescedBatch,
    outcomes: Vec<UpsertOutcome>,
    skipped: usize,
}

#[derive(Clone)]
pub struct BatchFlusher {
    ctx: ServiceContext,
}

impl BatchFlusher {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    fn retry_policy(&self) -> RetryPolicy {
        let config = self.ctx.drain_config();
        RetryPolicy::new(config.max_retries, config.retry_backoff())
    }

    /// Run both stages, each with bounded retries
    #[instrument(skip(self, batch), fields(class = %batch.class, size = batch.len()))]
    pub async fn flush(&self, batch: CoalescedBatch) -> Result<FlushReport, FlushFailure> {
        if batch.is_empty() {
            return Ok(FlushReport {
                class: batch.class,
                received: batch.received,
                written: 0,
                skipped: 0,
                recounted: 0,
            });
        }
        let policy = self.retry_policy();

        let relational = policy
            .run("drain relational stage", || self.relational_stage(&batch))
            .await;
        let committed = match relational {
            Ok(committed) => committed,
            Err((error, attempts)) => {
                return Err(FlushFailure {
                    batch,
                    stage: FlushStage::Relational,
                    attempts,
                    error,
                })
            }
        };

        let fast = policy
            .run("drain fast-store stage", || {
                self.fast_stage(&committed.live, Some(&committed.outcomes))
            })
            .await;
        let recounted = match fast {
            Ok(recounted) => recounted,
            Err((error, attempts)) => {
                return Err(FlushFailure {
                    batch: committed.live,
                    stage: FlushStage::FastStore,
                    attempts,
                    error,
                })
            }
        };

        let report = FlushReport {
            class: batch.class,
            received: batch.received,
            written: committed.live.len(),
            skipped: committed.skipped,
            recounted,
        };
        info!(
            class = %report.class,
            received = report.received,
            written = report.written,
            skipped = report.skipped,
            recounted = report.recounted,
            "Flushed batch"
        );
        Ok(report)
    }

    /// One more attempt for a dead-lettered batch, starting at the stage that failed.
    /// A fast-store retry recounts every target since the relational outcomes are gone.
    pub async fn retry_from(&self, batch: &CoalescedBatch, stage: FlushStage) -> ServiceResult<()> {
        match stage {
            FlushStage::Relational => {
                let committed = self.relational_stage(batch).await?;
                self.fast_stage(&committed.live, Some(&committed.outcomes)).await?;
            }
            FlushStage::FastStore => {
                self.fast_stage(batch, None).await?;
            }
        }
        Ok(())
    }

    async fn relational_stage(&self, batch: &CoalescedBatch) -> ServiceResult<Committed> {
        let mut live = batch.clone();
        let skipped = self.drop_deleted_posts(&mut live).await?;
        if live.is_empty() {
            return Ok(Committed {
                live,
                outcomes: Vec::new(),
                skipped,
            });
        }

        let mut tx = self.ctx.relational(self.ctx.store().begin()).await?;
        let outcomes = match self.write(tx.as_mut(), &live).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                tx.rollback().await.ok();
                return Err(e);
            }
        };
        self.ctx.relational(tx.commit()).await?;

        Ok(Committed {
            live,
            outcomes,
            skipped,
        })
    }

    async fn write(&self, tx: &mut dyn StoreTransaction, batch: &CoalescedBatch) -> ServiceResult<Vec<UpsertOutcome>> {
        if batch.class == EventClass::Click {
            let updated = self
                .ctx
                .relational(tx.add_click_counts(&batch.click_counts()))
                .await?;
            debug!(posts = updated, "Added click counts");
            return Ok(Vec::new());
        }
        let outcomes = self
            .ctx
            .relational(tx.upsert_action_records(&batch.writes()))
            .await?;
        Ok(outcomes)
    }

    /// Events against deleted posts are dropped rather than resurrected
    async fn drop_deleted_posts(&self, batch: &mut CoalescedBatch) -> ServiceResult<usize> {
        if !batch.class.targets_post() {
            return Ok(0);
        }
        let targets = batch.targets();
        let live: HashSet<Snowflake> = self
            .ctx
            .relational(self.ctx.store().existing_posts(&targets))
            .await?
            .into_iter()
            .collect();
        let skipped = batch.retain_targets(&live);
        if skipped > 0 {
            debug!(class = %batch.class, skipped, "Skipped events for deleted posts");
        }
        Ok(skipped)
    }

    /// Fill missing mirrors and recount redelivered records. `None` outcomes recount everything.
    ///
    /// The request path already wrote the mirror and the collection set, and a
    /// request made after this batch was cut is newer than anything in it, so
    /// existing mirror entries are never overwritten here.
    async fn fast_stage(&self, batch: &CoalescedBatch, outcomes: Option<&[UpsertOutcome]>) -> ServiceResult<usize> {
        // Click counters were bumped by the request; nothing to mirror
        let Some(class) = batch.class.action_class() else {
            return Ok(0);
        };
        let keys = self.ctx.keys();
        let mut pipeline = CounterBatch::pipelined();
        let mut recounted = 0;

        for (index, event) in batch.actions.iter().enumerate() {
            let Some(record) = event.record() else {
                continue;
            };
            pipeline.hash_set_if_absent(
                keys.action_map(class, record.target_id),
                record.actor_id.member(),
                record.state.as_str(),
            );

            let redelivered = outcomes
                .map_or(true, |o| o.get(index).map_or(true, |outcome| !outcome.changed()));
            if redelivered {
                pipeline.extend(recount_ops(&self.ctx, &record).await?);
                recounted += 1;
            }
        }

        self.ctx.fast(self.ctx.counters().execute(pipeline)).await?;

        let gate = FilterGate::new(&self.ctx);
        let actors: HashSet<Snowflake> = batch
            .actions
            .iter()
            .filter(|e| !e.state.is_none())
            .map(|e| e.actor_id)
            .collect();
        for actor in actors {
            gate.record(class, actor).await?;
        }
        Ok(recounted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{id, Harness};
    use crate::services::{FollowService, VoteOutcome, VoteReconciler};
    use forum_core::{ActionClass, ActionRecord, ActionState, Metric, PendingEvent, StoreKind};

    fn follow(event: i64, actor: i64, target: i64, active: bool) -> PendingEvent {
        let state = if active {
            ActionState::Following
        } else {
            ActionState::None
        };
        let record = ActionRecord::new(id(actor), id(target), ActionClass::Follow, state).unwrap();
        PendingEvent::action(id(event), &record)
    }

    fn fast_retry_harness() -> Harness {
        Harness::with(|b| {
            b.drain_config(forum_common::DrainConfig {
                max_retries: 2,
                retry_backoff_ms: 1,
                ..forum_common::DrainConfig::default()
            })
        })
    }

    #[tokio::test]
    async fn test_fifteen_follow_events_leave_seven_edges() {
        let h = fast_retry_harness();
        let mut events = Vec::new();
        let mut next = 100;
        let mut push = |actor, target, active| {
            next += 1;
            events.push(follow(next, actor, target, active));
        };

        // 7 pairs end up following, two of them sent twice
        for target in 11..=17 {
            push(1, target, true);
        }
        push(1, 11, true);
        push(1, 12, true);
        // 3 pairs follow then unfollow
        for target in 21..=23 {
            push(1, target, true);
            push(1, target, false);
        }
        assert_eq!(events.len(), 15);

        let batch = CoalescedBatch::coalesce(EventClass::Follow, events);
        assert_eq!(batch.actions.len(), 10);

        let report = BatchFlusher::new(h.ctx.clone()).flush(batch).await.unwrap();
        assert_eq!(report.received, 15);
        assert_eq!(h.store.records(ActionClass::Follow).await.len(), 7);
    }

    #[tokio::test]
    async fn test_replayed_follow_batch_is_idempotent() {
        let h = fast_retry_harness();
        let flusher = BatchFlusher::new(h.ctx.clone());
        let batch = CoalescedBatch::coalesce(
            EventClass::Follow,
            vec![follow(1, 1, 2, true), follow(2, 3, 2, true), follow(3, 1, 4, true)],
        );

        // The request path already counted these in the fast store
        for (subject, metric, value) in [
            (id(2), Metric::Followers, 2.0),
            (id(4), Metric::Followers, 1.0),
            (id(1), Metric::Following, 2.0),
            (id(3), Metric::Following, 1.0),
        ] {
            let mut ops = CounterBatch::pipelined();
            ops.set_score(h.keys().metric(metric), subject.member(), value);
            h.ctx.counters().execute(ops).await.unwrap();
        }

        let first = flusher.flush(batch.clone()).await.unwrap();
        assert_eq!(first.recounted, 0);

        let second = flusher.flush(batch).await.unwrap();
        assert_eq!(second.recounted, 3);
        assert_eq!(h.counter(Metric::Followers, id(2)).await, Some(2.0));
        assert_eq!(h.counter(Metric::Followers, id(4)).await, Some(1.0));
        assert_eq!(h.counter(Metric::Following, id(1)).await, Some(2.0));
        assert_eq!(h.counter(Metric::Following, id(3)).await, Some(1.0));
        assert_eq!(h.store.records(ActionClass::Follow).await.len(), 3);
    }

    #[tokio::test]
    async fn test_redelivery_corrects_drifted_counter() {
        let h = fast_retry_harness();
        let flusher = BatchFlusher::new(h.ctx.clone());
        let batch = CoalescedBatch::coalesce(EventClass::Follow, vec![follow(1, 1, 2, true)]);
        flusher.flush(batch.clone()).await.unwrap();

        // A counter incremented twice for the same follow
        let mut ops = CounterBatch::pipelined();
        ops.set_score(h.keys().metric(Metric::Followers), id(2).member(), 2.0);
        h.ctx.counters().execute(ops).await.unwrap();

        flusher.flush(batch).await.unwrap();
        assert_eq!(h.counter(Metric::Followers, id(2)).await, Some(1.0));
    }

    #[tokio::test]
    async fn test_older_batch_keeps_newer_request_mirror() {
        let h = fast_retry_harness();
        let follows = FollowService::new(&h.ctx);
        follows.follow(id(1), id(2)).await.unwrap();
        follows.unfollow(id(1), id(2)).await.unwrap();

        // The batch was cut after the follow but before the unfollow
        let batch = CoalescedBatch::coalesce(EventClass::Follow, vec![follow(50, 1, 2, true)]);
        BatchFlusher::new(h.ctx.clone()).flush(batch).await.unwrap();

        let outcome = VoteReconciler::new(&h.ctx)
            .apply_vote(id(1), id(2), ActionClass::Follow, ActionState::None)
            .await
            .unwrap();
        assert_eq!(outcome, VoteOutcome::AlreadyInState(ActionState::None));
        assert_eq!(h.counter(Metric::Followers, id(2)).await, Some(0.0));
        assert_eq!(h.counter(Metric::Following, id(1)).await, Some(0.0));
    }

    #[tokio::test]
    async fn test_missing_mirror_is_filled_from_batch() {
        let h = fast_retry_harness();
        let batch = CoalescedBatch::coalesce(EventClass::Follow, vec![follow(1, 1, 2, true)]);
        BatchFlusher::new(h.ctx.clone()).flush(batch).await.unwrap();

        let state = VoteReconciler::new(&h.ctx)
            .current_state(id(1), id(2), ActionClass::Follow)
            .await
            .unwrap();
        assert_eq!(state, ActionState::Following);
    }

    #[tokio::test]
    async fn test_deleted_posts_are_skipped() {
        let h = fast_retry_harness();
        h.store.insert_post(id(10), id(1), 0).await;
        let collect = |event, post| {
            let record =
                ActionRecord::new(id(5), id(post), ActionClass::Collection, ActionState::Collected)
                    .unwrap();
            PendingEvent::action(id(event), &record)
        };
        let batch = CoalescedBatch::coalesce(EventClass::Collection, vec![collect(1, 10), collect(2, 11)]);

        let report = BatchFlusher::new(h.ctx.clone()).flush(batch).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.written, 1);
        assert_eq!(h.store.records(ActionClass::Collection).await.len(), 1);
    }

    #[tokio::test]
    async fn test_clicks_add_to_stored_column() {
        let h = fast_retry_harness();
        h.store.insert_post(id(10), id(1), 0).await;
        let click = |event| PendingEvent::click(id(event), id(5), id(10));
        let batch = CoalescedBatch::coalesce(EventClass::Click, vec![click(1), click(2), click(3)]);

        BatchFlusher::new(h.ctx.clone()).flush(batch).await.unwrap();
        let stored = h
            .ctx
            .store()
            .count_by_target_and_class(id(10), Metric::ClickCount)
            .await
            .unwrap();
        assert_eq!(stored, 3);
    }

    #[tokio::test]
    async fn test_relational_failure_exhausts_retries() {
        let h = fast_retry_harness();
        h.store.fail_next_commits(10);
        let batch = CoalescedBatch::coalesce(EventClass::Follow, vec![follow(1, 1, 2, true)]);

        let failure = BatchFlusher::new(h.ctx.clone()).flush(batch).await.unwrap_err();
        assert_eq!(failure.stage, FlushStage::Relational);
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.error.unavailable_store(), Some(StoreKind::Relational));
        assert!(h.store.records(ActionClass::Follow).await.is_empty());
    }

    #[tokio::test]
    async fn test_fast_store_failure_reports_stage() {
        let h = fast_retry_harness();
        h.counters.set_unavailable(true);
        let batch = CoalescedBatch::coalesce(EventClass::Follow, vec![follow(1, 1, 2, true)]);

        let failure = BatchFlusher::new(h.ctx.clone()).flush(batch).await.unwrap_err();
        assert_eq!(failure.stage, FlushStage::FastStore);
        // The relational half is already committed
        assert_eq!(h.store.records(ActionClass::Follow).await.len(), 1);

        h.counters.set_unavailable(false);
        let flusher = BatchFlusher::new(h.ctx.clone());
        flusher.retry_from(&failure.batch, failure.stage).await.unwrap();
        assert_eq!(h.counter(Metric::Followers, id(2)).await, Some(1.0));
        assert_eq!(h.counter(Metric::Following, id(1)).await, Some(1.0));
    }
}
