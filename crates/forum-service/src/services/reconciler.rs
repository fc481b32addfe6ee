//! Vote and action reconciliation.
//!
//! A request reads the actor's current state (fast-store mirror, then the
//! membership filter, then the relational store), turns old -> new into
//! counter deltas and commits the new state with every delta in one MULTI.
//! Whether the relational write happens inside the request or later through
//! the drain is decided per class by the [`PolicyTable`](forum_core::PolicyTable).
//!
//! The old-state read and the new-state write are not atomic. Two concurrent
//! requests by the same actor on the same target can both compute deltas
//! against the same old state; the last write decides the stored state.

use forum_core::{
    counter_deltas, score_delta, ActionClass, ActionRecord, ActionState, ActionWrite,
    CounterBatch, CounterDelta, DomainError, EventClass, Metric, PendingEvent,
    PersistencePolicy, Snowflake, UpsertOutcome,
};
use tracing::{debug, info, instrument, warn};

use super::cache_fill::CacheFill;
use super::context::ServiceContext;
use super::error::{ServiceError, ServiceResult};
use super::filter_gate::{FilterGate, FilterVerdict};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    /// The actor already held the requested state; nothing was written
    AlreadyInState(ActionState),
    Applied {
        previous: ActionState,
        current: ActionState,
        deltas: Vec<CounterDelta>,
    },
}

impl VoteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// The id a metric is keyed by for this record: the actor for `Following`, else the target
pub(crate) fn counter_subject(metric: Metric, record: &ActionRecord) -> Snowflake {
    if metric.keyed_by_actor() {
        record.actor_id
    } else {
        record.target_id
    }
}

/// Ops resetting every counter `record` feeds to its authoritative value
pub(crate) async fn recount_ops(ctx: &ServiceContext, record: &ActionRecord) -> ServiceResult<CounterBatch> {
    let keys = ctx.keys();
    let mut batch = CounterBatch::pipelined();
    let mut net = 0;

    for &metric in Metric::affected_by(record.class) {
        let subject = counter_subject(metric, record);
        let count = ctx
            .relational(ctx.store().count_by_target_and_class(subject, metric))
            .await?;
        match metric {
            Metric::VoteUp | Metric::CommentVoteUp => net += count,
            Metric::VoteDown | Metric::CommentVoteDown => net -= count,
            _ => {}
        }
        batch.set_score(keys.metric(metric), subject.member(), count as f64);
    }

    // Score indexes are only touched when the entry is already there
    let score_key = match record.class {
        ActionClass::PostVote => Some(keys.feed_order(forum_core::FeedOrder::Score)),
        ActionClass::CommentVote => Some(keys.comment_score()),
        ActionClass::Collection | ActionClass::Follow => None,
    };
    if let Some(score_key) = score_key {
        let member = record.target_id.member();
        if ctx.fast(ctx.counters().score(&score_key, &member)).await?.is_some() {
            batch.set_score(score_key, member, net as f64);
        }
    }
    Ok(batch)
}

pub struct VoteReconciler<'a> {
    ctx: &'a ServiceContext,
}

impl<'a> VoteReconciler<'a> {
    pub fn new(ctx: &'a ServiceContext) -> Self {
        Self { ctx }
    }

    /// Move `actor`'s stance on `target` to `new_state`
    #[instrument(skip(self))]
    pub async fn apply_vote(
        &self,
        actor_id: Snowflake,
        target_id: Snowflake,
        class: ActionClass,
        new_state: ActionState,
    ) -> ServiceResult<VoteOutcome> {
        let record = ActionRecord::new(actor_id, target_id, class, new_state)?;
        self.ensure_target(&record).await?;

        let previous = self.current_state(actor_id, target_id, class).await?;
        if previous == new_state {
            debug!(actor_id = %actor_id, target_id = %target_id, class = %class, "Already in state");
            return Ok(VoteOutcome::AlreadyInState(previous));
        }

        let deltas = counter_deltas(class, previous, new_state)?;

        // Counters must exist before they are incremented
        let fill = CacheFill::new(self.ctx);
        for delta in &deltas {
            fill.get_counter_or_backfill(counter_subject(delta.metric, &record), delta.metric)
                .await?;
        }

        // Recorded before any write so the filter never misses a stored actor
        FilterGate::new(self.ctx).record(class, actor_id).await?;

        let policy = self.ctx.policies().policy_for(EventClass::from(class));
        let mut batch = self.mirror_batch(&record, &deltas);

        if policy == PersistencePolicy::Synchronous {
            let write = ActionWrite::new(self.ctx.next_id(), record);
            let outcome = self
                .ctx
                .relational(self.ctx.store().upsert_action_record(write))
                .await?;
            if outcome == UpsertOutcome::Unchanged {
                // The mirror was stale; the stored state already matched
                warn!(
                    actor_id = %actor_id,
                    target_id = %target_id,
                    class = %class,
                    mirrored = %previous,
                    "Action mirror disagreed with relational store, recounting"
                );
                batch = CounterBatch::atomic();
                batch.hash_set(
                    self.ctx.keys().action_map(class, target_id),
                    actor_id.member(),
                    new_state.as_str(),
                );
                batch.extend(recount_ops(self.ctx, &record).await?);
            }
        }

        self.ctx.fast(self.ctx.counters().execute(batch)).await?;

        if policy == PersistencePolicy::BatchedAsync {
            let event = PendingEvent::action(self.ctx.next_id(), &record);
            if let Err(e) = self.ctx.queued(self.ctx.queue().publish(&event)).await {
                warn!(
                    event_id = %event.event_id,
                    class = %class,
                    error = %e,
                    "Fast store updated but the event was not queued"
                );
                return Err(e.into());
            }
        }

        info!(
            actor_id = %actor_id,
            target_id = %target_id,
            class = %class,
            from = %previous,
            to = %new_state,
            "Action applied"
        );

        Ok(VoteOutcome::Applied {
            previous,
            current: new_state,
            deltas,
        })
    }

    /// The actor's current state: mirror, then filter, then relational store
    #[instrument(skip(self))]
    pub async fn current_state(
        &self,
        actor_id: Snowflake,
        target_id: Snowflake,
        class: ActionClass,
    ) -> ServiceResult<ActionState> {
        let map = self.ctx.keys().action_map(class, target_id);
        let mirrored = self
            .ctx
            .fast(self.ctx.counters().hash_get(&map, &actor_id.member()))
            .await?;

        if let Some(raw) = mirrored {
            match raw.parse::<ActionState>() {
                Ok(state) if class.admits(state) => return Ok(state),
                _ => warn!(key = %map, value = %raw, "Unreadable action mirror entry"),
            }
        }

        let verdict = FilterGate::new(self.ctx).check(class, actor_id).await?;
        if !verdict.needs_lookup() {
            return Ok(ActionState::None);
        }

        let stored = self
            .ctx
            .relational(self.ctx.store().get_action_record(actor_id, target_id, class))
            .await?;
        match stored {
            Some(record) => Ok(record.state),
            None => {
                if verdict == FilterVerdict::MaybePresent {
                    let inconsistency = DomainError::InconsistentState(format!(
                        "filter reports actor {actor_id} for {class} but no record exists"
                    ));
                    debug!(error = %inconsistency, "Filter false positive");
                }
                Ok(ActionState::None)
            }
        }
    }

    async fn ensure_target(&self, record: &ActionRecord) -> ServiceResult<()> {
        let target = record.target_id;
        match record.class {
            ActionClass::PostVote | ActionClass::Collection => {
                let found = self
                    .ctx
                    .relational(self.ctx.store().existing_posts(&[target]))
                    .await?;
                if found.is_empty() {
                    return Err(DomainError::PostNotFound(target).into());
                }
            }
            ActionClass::CommentVote => {
                let found = self.ctx.relational(self.ctx.store().comment(target)).await?;
                if found.is_none() {
                    return Err(DomainError::CommentNotFound(target).into());
                }
            }
            ActionClass::Follow => {
                if record.actor_id == target {
                    return Err(ServiceError::validation("users cannot follow themselves"));
                }
            }
        }
        Ok(())
    }

    /// New state plus every delta, applied together
    fn mirror_batch(&self, record: &ActionRecord, deltas: &[CounterDelta]) -> CounterBatch {
        let keys = self.ctx.keys();
        let mut batch = CounterBatch::atomic();
        batch.hash_set(
            keys.action_map(record.class, record.target_id),
            record.actor_id.member(),
            record.state.as_str(),
        );

        for delta in deltas {
            batch.increment_by(
                keys.metric(delta.metric),
                counter_subject(delta.metric, record).member(),
                delta.delta as f64,
            );
        }

        let score = score_delta(deltas);
        if score != 0 {
            match record.class {
                ActionClass::PostVote => {
                    batch.increment_existing(
                        keys.feed_order(forum_core::FeedOrder::Score),
                        record.target_id.member(),
                        score as f64,
                    );
                }
                ActionClass::CommentVote => {
                    batch.increment_existing(keys.comment_score(), record.target_id.member(), score as f64);
                }
                ActionClass::Collection | ActionClass::Follow => {}
            }
        }

        if record.class == ActionClass::Collection {
            let collection = keys.user_collection(record.actor_id);
            if record.state.is_none() {
                batch.set_remove(collection, record.target_id.member());
            } else {
                batch.set_add(collection, record.target_id.member());
            }
        }
        batch
    }
}
