//! Follow service
//!
//! The social graph is the `Follow` action class seen from the user side.

use std::time::Duration;

use forum_core::{ActionClass, ActionState, FollowEdge, Metric, Snowflake};
use tracing::instrument;

use super::cache_fill::CacheFill;
use super::context::ServiceContext;
use super::error::ServiceResult;
use super::reconciler::{VoteOutcome, VoteReconciler};
use super::retry::RetryPolicy;

/// Follow lookups retry twice, 100ms then 200ms apart
const LOOKUP_RETRIES: u32 = 2;
const LOOKUP_BACKOFF: Duration = Duration::from_millis(100);

/// Follow service
pub struct FollowService<'a> {
    ctx: &'a ServiceContext,
}

impl<'a> FollowService<'a> {
    pub fn new(ctx: &'a ServiceContext) -> Self {
        Self { ctx }
    }

    /// Start following. Following twice is a no-op.
    #[instrument(skip(self))]
    pub async fn follow(&self, follower_id: Snowflake, following_id: Snowflake) -> ServiceResult<VoteOutcome> {
        self.set_edge(FollowEdge::new(follower_id, following_id, true)).await
    }

    /// Stop following. Unfollowing twice is a no-op.
    #[instrument(skip(self))]
    pub async fn unfollow(&self, follower_id: Snowflake, following_id: Snowflake) -> ServiceResult<VoteOutcome> {
        self.set_edge(FollowEdge::new(follower_id, following_id, false)).await
    }

    pub async fn set_edge(&self, edge: FollowEdge) -> ServiceResult<VoteOutcome> {
        let record = edge.into_record();
        VoteReconciler::new(self.ctx)
            .apply_vote(record.actor_id, record.target_id, record.class, record.state)
            .await
    }

    pub async fn is_following(&self, follower_id: Snowflake, following_id: Snowflake) -> ServiceResult<bool> {
        let reconciler = &VoteReconciler::new(self.ctx);
        RetryPolicy::new(LOOKUP_RETRIES, LOOKUP_BACKOFF)
            .run("follow lookup", || async move {
                let state = reconciler
                    .current_state(follower_id, following_id, ActionClass::Follow)
                    .await?;
                Ok(state == ActionState::Following)
            })
            .await
            .map_err(|(e, _)| e)
    }

    pub async fn follower_count(&self, user_id: Snowflake) -> ServiceResult<i64> {
        CacheFill::new(self.ctx)
            .get_counter_or_backfill(user_id, Metric::Followers)
            .await
    }

    pub async fn following_count(&self, user_id: Snowflake) -> ServiceResult<i64> {
        CacheFill::new(self.ctx)
            .get_counter_or_backfill(user_id, Metric::Following)
            .await
    }
}
