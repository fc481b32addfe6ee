//! Post service
//!
//! Keeps the fast-store side of a post in step with its relational row:
//! registration in the feed indexes, click counting and deletion.

use forum_core::{
    ActionClass, CounterBatch, DomainError, EventClass, FeedOrder, Metric, PendingEvent,
    PersistencePolicy, Snowflake, TargetKind,
};
use tracing::{info, instrument, warn};

use super::cache_fill::CacheFill;
use super::context::ServiceContext;
use super::error::ServiceResult;

/// Counters every post starts with
const POST_METRICS: [Metric; 5] = [
    Metric::VoteUp,
    Metric::VoteDown,
    Metric::CommentCount,
    Metric::ClickCount,
    Metric::CollectionCount,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletedPost {
    pub post_id: Snowflake,
    pub comments: usize,
}

/// Post service
pub struct PostService<'a> {
    ctx: &'a ServiceContext,
}

impl<'a> PostService<'a> {
    pub fn new(ctx: &'a ServiceContext) -> Self {
        Self { ctx }
    }

    /// Register a post whose row was just inserted. Indexes that have not been
    /// materialized yet are left alone; they pick the post up when built.
    #[instrument(skip(self))]
    pub async fn on_post_created(&self, post_id: Snowflake, community_id: Snowflake, created_at: i64) -> ServiceResult<()> {
        let keys = self.ctx.keys();
        let counters = self.ctx.counters();
        let member = post_id.member();
        let mut batch = CounterBatch::atomic();

        let time_key = keys.feed_order(FeedOrder::Time);
        if self.ctx.fast(counters.exists(&time_key)).await? {
            batch.set_score(time_key, member.clone(), created_at as f64);
        }
        let score_key = keys.feed_order(FeedOrder::Score);
        if self.ctx.fast(counters.exists(&score_key)).await? {
            batch.set_score(score_key, member.clone(), 0.0);
        }
        let community_key = keys.community(community_id);
        if self.ctx.fast(counters.exists(&community_key)).await? {
            batch.set_add(community_key, member.clone());
        }
        for metric in POST_METRICS {
            batch.set_score(keys.metric(metric), member.clone(), 0.0);
        }

        self.ctx.fast(counters.execute(batch)).await?;
        info!(post_id = %post_id, community_id = %community_id, "Post registered");
        Ok(())
    }

    /// Count one click; returns the post's click count as now visible
    #[instrument(skip(self))]
    pub async fn record_click(&self, actor_id: Snowflake, post_id: Snowflake) -> ServiceResult<i64> {
        let store = self.ctx.store();
        if self
            .ctx
            .relational(store.existing_posts(&[post_id]))
            .await?
            .is_empty()
        {
            return Err(DomainError::PostNotFound(post_id).into());
        }

        let fill = CacheFill::new(self.ctx);
        match self.ctx.policies().policy_for(EventClass::Click) {
            PersistencePolicy::BatchedAsync => {
                let clicks = fill.increment_or_backfill(post_id, Metric::ClickCount, 1).await?;
                let event = PendingEvent::click(self.ctx.next_id(), actor_id, post_id);
                if let Err(e) = self.ctx.queued(self.ctx.queue().publish(&event)).await {
                    warn!(post_id = %post_id, error = %e, "Click counted but not queued");
                    return Err(e.into());
                }
                Ok(clicks)
            }
            PersistencePolicy::Synchronous => {
                let mut tx = self.ctx.relational(store.begin()).await?;
                if let Err(e) = self.ctx.relational(tx.add_click_counts(&[(post_id, 1)])).await {
                    tx.rollback().await.ok();
                    return Err(e.into());
                }
                self.ctx.relational(tx.commit()).await?;
                fill.refresh_after_write(post_id, Metric::ClickCount, 1).await
            }
        }
    }

    /// Delete a post with its comments and action records, then every
    /// fast-store key that mentions it. Users' collection sets are not swept.
    #[instrument(skip(self))]
    pub async fn delete_post(&self, post_id: Snowflake) -> ServiceResult<DeletedPost> {
        let store = self.ctx.store();
        let community_id = self
            .ctx
            .relational(store.post_community(post_id))
            .await?
            .ok_or(DomainError::PostNotFound(post_id))?;
        let comments = self.ctx.relational(store.comments_by_post(post_id)).await?;

        self.ctx
            .relational(store.delete_target(TargetKind::Post, post_id))
            .await?;

        let keys = self.ctx.keys();
        let member = post_id.member();
        let mut batch = CounterBatch::atomic();
        for order in [FeedOrder::Time, FeedOrder::Score] {
            batch
                .remove_member(keys.feed_order(order), member.clone())
                .delete(keys.community_feed(order, community_id));
        }
        batch.set_remove(keys.community(community_id), member.clone());
        for metric in POST_METRICS {
            batch.remove_member(keys.metric(metric), member.clone());
        }
        batch
            .delete(keys.action_map(ActionClass::PostVote, post_id))
            .delete(keys.action_map(ActionClass::Collection, post_id))
            .delete(keys.post_roots(post_id))
            .remove_member(keys.comment_indexed(), member.clone());

        for comment in &comments {
            let id = comment.comment_id;
            let member = id.member();
            batch
                .delete(keys.child_set(id))
                .delete(keys.action_map(ActionClass::CommentVote, id))
                .remove_member(keys.metric(Metric::CommentVoteUp), member.clone())
                .remove_member(keys.metric(Metric::CommentVoteDown), member.clone())
                .remove_member(keys.metric(Metric::Descendants), member.clone())
                .remove_member(keys.comment_time(), member.clone())
                .remove_member(keys.comment_score(), member);
        }
        self.ctx.fast(self.ctx.counters().execute(batch)).await?;

        info!(post_id = %post_id, comments = comments.len(), "Post deleted");
        Ok(DeletedPost {
            post_id,
            comments: comments.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::comment::{CommentService, CreateCommentRequest};
    use crate::services::feed::FeedService;
    use crate::services::reconciler::VoteReconciler;
    use crate::test_support::{id, Harness};
    use forum_core::{ActionState, CounterStore, FeedQuery, PolicyTable};

    const POST: i64 = 100;
    const COMMUNITY: i64 = 10;

    async fn harness_with(policies: PolicyTable) -> Harness {
        let h = Harness::with(|b| b.policies(policies));
        h.store.insert_post(id(POST), id(COMMUNITY), 1_000).await;
        h
    }

    async fn harness() -> Harness {
        harness_with(PolicyTable::default()).await
    }

    #[tokio::test]
    async fn test_register_initializes_counters_only_for_missing_indexes() {
        let h = harness().await;
        PostService::new(&h.ctx)
            .on_post_created(id(POST), id(COMMUNITY), 1_000)
            .await
            .unwrap();

        assert_eq!(h.counter(Metric::VoteUp, id(POST)).await, Some(0.0));
        assert_eq!(h.counter(Metric::ClickCount, id(POST)).await, Some(0.0));
        assert!(!h.counters.exists(&h.keys().feed_order(FeedOrder::Time)).await.unwrap());
        assert!(!h.counters.exists(&h.keys().community(id(COMMUNITY))).await.unwrap());
    }

    #[tokio::test]
    async fn test_register_joins_existing_indexes() {
        let h = harness().await;
        let feed = FeedService::new(&h.ctx);
        let community = FeedQuery {
            community_id: Some(id(COMMUNITY)),
            ..FeedQuery::default()
        };
        feed.post_ids(community).await.unwrap();

        h.store.insert_post(id(101), id(COMMUNITY), 2_000).await;
        PostService::new(&h.ctx)
            .on_post_created(id(101), id(COMMUNITY), 2_000)
            .await
            .unwrap();

        assert_eq!(
            h.counters.score(&h.keys().feed_order(FeedOrder::Time), "101").await.unwrap(),
            Some(2_000.0)
        );
        assert!(h
            .counters
            .set_is_member(&h.keys().community(id(COMMUNITY)), "101")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_batched_click_counts_and_queues() {
        let h = harness().await;
        let posts = PostService::new(&h.ctx);
        assert_eq!(posts.record_click(id(7), id(POST)).await.unwrap(), 1);
        assert_eq!(posts.record_click(id(8), id(POST)).await.unwrap(), 2);
        assert_eq!(h.queue.pending_len(EventClass::Click), 2);
    }

    #[tokio::test]
    async fn test_synchronous_click_writes_column() {
        let h = harness_with(
            PolicyTable::default().with(EventClass::Click, PersistencePolicy::Synchronous),
        )
        .await;
        let posts = PostService::new(&h.ctx);
        assert_eq!(posts.record_click(id(7), id(POST)).await.unwrap(), 1);
        assert_eq!(posts.record_click(id(7), id(POST)).await.unwrap(), 2);
        assert_eq!(
            h.ctx
                .store()
                .count_by_target_and_class(id(POST), Metric::ClickCount)
                .await
                .unwrap(),
            2
        );
        assert_eq!(h.queue.pending_len(EventClass::Click), 0);
    }

    #[tokio::test]
    async fn test_click_on_missing_post() {
        let h = harness().await;
        let err = PostService::new(&h.ctx)
            .record_click(id(7), id(404))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_post_clears_every_mirror() {
        let h = harness().await;
        let feed = FeedService::new(&h.ctx);
        feed.post_ids(FeedQuery::default()).await.unwrap();

        VoteReconciler::new(&h.ctx)
            .apply_vote(id(7), id(POST), ActionClass::PostVote, ActionState::Like)
            .await
            .unwrap();
        let comment = CommentService::new(&h.ctx)
            .create(CreateCommentRequest {
                post_id: id(POST),
                parent_comment_id: None,
                author_id: id(7),
                content: "hello".into(),
            })
            .await
            .unwrap();

        let deleted = PostService::new(&h.ctx).delete_post(id(POST)).await.unwrap();
        assert_eq!(deleted.comments, 1);

        assert!(h.store.records(ActionClass::PostVote).await.is_empty());
        assert_eq!(h.store.comment_count().await, 0);
        assert_eq!(h.counter(Metric::VoteUp, id(POST)).await, None);
        assert!(!h
            .counters
            .exists(&h.keys().action_map(ActionClass::PostVote, id(POST)))
            .await
            .unwrap());
        assert_eq!(
            h.counters
                .score(&h.keys().comment_time(), &comment.comment_id.member())
                .await
                .unwrap(),
            None
        );
        assert!(feed.post_ids(FeedQuery::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_post() {
        let h = harness().await;
        let err = PostService::new(&h.ctx).delete_post(id(404)).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
