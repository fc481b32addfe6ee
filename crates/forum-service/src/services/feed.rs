//! Ordered post feeds served from the fast store.
//!
//! The order indexes (`post:create_time`, `post:score`) and community sets are
//! materialized from the relational store the first time they are missing.

use std::time::Duration;

use forum_core::{CounterBatch, FeedOrder, FeedQuery, Snowflake};
use tracing::{debug, info, instrument, warn};

use super::context::ServiceContext;
use super::error::ServiceResult;

/// Lifetime of a community/order intersection
pub const COMMUNITY_FEED_TTL: Duration = Duration::from_secs(60);

/// Feed service
pub struct FeedService<'a> {
    ctx: &'a ServiceContext,
}

impl<'a> FeedService<'a> {
    pub fn new(ctx: &'a ServiceContext) -> Self {
        Self { ctx }
    }

    /// One page of post ids in the requested order
    #[instrument(skip(self))]
    pub async fn post_ids(&self, query: FeedQuery) -> ServiceResult<Vec<Snowflake>> {
        let keys = self.ctx.keys();
        let order_key = keys.feed_order(query.order);
        self.ensure_order_index(query.order).await?;

        let source = match query.community_id {
            None => order_key,
            Some(community) => {
                self.ensure_community(community).await?;
                let dest = keys.community_feed(query.order, community);
                let counters = self.ctx.counters();
                if !self.ctx.fast(counters.exists(&dest)).await? {
                    let sources = [order_key, keys.community(community)];
                    self.ctx
                        .fast(counters.intersect_max(&dest, &sources, COMMUNITY_FEED_TTL))
                        .await?;
                    debug!(key = %dest, "Cached community feed");
                }
                dest
            }
        };

        let members = self
            .ctx
            .fast(self.ctx.counters().range_by_score_desc(
                &source,
                query.page.offset(),
                query.page.limit(),
            ))
            .await?;

        Ok(members
            .into_iter()
            .filter_map(|m| match Snowflake::parse(&m) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(key = %source, member = %m, error = %e, "Skipping unreadable post id");
                    None
                }
            })
            .collect())
    }

    async fn ensure_order_index(&self, order: FeedOrder) -> ServiceResult<()> {
        let key = self.ctx.keys().feed_order(order);
        if self.ctx.fast(self.ctx.counters().exists(&key)).await? {
            return Ok(());
        }

        let scores = self
            .ctx
            .relational(self.ctx.store().post_scores(order))
            .await?;
        if scores.is_empty() {
            return Ok(());
        }
        let mut batch = CounterBatch::pipelined();
        for (post, score) in &scores {
            batch.set_score(key.clone(), post.member(), *score);
        }
        self.ctx.fast(self.ctx.counters().execute(batch)).await?;
        info!(key = %key, posts = scores.len(), "Materialized feed index");
        Ok(())
    }

    async fn ensure_community(&self, community: Snowflake) -> ServiceResult<()> {
        let key = self.ctx.keys().community(community);
        if self.ctx.fast(self.ctx.counters().exists(&key)).await? {
            return Ok(());
        }

        let posts = self
            .ctx
            .relational(self.ctx.store().community_posts(community))
            .await?;
        if posts.is_empty() {
            return Ok(());
        }
        let mut batch = CounterBatch::pipelined();
        for post in &posts {
            batch.set_add(key.clone(), post.member());
        }
        self.ctx.fast(self.ctx.counters().execute(batch)).await?;
        info!(community_id = %community, posts = posts.len(), "Materialized community set");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{id, Harness};
    use forum_core::{ActionClass, ActionRecord, ActionState, PageQuery};

    async fn harness() -> Harness {
        let h = Harness::new();
        // (post, community, created_at)
        for (post, community, created) in [(1, 10, 100), (2, 10, 300), (3, 20, 200), (4, 10, 400)] {
            h.store.insert_post(id(post), id(community), created).await;
        }
        let like = |actor, post| {
            ActionRecord::new(id(actor), id(post), ActionClass::PostVote, ActionState::Like).unwrap()
        };
        h.store.seed_record(id(901), like(50, 1)).await;
        h.store.seed_record(id(902), like(51, 1)).await;
        h.store.seed_record(id(903), like(50, 3)).await;
        h
    }

    fn query(order: FeedOrder, community: Option<i64>) -> FeedQuery {
        FeedQuery {
            order,
            community_id: community.map(id),
            page: PageQuery::default(),
        }
    }

    #[tokio::test]
    async fn test_time_order_materializes_index() {
        let h = harness().await;
        let feed = FeedService::new(&h.ctx);
        let ids = feed.post_ids(query(FeedOrder::Time, None)).await.unwrap();
        assert_eq!(ids, vec![id(4), id(2), id(3), id(1)]);
        assert!(h
            .ctx
            .counters()
            .exists(&h.keys().feed_order(FeedOrder::Time))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_score_order() {
        let h = harness().await;
        let ids = FeedService::new(&h.ctx)
            .post_ids(query(FeedOrder::Score, None))
            .await
            .unwrap();
        assert_eq!(ids[0], id(1));
        assert_eq!(ids[1], id(3));
    }

    #[tokio::test]
    async fn test_community_feed_intersects() {
        let h = harness().await;
        let feed = FeedService::new(&h.ctx);
        let ids = feed.post_ids(query(FeedOrder::Time, Some(10))).await.unwrap();
        assert_eq!(ids, vec![id(4), id(2), id(1)]);
        assert!(h
            .ctx
            .counters()
            .exists(&h.keys().community_feed(FeedOrder::Time, id(10)))
            .await
            .unwrap());

        let ids = feed.post_ids(query(FeedOrder::Time, Some(20))).await.unwrap();
        assert_eq!(ids, vec![id(3)]);
    }

    #[tokio::test]
    async fn test_paging() {
        let h = harness().await;
        let mut q = query(FeedOrder::Time, None);
        q.page = PageQuery::new(2, 3).unwrap();
        let ids = FeedService::new(&h.ctx).post_ids(q).await.unwrap();
        assert_eq!(ids, vec![id(1)]);
    }

    #[tokio::test]
    async fn test_empty_community() {
        let h = harness().await;
        let ids = FeedService::new(&h.ctx)
            .post_ids(query(FeedOrder::Score, Some(99)))
            .await
            .unwrap();
        assert!(ids.is_empty());
    }
}
