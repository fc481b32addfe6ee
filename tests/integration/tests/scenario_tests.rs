//! Cross-crate scenarios over the in-memory stores
//!
//! The last section runs against PostgreSQL and Redis and is skipped unless
//! DATABASE_URL and REDIS_URL are set.
//!
//! Run with: cargo test -p integration-tests --test scenario_tests

use std::time::Duration;

use forum_cache::{KeySpace, RedisEventQueue, RedisPool, RedisPoolConfig};
use forum_core::{
    ActionClass, ActionRecord, ActionState, EventClass, EventQueue, FeedOrder, FeedQuery, Metric,
    PageQuery, PersistencePolicy, PendingEvent, PolicyTable, Snowflake,
};
use forum_service::services::{CacheFill, CreateCommentRequest};
use forum_service::{
    CommentService, CommentTree, FeedService, FollowService, ForumRuntime, PostService,
    VoteReconciler,
};
use integration_tests::{
    check_test_env, follow_script, id, live_context, seed_posts, test_config, unique_id,
    TestForum, COMMUNITY,
};

// ============================================================================
// Votes
// ============================================================================

#[tokio::test]
async fn test_like_dislike_none_scenario() {
    let forum = TestForum::new();
    seed_posts(&forum, &[(1, 1_000)]).await;
    let votes = VoteReconciler::new(&forum.ctx);
    let (actor, post) = (id(500), id(1));

    votes.apply_vote(actor, post, ActionClass::PostVote, ActionState::Like).await.unwrap();
    assert_eq!(forum.counter(Metric::VoteUp, post).await, 1);

    votes.apply_vote(actor, post, ActionClass::PostVote, ActionState::Dislike).await.unwrap();
    assert_eq!(forum.counter(Metric::VoteUp, post).await, 0);
    assert_eq!(forum.counter(Metric::VoteDown, post).await, 1);

    votes.apply_vote(actor, post, ActionClass::PostVote, ActionState::None).await.unwrap();
    assert_eq!(forum.counter(Metric::VoteUp, post).await, 0);
    assert_eq!(forum.counter(Metric::VoteDown, post).await, 0);

    // Votes are synchronous, so the relational store agrees at every step
    let store = forum.ctx.store();
    assert_eq!(store.count_by_target_and_class(post, Metric::VoteUp).await.unwrap(), 0);
    assert_eq!(store.count_by_target_and_class(post, Metric::VoteDown).await.unwrap(), 0);
}

#[tokio::test]
async fn test_backfill_returns_stored_count() {
    let forum = TestForum::new();
    seed_posts(&forum, &[(1, 1_000)]).await;
    for actor in 1..=4 {
        let like = ActionRecord::new(id(actor), id(1), ActionClass::PostVote, ActionState::Like).unwrap();
        forum.store.seed_record(id(900 + actor), like).await;
    }

    let ups = CacheFill::new(&forum.ctx)
        .get_counter_or_backfill(id(1), Metric::VoteUp)
        .await
        .unwrap();
    assert_eq!(ups, 4);
    assert_eq!(forum.counter(Metric::VoteUp, id(1)).await, 4);

    // A fifth vote builds on the backfilled value
    VoteReconciler::new(&forum.ctx)
        .apply_vote(id(5), id(1), ActionClass::PostVote, ActionState::Like)
        .await
        .unwrap();
    assert_eq!(forum.counter(Metric::VoteUp, id(1)).await, 5);
}

#[tokio::test]
async fn test_votes_reorder_the_score_feed() {
    let forum = TestForum::new();
    seed_posts(&forum, &[(1, 1_000), (2, 2_000)]).await;
    let feed = FeedService::new(&forum.ctx);
    let by_score = FeedQuery {
        order: FeedOrder::Score,
        community_id: Some(id(COMMUNITY)),
        page: PageQuery::default(),
    };
    assert_eq!(feed.post_ids(by_score).await.unwrap().len(), 2);

    VoteReconciler::new(&forum.ctx)
        .apply_vote(id(50), id(1), ActionClass::PostVote, ActionState::Like)
        .await
        .unwrap();
    let global = FeedQuery {
        order: FeedOrder::Score,
        ..FeedQuery::default()
    };
    assert_eq!(feed.post_ids(global).await.unwrap()[0], id(1));
}

// ============================================================================
// Follows through the drain
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_fifteen_follow_events_leave_seven_edges() {
    let forum = TestForum::new();
    let star = id(1_000);
    let mut next = 0;
    let events = follow_script(star, || {
        next += 1;
        id(next)
    });
    assert_eq!(events.len(), 15);
    for event in &events {
        forum.queue.publish(event).await.unwrap();
    }

    let runtime = ForumRuntime::init(forum.ctx.clone()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    runtime.shutdown().await;

    let edges = forum.store.records(ActionClass::Follow).await;
    assert_eq!(edges.len(), 7);
    assert!(edges.iter().all(|e| e.state == ActionState::Following));
    assert_eq!(forum.queue.in_flight_len(EventClass::Follow), 0);

    // Nothing was counted on the request path, so the count comes from the rows
    let follows = FollowService::new(&forum.ctx);
    assert_eq!(follows.follower_count(star).await.unwrap(), 7);
}

#[tokio::test(start_paused = true)]
async fn test_request_path_and_drain_agree() {
    let forum = TestForum::new();
    let runtime = ForumRuntime::init(forum.ctx.clone()).await.unwrap();
    let follows = FollowService::new(runtime.context());

    for follower in [1, 2, 3] {
        follows.follow(id(follower), id(9)).await.unwrap();
    }
    follows.unfollow(id(2), id(9)).await.unwrap();
    assert_eq!(follows.follower_count(id(9)).await.unwrap(), 2);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(forum.store.records(ActionClass::Follow).await.len(), 2);

    // The drain recounts only replayed rows, so the counters are untouched
    assert_eq!(follows.follower_count(id(9)).await.unwrap(), 2);
    assert_eq!(follows.following_count(id(2)).await.unwrap(), 0);
    assert!(!follows.is_following(id(2), id(9)).await.unwrap());
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_synchronous_follow_policy_writes_through() {
    let forum = TestForum::with_policies(
        PolicyTable::default().with(EventClass::Follow, PersistencePolicy::Synchronous),
    );
    let follows = FollowService::new(&forum.ctx);
    follows.follow(id(1), id(2)).await.unwrap();

    assert_eq!(forum.store.records(ActionClass::Follow).await.len(), 1);
    assert_eq!(forum.queue.pending_len(EventClass::Follow), 0);
}

// ============================================================================
// Comments
// ============================================================================

fn comment(parent: Option<Snowflake>, content: &str) -> CreateCommentRequest {
    CreateCommentRequest {
        post_id: id(1),
        parent_comment_id: parent,
        author_id: id(77),
        content: content.to_string(),
    }
}

#[tokio::test]
async fn test_delete_root_removes_whole_subtree() {
    let forum = TestForum::new();
    seed_posts(&forum, &[(1, 1_000)]).await;
    let comments = CommentService::new(&forum.ctx);
    let tree = CommentTree::new(&forum.ctx);

    let root = comments.create(comment(None, "root")).await.unwrap();
    let other = comments.create(comment(None, "other root")).await.unwrap();
    tree.get_root_comments(id(1), PageQuery::default()).await.unwrap();

    let a = comments.create(comment(Some(root.comment_id), "a")).await.unwrap();
    let b = comments.create(comment(Some(root.comment_id), "b")).await.unwrap();
    let a1 = comments.create(comment(Some(a.comment_id), "a1")).await.unwrap();
    let subtree = [root.comment_id, a.comment_id, b.comment_id, a1.comment_id];
    assert_eq!(forum.counter(Metric::Descendants, root.comment_id).await, 3);
    let total = CacheFill::new(&forum.ctx)
        .get_counter_or_backfill(id(1), Metric::CommentCount)
        .await
        .unwrap();
    assert_eq!(total, 5);

    let deleted = comments.delete(root.comment_id).await.unwrap();
    assert_eq!(deleted.removed, 4);
    assert_eq!(forum.store.comment_count().await, 1);

    let counters = forum.ctx.counters();
    for comment_id in subtree {
        assert!(!counters.exists(&forum.keys().child_set(comment_id)).await.unwrap());
    }
    assert_eq!(
        tree.get_root_comments(id(1), PageQuery::default()).await.unwrap(),
        vec![other.comment_id]
    );
    assert_eq!(forum.counter(Metric::CommentCount, id(1)).await, 1);
}

#[tokio::test]
async fn test_deleted_post_leaves_no_index_behind() {
    let forum = TestForum::new();
    seed_posts(&forum, &[(1, 1_000), (2, 2_000)]).await;
    let feed = FeedService::new(&forum.ctx);
    let in_community = FeedQuery {
        community_id: Some(id(COMMUNITY)),
        ..FeedQuery::default()
    };
    assert_eq!(feed.post_ids(in_community).await.unwrap(), vec![id(2), id(1)]);

    let comments = CommentService::new(&forum.ctx);
    let root = comments.create(comment(None, "root")).await.unwrap();
    comments.create(comment(Some(root.comment_id), "reply")).await.unwrap();

    let deleted = PostService::new(&forum.ctx).delete_post(id(1)).await.unwrap();
    assert_eq!(deleted.comments, 2);
    assert_eq!(feed.post_ids(in_community).await.unwrap(), vec![id(2)]);
    assert_eq!(forum.store.comment_count().await, 0);
}

// ============================================================================
// Live stores
// ============================================================================

#[tokio::test]
async fn test_live_bloom_filter_has_no_false_negatives() {
    if !check_test_env().await {
        return;
    }

    let config = test_config().unwrap();
    let ctx = live_context(&config).await.unwrap();
    let filter = ctx.filter();
    let name = format!("{}bf:it:{}", config.redis.key_prefix, unique_id());
    filter.reserve(&name, 0.01, 1_000).await.unwrap();

    let added: Vec<String> = (0..200).map(|_| unique_id().member()).collect();
    for member in &added {
        filter.add(&name, member).await.unwrap();
    }
    for member in &added {
        assert!(filter.may_contain(&name, member).await.unwrap());
    }

    let mut false_positives = 0;
    for _ in 0..200 {
        if filter.may_contain(&name, &unique_id().member()).await.unwrap() {
            false_positives += 1;
        }
    }
    assert!(false_positives < 20, "{false_positives} false positives");
}

#[tokio::test]
async fn test_live_follow_drain() {
    if !check_test_env().await {
        return;
    }

    let config = test_config().unwrap();
    let ctx = live_context(&config).await.unwrap();
    let star = unique_id();
    let events = follow_script(star, unique_id);
    for event in &events {
        ctx.queue().publish(event).await.unwrap();
    }

    let runtime = ForumRuntime::init(ctx.clone()).await.unwrap();
    tokio::time::sleep(ctx.drain_config().max_wait() * 3).await;
    runtime.shutdown().await;

    assert_eq!(
        ctx.store().count_by_target_and_class(star, Metric::Followers).await.unwrap(),
        7
    );
}

#[tokio::test]
async fn test_live_recovered_deliveries_keep_their_order() {
    if !check_test_env().await {
        return;
    }

    let config = test_config().unwrap();
    let pool = RedisPool::new(RedisPoolConfig::from(&config.redis)).unwrap();
    let keys = KeySpace::new(format!("{}it:{}:", config.redis.key_prefix, unique_id()));
    let queue = RedisEventQueue::new(pool, keys);

    let clicks: Vec<PendingEvent> = (0..3)
        .map(|_| PendingEvent::click(unique_id(), unique_id(), unique_id()))
        .collect();
    for click in &clicks {
        queue.publish(click).await.unwrap();
    }

    // Two deliveries taken and never acknowledged
    let mut stale = queue.consume(EventClass::Click).await.unwrap();
    assert_eq!(stale.next().await.unwrap().unwrap().event, clicks[0]);
    assert_eq!(stale.next().await.unwrap().unwrap().event, clicks[1]);
    drop(stale);

    assert_eq!(queue.recover(EventClass::Click).await.unwrap(), 2);
    let mut consumer = queue.consume(EventClass::Click).await.unwrap();
    let mut replayed = Vec::new();
    for _ in 0..3 {
        let delivery = consumer.next().await.unwrap().unwrap();
        consumer.ack(&[delivery.tag]).await.unwrap();
        replayed.push(delivery.event);
    }
    assert_eq!(replayed, clicks);
}
