//! Test fixtures and data generators
//!
//! Provides reusable ids, seeded posts and event scripts for the scenarios.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;

use forum_core::{ActionClass, ActionRecord, ActionState, PendingEvent, Snowflake};

use crate::helpers::TestForum;

pub const COMMUNITY: i64 = 10;

pub fn id(n: i64) -> Snowflake {
    Snowflake::new(n)
}

/// Ids unique across test runs against the same live stores
pub fn unique_id() -> Snowflake {
    static BASE: OnceLock<i64> = OnceLock::new();
    static COUNTER: AtomicI64 = AtomicI64::new(0);
    let base = *BASE.get_or_init(|| chrono::Utc::now().timestamp_micros() * 100);
    Snowflake::new(base + COUNTER.fetch_add(1, Ordering::SeqCst))
}

/// Insert post rows into the in-memory relational store
pub async fn seed_posts(forum: &TestForum, posts: &[(i64, i64)]) {
    for &(post, created_at) in posts {
        forum.store.insert_post(id(post), id(COMMUNITY), created_at).await;
    }
}

/// One follow or unfollow, as the request path publishes it
pub fn follow_event(event_id: Snowflake, follower: Snowflake, following: Snowflake, active: bool) -> PendingEvent {
    let state = if active {
        ActionState::Following
    } else {
        ActionState::None
    };
    let record = ActionRecord::new(follower, following, ActionClass::Follow, state)
        .expect("follow records are well-formed");
    PendingEvent::action(event_id, &record)
}

/// Fifteen follow events over ten (follower, following) pairs.
///
/// Seven pairs end up following (two of them sent twice); the other three
/// follow and then unfollow. Every pair targets `following`.
pub fn follow_script(following: Snowflake, mut next_id: impl FnMut() -> Snowflake) -> Vec<PendingEvent> {
    let mut events = Vec::with_capacity(15);
    let followers: Vec<Snowflake> = (0..10).map(|_| next_id()).collect();

    for follower in &followers[..7] {
        events.push(follow_event(next_id(), *follower, following, true));
    }
    for follower in &followers[..2] {
        events.push(follow_event(next_id(), *follower, following, true));
    }
    for follower in &followers[7..] {
        events.push(follow_event(next_id(), *follower, following, true));
        events.push(follow_event(next_id(), *follower, following, false));
    }
    events
}
