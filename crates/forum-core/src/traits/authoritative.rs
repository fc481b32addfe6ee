//! Relational store port.
//!
//! The relational store is the source of truth for action records, comments and
//! posts. Multi-row writes go through a [`StoreTransaction`] so the caller decides
//! where the atomicity boundary sits.

use async_trait::async_trait;

use crate::entities::{ActionClass, ActionRecord, CommentNode, FeedOrder, Metric, TargetKind, UpsertOutcome};
use crate::error::DomainError;
use crate::value_objects::Snowflake;

/// Result type for store operations
pub type RepoResult<T> = Result<T, DomainError>;

/// A record to upsert, with the row id to use if it has to be inserted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionWrite {
    pub row_id: Snowflake,
    pub record: ActionRecord,
}

impl ActionWrite {
    pub fn new(row_id: Snowflake, record: ActionRecord) -> Self {
        Self { row_id, record }
    }
}

#[async_trait]
pub trait AuthoritativeStore: Send + Sync {
    // ========================================================================
    // Action records
    // ========================================================================

    /// Stored record for the triple, if any. `None` states are never stored.
    async fn get_action_record(
        &self,
        actor_id: Snowflake,
        target_id: Snowflake,
        class: ActionClass,
    ) -> RepoResult<Option<ActionRecord>>;

    /// Authoritative value of a counter: a record count or a stored column
    async fn count_by_target_and_class(&self, target_id: Snowflake, metric: Metric) -> RepoResult<i64>;

    /// Open a transaction scope
    async fn begin(&self) -> RepoResult<Box<dyn StoreTransaction>>;

    /// Upsert one record in its own transaction
    async fn upsert_action_record(&self, write: ActionWrite) -> RepoResult<UpsertOutcome> {
        let mut tx = self.begin().await?;
        let outcomes = match tx.upsert_action_records(&[write]).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                tx.rollback().await.ok();
                return Err(e);
            }
        };
        tx.commit().await?;
        outcomes
            .into_iter()
            .next()
            .ok_or_else(|| DomainError::InternalError("upsert returned no outcome".to_string()))
    }

    /// Delete a target and cascade to its action records in its own transaction
    async fn delete_target(&self, kind: TargetKind, target_id: Snowflake) -> RepoResult<u64> {
        let mut tx = self.begin().await?;
        let removed = match tx.delete_target(kind, target_id).await {
            Ok(removed) => removed,
            Err(e) => {
                tx.rollback().await.ok();
                return Err(e);
            }
        };
        tx.commit().await?;
        Ok(removed)
    }

    // ========================================================================
    // Comments
    // ========================================================================

    async fn comment(&self, comment_id: Snowflake) -> RepoResult<Option<CommentNode>>;

    /// Root of the reply chain containing `comment_id` (itself when it is a root)
    async fn root_of(&self, comment_id: Snowflake) -> RepoResult<Option<Snowflake>>;

    /// Every live comment of a post, parent pointers included
    async fn comments_by_post(&self, post_id: Snowflake) -> RepoResult<Vec<CommentNode>>;

    // ========================================================================
    // Posts
    // ========================================================================

    /// The subset of `post_ids` that still exists
    async fn existing_posts(&self, post_ids: &[Snowflake]) -> RepoResult<Vec<Snowflake>>;

    /// `(post_id, score)` pairs for a feed index: creation time in seconds or vote score
    async fn post_scores(&self, order: FeedOrder) -> RepoResult<Vec<(Snowflake, f64)>>;

    async fn community_posts(&self, community_id: Snowflake) -> RepoResult<Vec<Snowflake>>;

    async fn post_community(&self, post_id: Snowflake) -> RepoResult<Option<Snowflake>>;
}

/// Writes executed inside one relational transaction.
///
/// Dropping a transaction without calling [`commit`](Self::commit) rolls it back.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Write each record's explicit final state. `None` deletes the row.
    /// Outcomes are returned in input order.
    async fn upsert_action_records(&mut self, writes: &[ActionWrite]) -> RepoResult<Vec<UpsertOutcome>>;

    /// Delete a post or comment row and every action record that targets it.
    /// Deleting a post also removes its comments.
    async fn delete_target(&mut self, kind: TargetKind, target_id: Snowflake) -> RepoResult<u64>;

    /// Delete comment rows and their vote records; returns comment rows removed
    async fn delete_comments(&mut self, comment_ids: &[Snowflake]) -> RepoResult<u64>;

    async fn insert_comment(&mut self, comment: &CommentNode) -> RepoResult<()>;

    /// Add click deltas to posts' stored click column; returns posts updated
    async fn add_click_counts(&mut self, counts: &[(Snowflake, i64)]) -> RepoResult<u64>;

    async fn commit(self: Box<Self>) -> RepoResult<()>;

    async fn rollback(self: Box<Self>) -> RepoResult<()>;
}
