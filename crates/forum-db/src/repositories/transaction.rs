//! Transaction-scoped writes

use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use std::collections::HashMap;
use tracing::instrument;

use forum_core::entities::{ActionClass, CommentNode, TargetKind, UpsertOutcome};
use forum_core::traits::{ActionWrite, RepoResult, StoreTransaction};
use forum_core::value_objects::Snowflake;

use crate::mappers::{ActionInsert, CommentInsert};
use crate::models::ActionRecordModel;

use super::error::{comment_exists, map_db_error, map_unique_violation};

type RecordKey = (i16, i64, i64);

pub struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PgStoreTransaction {
    pub fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self { tx }
    }

    /// Lock and read the stored rows for every write, keyed by (class, actor, target)
    async fn lock_existing(&mut self, writes: &[ActionWrite]) -> RepoResult<HashMap<RecordKey, (i64, i16)>> {
        let classes: Vec<i16> = writes.iter().map(|w| w.record.class.code()).collect();
        let actors: Vec<i64> = writes.iter().map(|w| w.record.actor_id.into_inner()).collect();
        let targets: Vec<i64> = writes.iter().map(|w| w.record.target_id.into_inner()).collect();

        let rows = sqlx::query_as::<_, ActionRecordModel>(
            r#"
            SELECT a.id, a.class, a.actor_id, a.target_id, a.state, a.updated_at
            FROM action_records a
            JOIN UNNEST($1::smallint[], $2::bigint[], $3::bigint[]) AS k(class, actor_id, target_id)
              ON a.class = k.class AND a.actor_id = k.actor_id AND a.target_id = k.target_id
            ORDER BY a.id
            FOR UPDATE OF a
            "#,
        )
        .bind(&classes)
        .bind(&actors)
        .bind(&targets)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_db_error)?;

        Ok(rows
            .into_iter()
            .map(|row| ((row.class, row.actor_id, row.target_id), (row.id, row.state)))
            .collect())
    }
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    #[instrument(skip(self, writes), fields(count = writes.len()))]
    async fn upsert_action_records(&mut self, writes: &[ActionWrite]) -> RepoResult<Vec<UpsertOutcome>> {
        if writes.is_empty() {
            return Ok(Vec::new());
        }
        let mut stored = self.lock_existing(writes).await?;

        let mut inserts: Vec<ActionInsert> = Vec::new();
        let mut updates: Vec<(i64, i16)> = Vec::new();
        let mut deletes: Vec<i64> = Vec::new();
        let mut outcomes = Vec::with_capacity(writes.len());

        // Later writes for the same key see the effect of earlier ones
        for write in writes {
            let insert = ActionInsert::new(write);
            let key = (insert.class, insert.actor_id, insert.target_id);
            let outcome = match (stored.get(&key).copied(), write.record.state.is_none()) {
                (None, true) => UpsertOutcome::Unchanged,
                (None, false) => {
                    inserts.push(insert);
                    stored.insert(key, (insert.id, insert.state));
                    UpsertOutcome::Inserted
                }
                (Some((id, _)), true) => {
                    deletes.push(id);
                    stored.remove(&key);
                    UpsertOutcome::Deleted
                }
                (Some((_, state)), false) if state == insert.state => UpsertOutcome::Unchanged,
                (Some((id, _)), false) => {
                    updates.push((id, insert.state));
                    stored.insert(key, (id, insert.state));
                    UpsertOutcome::Updated
                }
            };
            outcomes.push(outcome);
        }

        // An insert and a delete of the same fresh row cancel out
        inserts.retain(|i| !deletes.contains(&i.id));
        updates.retain(|(id, _)| !deletes.contains(id));

        // Deletes go first so a re-insert never collides with the row it replaces
        if !deletes.is_empty() {
            sqlx::query("DELETE FROM action_records WHERE id = ANY($1)")
                .bind(&deletes)
                .execute(&mut *self.tx)
                .await
                .map_err(map_db_error)?;
        }

        if !inserts.is_empty() {
            let ids: Vec<i64> = inserts.iter().map(|i| i.id).collect();
            let classes: Vec<i16> = inserts.iter().map(|i| i.class).collect();
            let actors: Vec<i64> = inserts.iter().map(|i| i.actor_id).collect();
            let targets: Vec<i64> = inserts.iter().map(|i| i.target_id).collect();
            let states: Vec<i16> = inserts.iter().map(|i| i.state).collect();

            sqlx::query(
                r#"
                INSERT INTO action_records (id, class, actor_id, target_id, state, updated_at)
                SELECT id, class, actor_id, target_id, state, now()
                FROM UNNEST($1::bigint[], $2::smallint[], $3::bigint[], $4::bigint[], $5::smallint[])
                     AS t(id, class, actor_id, target_id, state)
                ON CONFLICT (class, actor_id, target_id)
                DO UPDATE SET state = EXCLUDED.state, updated_at = now()
                "#,
            )
            .bind(&ids)
            .bind(&classes)
            .bind(&actors)
            .bind(&targets)
            .bind(&states)
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_error)?;
        }

        if !updates.is_empty() {
            let ids: Vec<i64> = updates.iter().map(|(id, _)| *id).collect();
            let states: Vec<i16> = updates.iter().map(|(_, state)| *state).collect();

            sqlx::query(
                r#"
                UPDATE action_records a
                SET state = u.state, updated_at = now()
                FROM UNNEST($1::bigint[], $2::smallint[]) AS u(id, state)
                WHERE a.id = u.id
                "#,
            )
            .bind(&ids)
            .bind(&states)
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_error)?;
        }

        tracing::debug!(
            inserted = inserts.len(),
            updated = updates.len(),
            deleted = deletes.len(),
            "Upserted action records"
        );
        Ok(outcomes)
    }

    /// Returns the number of target rows removed (0 when it was already gone)
    #[instrument(skip(self))]
    async fn delete_target(&mut self, kind: TargetKind, target_id: Snowflake) -> RepoResult<u64> {
        let id = target_id.into_inner();
        match kind {
            TargetKind::Post => {
                sqlx::query(
                    r#"
                    DELETE FROM action_records
                    WHERE class = $1
                      AND target_id IN (SELECT comment_id FROM comments WHERE post_id = $2)
                    "#,
                )
                .bind(ActionClass::CommentVote.code())
                .bind(id)
                .execute(&mut *self.tx)
                .await
                .map_err(map_db_error)?;

                sqlx::query("DELETE FROM action_records WHERE class = ANY($1) AND target_id = $2")
                    .bind(vec![ActionClass::PostVote.code(), ActionClass::Collection.code()])
                    .bind(id)
                    .execute(&mut *self.tx)
                    .await
                    .map_err(map_db_error)?;

                sqlx::query("DELETE FROM comments WHERE post_id = $1")
                    .bind(id)
                    .execute(&mut *self.tx)
                    .await
                    .map_err(map_db_error)?;

                let result = sqlx::query("DELETE FROM posts WHERE post_id = $1")
                    .bind(id)
                    .execute(&mut *self.tx)
                    .await
                    .map_err(map_db_error)?;
                Ok(result.rows_affected())
            }
            TargetKind::Comment => self.delete_comments(&[target_id]).await,
            TargetKind::User => {
                let result = sqlx::query(
                    "DELETE FROM action_records WHERE actor_id = $1 OR (class = $2 AND target_id = $1)",
                )
                .bind(id)
                .bind(ActionClass::Follow.code())
                .execute(&mut *self.tx)
                .await
                .map_err(map_db_error)?;
                Ok(result.rows_affected())
            }
        }
    }

    #[instrument(skip(self, comment_ids), fields(count = comment_ids.len()))]
    async fn delete_comments(&mut self, comment_ids: &[Snowflake]) -> RepoResult<u64> {
        if comment_ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<i64> = comment_ids.iter().map(|id| id.into_inner()).collect();

        sqlx::query("DELETE FROM action_records WHERE class = $1 AND target_id = ANY($2)")
            .bind(ActionClass::CommentVote.code())
            .bind(&ids)
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_error)?;

        let result = sqlx::query("DELETE FROM comments WHERE comment_id = ANY($1)")
            .bind(&ids)
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_error)?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self, comment), fields(comment_id = %comment.comment_id))]
    async fn insert_comment(&mut self, comment: &CommentNode) -> RepoResult<()> {
        let insert = CommentInsert::new(comment);
        sqlx::query(
            r#"
            INSERT INTO comments (comment_id, parent_comment_id, post_id, author_id, content, created_at)
            VALUES ($1, $2, $3, $4, $5, now())
            "#,
        )
        .bind(insert.comment_id)
        .bind(insert.parent_comment_id)
        .bind(insert.post_id)
        .bind(insert.author_id)
        .bind(insert.content)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_unique_violation(e, || comment_exists(comment.comment_id)))?;

        Ok(())
    }

    #[instrument(skip(self, counts), fields(count = counts.len()))]
    async fn add_click_counts(&mut self, counts: &[(Snowflake, i64)]) -> RepoResult<u64> {
        if counts.is_empty() {
            return Ok(0);
        }
        let posts: Vec<i64> = counts.iter().map(|(id, _)| id.into_inner()).collect();
        let deltas: Vec<i64> = counts.iter().map(|(_, delta)| *delta).collect();

        let result = sqlx::query(
            r#"
            UPDATE posts p
            SET click_numbers = p.click_numbers + c.delta
            FROM UNNEST($1::bigint[], $2::bigint[]) AS c(post_id, delta)
            WHERE p.post_id = c.post_id
            "#,
        )
        .bind(&posts)
        .bind(&deltas)
        .execute(&mut *self.tx)
        .await
        .map_err(map_db_error)?;

        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> RepoResult<()> {
        self.tx.commit().await.map_err(map_db_error)
    }

    async fn rollback(self: Box<Self>) -> RepoResult<()> {
        self.tx.rollback().await.map_err(map_db_error)
    }
}
