//! PostgreSQL implementation of AuthoritativeStore

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;

use forum_core::entities::{ActionClass, ActionRecord, CommentNode, FeedOrder, Metric};
use forum_core::traits::{AuthoritativeStore, RepoResult, StoreTransaction};
use forum_core::value_objects::Snowflake;

use crate::models::{ActionRecordModel, CommentModel, PostScoreModel};

use super::error::map_db_error;
use super::transaction::PgStoreTransaction;

/// Deepest reply chain `root_of` will walk before giving up on a corrupt chain
const MAX_REPLY_DEPTH: i32 = 1_000;

#[derive(Clone)]
pub struct PgAuthoritativeStore {
    pool: PgPool,
}

impl PgAuthoritativeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn count_records(&self, metric: Metric, id: Snowflake) -> RepoResult<i64> {
        let Some((class, state)) = metric.counted_records() else {
            return Ok(0);
        };
        let column = if metric.keyed_by_actor() {
            "actor_id"
        } else {
            "target_id"
        };

        let count = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM action_records WHERE class = $1 AND {column} = $2 AND state = $3"
        ))
        .bind(class.code())
        .bind(id.into_inner())
        .bind(i16::from(state.direction()))
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(count)
    }
}

#[async_trait]
impl AuthoritativeStore for PgAuthoritativeStore {
    #[instrument(skip(self))]
    async fn get_action_record(
        &self,
        actor_id: Snowflake,
        target_id: Snowflake,
        class: ActionClass,
    ) -> RepoResult<Option<ActionRecord>> {
        let result = sqlx::query_as::<_, ActionRecordModel>(
            r#"
            SELECT id, class, actor_id, target_id, state, updated_at
            FROM action_records
            WHERE class = $1 AND actor_id = $2 AND target_id = $3
            "#,
        )
        .bind(class.code())
        .bind(actor_id.into_inner())
        .bind(target_id.into_inner())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        result.map(ActionRecord::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn count_by_target_and_class(&self, target_id: Snowflake, metric: Metric) -> RepoResult<i64> {
        match metric {
            Metric::ClickCount => {
                let clicks = sqlx::query_scalar::<_, i64>(
                    "SELECT click_numbers FROM posts WHERE post_id = $1",
                )
                .bind(target_id.into_inner())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_db_error)?;
                Ok(clicks.unwrap_or(0))
            }
            Metric::CommentCount => sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM comments WHERE post_id = $1",
            )
            .bind(target_id.into_inner())
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error),
            Metric::Descendants => sqlx::query_scalar::<_, i64>(
                r#"
                WITH RECURSIVE subtree AS (
                    SELECT comment_id FROM comments WHERE parent_comment_id = $1
                    UNION
                    SELECT c.comment_id
                    FROM comments c
                    JOIN subtree s ON c.parent_comment_id = s.comment_id
                )
                SELECT COUNT(*) FROM subtree
                "#,
            )
            .bind(target_id.into_inner())
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error),
            _ => self.count_records(metric, target_id).await,
        }
    }

    #[instrument(skip(self))]
    async fn begin(&self) -> RepoResult<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await.map_err(map_db_error)?;
        Ok(Box::new(PgStoreTransaction::new(tx)))
    }

    #[instrument(skip(self))]
    async fn comment(&self, comment_id: Snowflake) -> RepoResult<Option<CommentNode>> {
        let result = sqlx::query_as::<_, CommentModel>(
            r#"
            SELECT comment_id, parent_comment_id, post_id, author_id, content
            FROM comments
            WHERE comment_id = $1
            "#,
        )
        .bind(comment_id.into_inner())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(result.map(CommentNode::from))
    }

    #[instrument(skip(self))]
    async fn root_of(&self, comment_id: Snowflake) -> RepoResult<Option<Snowflake>> {
        // Topmost ancestor reached; the depth bound stops a corrupted cycle
        let result = sqlx::query_scalar::<_, i64>(
            r#"
            WITH RECURSIVE chain AS (
                SELECT comment_id, parent_comment_id, 0 AS depth
                FROM comments
                WHERE comment_id = $1
                UNION ALL
                SELECT c.comment_id, c.parent_comment_id, chain.depth + 1
                FROM comments c
                JOIN chain ON c.comment_id = chain.parent_comment_id
                WHERE chain.parent_comment_id <> 0 AND chain.depth < $2
            )
            SELECT comment_id FROM chain ORDER BY depth DESC LIMIT 1
            "#,
        )
        .bind(comment_id.into_inner())
        .bind(MAX_REPLY_DEPTH)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(result.map(Snowflake::new))
    }

    #[instrument(skip(self))]
    async fn comments_by_post(&self, post_id: Snowflake) -> RepoResult<Vec<CommentNode>> {
        let results = sqlx::query_as::<_, CommentModel>(
            r#"
            SELECT comment_id, parent_comment_id, post_id, author_id, content
            FROM comments
            WHERE post_id = $1
            ORDER BY comment_id
            "#,
        )
        .bind(post_id.into_inner())
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(results.into_iter().map(CommentNode::from).collect())
    }

    #[instrument(skip(self, post_ids), fields(count = post_ids.len()))]
    async fn existing_posts(&self, post_ids: &[Snowflake]) -> RepoResult<Vec<Snowflake>> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = post_ids.iter().map(|id| id.into_inner()).collect();

        let results = sqlx::query_scalar::<_, i64>(
            "SELECT post_id FROM posts WHERE post_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(results.into_iter().map(Snowflake::new).collect())
    }

    #[instrument(skip(self))]
    async fn post_scores(&self, order: FeedOrder) -> RepoResult<Vec<(Snowflake, f64)>> {
        let query = match order {
            FeedOrder::Time => sqlx::query_as::<_, PostScoreModel>(
                "SELECT post_id, EXTRACT(EPOCH FROM created_at)::float8 AS score FROM posts",
            ),
            // Stored vote states are +1/-1, so their sum is up minus down
            FeedOrder::Score => sqlx::query_as::<_, PostScoreModel>(
                r#"
                SELECT p.post_id, COALESCE(SUM(a.state), 0)::float8 AS score
                FROM posts p
                LEFT JOIN action_records a ON a.target_id = p.post_id AND a.class = $1
                GROUP BY p.post_id
                "#,
            )
            .bind(ActionClass::PostVote.code()),
        };

        let results = query.fetch_all(&self.pool).await.map_err(map_db_error)?;
        Ok(results
            .into_iter()
            .map(|row| (Snowflake::new(row.post_id), row.score))
            .collect())
    }

    #[instrument(skip(self))]
    async fn community_posts(&self, community_id: Snowflake) -> RepoResult<Vec<Snowflake>> {
        let results = sqlx::query_scalar::<_, i64>(
            "SELECT post_id FROM posts WHERE community_id = $1",
        )
        .bind(community_id.into_inner())
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(results.into_iter().map(Snowflake::new).collect())
    }

    #[instrument(skip(self))]
    async fn post_community(&self, post_id: Snowflake) -> RepoResult<Option<Snowflake>> {
        let result = sqlx::query_scalar::<_, i64>(
            "SELECT community_id FROM posts WHERE post_id = $1",
        )
        .bind(post_id.into_inner())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(result.map(Snowflake::new))
    }
}
