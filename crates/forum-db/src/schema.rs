//! Relational schema this crate reads and writes.
//!
//! Migrations are owned elsewhere; the DDL is kept here so tests and local
//! setups can bootstrap an empty database.

/// Idempotent DDL for every table the store touches
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS posts (
    post_id        BIGINT PRIMARY KEY,
    community_id   BIGINT NOT NULL,
    author_id      BIGINT NOT NULL,
    click_numbers  BIGINT NOT NULL DEFAULT 0,
    created_at     TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS posts_community_idx ON posts (community_id);

CREATE TABLE IF NOT EXISTS comments (
    comment_id         BIGINT PRIMARY KEY,
    parent_comment_id  BIGINT NOT NULL DEFAULT 0,
    post_id            BIGINT NOT NULL,
    author_id          BIGINT NOT NULL,
    content            TEXT NOT NULL,
    created_at         TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS comments_post_idx ON comments (post_id);
CREATE INDEX IF NOT EXISTS comments_parent_idx ON comments (parent_comment_id);

CREATE TABLE IF NOT EXISTS action_records (
    id          BIGINT PRIMARY KEY,
    class       SMALLINT NOT NULL,
    actor_id    BIGINT NOT NULL,
    target_id   BIGINT NOT NULL,
    state       SMALLINT NOT NULL CHECK (state IN (-1, 1)),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (class, actor_id, target_id)
);
CREATE INDEX IF NOT EXISTS action_records_target_idx ON action_records (class, target_id, state);
"#;

/// Run [`SCHEMA`] statement by statement
pub async fn bootstrap(pool: &sqlx::PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
