//! Comment database model

use sqlx::FromRow;

/// Database model for the comments table (0 parent means root)
#[derive(Debug, Clone, FromRow)]
pub struct CommentModel {
    pub comment_id: i64,
    pub parent_comment_id: i64,
    pub post_id: i64,
    pub author_id: i64,
    pub content: String,
}
