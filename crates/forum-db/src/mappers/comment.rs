//! Comment <-> model mapper

use forum_core::entities::CommentNode;
use forum_core::value_objects::Snowflake;

use crate::models::CommentModel;

impl From<CommentModel> for CommentNode {
    fn from(model: CommentModel) -> Self {
        CommentNode::new(
            Snowflake::new(model.comment_id),
            Snowflake::new(model.parent_comment_id),
            Snowflake::new(model.post_id),
            Snowflake::new(model.author_id),
            model.content,
        )
    }
}

pub struct CommentInsert<'a> {
    pub comment_id: i64,
    pub parent_comment_id: i64,
    pub post_id: i64,
    pub author_id: i64,
    pub content: &'a str,
}

impl<'a> CommentInsert<'a> {
    pub fn new(comment: &'a CommentNode) -> Self {
        Self {
            comment_id: comment.comment_id.into_inner(),
            parent_comment_id: comment.parent_comment_id.into_inner(),
            post_id: comment.post_id.into_inner(),
            author_id: comment.author_id.into_inner(),
            content: &comment.content,
        }
    }
}
