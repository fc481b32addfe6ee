//! Comment nodes. The relational store only keeps parent pointers.

use serde::{Deserialize, Serialize};

use crate::value_objects::Snowflake;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentNode {
    pub comment_id: Snowflake,
    /// `Snowflake::NONE` for a root comment
    pub parent_comment_id: Snowflake,
    pub post_id: Snowflake,
    pub content: String,
    pub author_id: Snowflake,
}

impl CommentNode {
    pub fn new(
        comment_id: Snowflake,
        parent_comment_id: Snowflake,
        post_id: Snowflake,
        author_id: Snowflake,
        content: impl Into<String>,
    ) -> Self {
        Self {
            comment_id,
            parent_comment_id,
            post_id,
            content: content.into(),
            author_id,
        }
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent_comment_id.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_detection() {
        let root = CommentNode::new(
            Snowflake::new(10),
            Snowflake::NONE,
            Snowflake::new(1),
            Snowflake::new(5),
            "first",
        );
        let reply = CommentNode::new(
            Snowflake::new(11),
            Snowflake::new(10),
            Snowflake::new(1),
            Snowflake::new(6),
            "reply",
        );
        assert!(root.is_root());
        assert!(!reply.is_root());
    }
}
