//! Comment service
//!
//! Handles comment creation and deletion on top of the comment index.

use serde::Deserialize;
use tracing::{info, instrument, warn};
use validator::Validate;

use forum_core::{CommentNode, DomainError, Snowflake};

use super::comment_tree::{CommentTree, DeletedSubtree};
use super::context::ServiceContext;
use super::error::{ServiceError, ServiceResult};

/// Create comment request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateCommentRequest {
    pub post_id: Snowflake,
    /// Absent for a root comment
    #[serde(default)]
    pub parent_comment_id: Option<Snowflake>,
    pub author_id: Snowflake,
    #[validate(length(min = 1, max = 10000, message = "Content must be 1-10000 characters"))]
    pub content: String,
}

/// Comment service
pub struct CommentService<'a> {
    ctx: &'a ServiceContext,
}

impl<'a> CommentService<'a> {
    pub fn new(ctx: &'a ServiceContext) -> Self {
        Self { ctx }
    }

    /// Create a comment and link it into the post's index
    #[instrument(skip(self, request), fields(post_id = %request.post_id))]
    pub async fn create(&self, request: CreateCommentRequest) -> ServiceResult<CommentNode> {
        request.validate()?;
        let store = self.ctx.store();

        let post_exists = !self
            .ctx
            .relational(store.existing_posts(&[request.post_id]))
            .await?
            .is_empty();
        if !post_exists {
            return Err(DomainError::PostNotFound(request.post_id).into());
        }

        let parent_id = request.parent_comment_id.unwrap_or(Snowflake::NONE);
        if !parent_id.is_zero() {
            let parent = self
                .ctx
                .relational(store.comment(parent_id))
                .await?
                .ok_or(DomainError::CommentNotFound(parent_id))?;
            if parent.post_id != request.post_id {
                return Err(ServiceError::validation(
                    "Parent comment must belong to the same post",
                ));
            }
        }

        let node = CommentNode::new(
            self.ctx.next_id(),
            parent_id,
            request.post_id,
            request.author_id,
            request.content,
        );

        let mut tx = self.ctx.relational(store.begin()).await?;
        if let Err(e) = self.ctx.relational(tx.insert_comment(&node)).await {
            tx.rollback().await.ok();
            return Err(e.into());
        }
        self.ctx.relational(tx.commit()).await?;

        let root_id = if node.is_root() {
            node.comment_id
        } else {
            self.ctx
                .relational(store.root_of(parent_id))
                .await?
                .unwrap_or(parent_id)
        };

        // The row is committed; a missed index update forces a rebuild on the next read
        let tree = CommentTree::new(self.ctx);
        if let Err(e) = tree.on_comment_created(&node, root_id).await {
            warn!(comment_id = %node.comment_id, error = %e, "Comment saved but not indexed");
            if let Err(e) = tree.invalidate(node.post_id).await {
                warn!(post_id = %node.post_id, error = %e, "Could not invalidate comment index");
            }
        }

        info!(
            comment_id = %node.comment_id,
            parent_id = %parent_id,
            author_id = %node.author_id,
            "Comment created"
        );
        Ok(node)
    }

    /// Delete a comment with every reply under it
    pub async fn delete(&self, comment_id: Snowflake) -> ServiceResult<DeletedSubtree> {
        CommentTree::new(self.ctx).delete_subtree(comment_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{id, Harness};
    use forum_core::{CounterStore, Metric, PageQuery};

    fn request(parent: Option<i64>, content: &str) -> CreateCommentRequest {
        CreateCommentRequest {
            post_id: id(100),
            parent_comment_id: parent.map(id),
            author_id: id(7),
            content: content.to_string(),
        }
    }

    async fn harness() -> Harness {
        let h = Harness::new();
        h.store.insert_post(id(100), id(1), 0).await;
        h
    }

    #[tokio::test]
    async fn test_create_root_then_reply() {
        let h = harness().await;
        let service = CommentService::new(&h.ctx);
        let tree = CommentTree::new(&h.ctx);

        let root = service.create(request(None, "first")).await.unwrap();
        assert!(root.is_root());
        // First read builds the index from the stored rows
        let page = tree.get_root_comments(id(100), PageQuery::default()).await.unwrap();
        assert_eq!(page, vec![root.comment_id]);

        let reply = service
            .create(request(Some(root.comment_id.into_inner()), "reply"))
            .await
            .unwrap();
        let nested = service
            .create(request(Some(reply.comment_id.into_inner()), "nested"))
            .await
            .unwrap();

        let children = h
            .counters
            .set_members(&h.keys().child_set(reply.comment_id))
            .await
            .unwrap();
        assert_eq!(children, vec![nested.comment_id.member()]);
        assert_eq!(h.counter(Metric::Descendants, root.comment_id).await, Some(2.0));
        assert_eq!(h.counter(Metric::CommentCount, id(100)).await, Some(3.0));
        assert_eq!(h.store.comment_count().await, 3);
    }

    #[tokio::test]
    async fn test_rejects_empty_content() {
        let h = harness().await;
        let err = CommentService::new(&h.ctx)
            .create(request(None, ""))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_rejects_unknown_post_and_parent() {
        let h = harness().await;
        let service = CommentService::new(&h.ctx);

        let mut missing_post = request(None, "x");
        missing_post.post_id = id(404);
        assert!(service.create(missing_post).await.unwrap_err().is_not_found());
        assert!(service.create(request(Some(55), "x")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_parent_on_other_post_is_invalid() {
        let h = harness().await;
        h.store.insert_post(id(200), id(1), 0).await;
        let service = CommentService::new(&h.ctx);
        let mut elsewhere = request(None, "other post");
        elsewhere.post_id = id(200);
        let parent = service.create(elsewhere).await.unwrap();

        let err = service
            .create(request(Some(parent.comment_id.into_inner()), "x"))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_index_failure_does_not_fail_create() {
        let h = harness().await;
        h.counters.set_unavailable(true);
        let node = CommentService::new(&h.ctx)
            .create(request(None, "saved anyway"))
            .await
            .unwrap();
        assert_eq!(h.store.comment_count().await, 1);

        h.counters.set_unavailable(false);
        let page = CommentTree::new(&h.ctx)
            .get_root_comments(id(100), PageQuery::default())
            .await
            .unwrap();
        assert_eq!(page, vec![node.comment_id]);
    }

    #[tokio::test]
    async fn test_reply_saved_while_index_down_is_deleted_with_root() {
        let h = harness().await;
        let service = CommentService::new(&h.ctx);
        let root = service.create(request(None, "root")).await.unwrap();
        CommentTree::new(&h.ctx)
            .get_root_comments(id(100), PageQuery::default())
            .await
            .unwrap();

        h.counters.set_unavailable(true);
        service
            .create(request(Some(root.comment_id.into_inner()), "unindexed reply"))
            .await
            .unwrap();
        h.counters.set_unavailable(false);

        let deleted = service.delete(root.comment_id).await.unwrap();
        assert_eq!(deleted.removed, 2);
        assert_eq!(h.store.comment_count().await, 0);
    }

    #[tokio::test]
    async fn test_delete_removes_subtree() {
        let h = harness().await;
        let service = CommentService::new(&h.ctx);
        let root = service.create(request(None, "root")).await.unwrap();
        service
            .create(request(Some(root.comment_id.into_inner()), "reply"))
            .await
            .unwrap();

        let deleted = service.delete(root.comment_id).await.unwrap();
        assert_eq!(deleted.removed, 2);
        assert_eq!(h.store.comment_count().await, 0);
    }
}
