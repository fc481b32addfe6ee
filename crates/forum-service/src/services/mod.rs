//! Request-path services
//!
//! Every service borrows a [`ServiceContext`] and reaches the stores only
//! through its bounded call helpers.

pub mod cache_fill;
pub mod comment;
pub mod comment_tree;
pub mod context;
pub mod error;
pub mod feed;
pub mod filter_gate;
pub mod follow;
pub mod post;
pub mod reconciler;
pub mod retry;

pub use cache_fill::CacheFill;
pub use comment::{CommentService, CreateCommentRequest};
pub use comment_tree::{CommentForest, CommentTree, DeletedSubtree};
pub use context::{ServiceContext, ServiceContextBuilder, StoreTimeouts};
pub use error::{ServiceError, ServiceResult};
pub use feed::{FeedService, COMMUNITY_FEED_TTL};
pub use filter_gate::{FilterGate, FilterVerdict};
pub use follow::FollowService;
pub use post::{DeletedPost, PostService};
pub use reconciler::{VoteOutcome, VoteReconciler};
pub use retry::RetryPolicy;
