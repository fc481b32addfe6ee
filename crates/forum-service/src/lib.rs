//! # forum-service
//!
//! Application layer keeping the relational store and the fast store
//! consistent: vote reconciliation, lazy cache fill, the batched event drain
//! and the comment index.

pub mod drain;
pub mod runtime;
pub mod services;

#[cfg(test)]
mod test_support;

pub use drain::{DrainState, FlushStage, OverflowLog, ReplaySummary};
pub use runtime::ForumRuntime;
pub use services::{
    CommentService, CommentTree, FeedService, FollowService, PostService, ServiceContext,
    ServiceError, ServiceResult, VoteOutcome, VoteReconciler,
};
