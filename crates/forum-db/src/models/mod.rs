//! Database models - SQLx-compatible structs for PostgreSQL tables

mod action;
mod comment;
mod post;

pub use action::ActionRecordModel;
pub use comment::CommentModel;
pub use post::PostScoreModel;
