//! Domain entities - core business objects

mod action;
mod comment;
mod feed;
mod metric;
mod policy;

pub use action::{ActionClass, ActionRecord, ActionState, FollowEdge, UpsertOutcome};
pub use comment::CommentNode;
pub use feed::{FeedOrder, FeedQuery, PageQuery};
pub use metric::{Metric, TargetKind};
pub use policy::{PersistencePolicy, PolicyTable};
