//! Model to entity mappers
//!
//! - `TryFrom<Model> for Entity`: rows whose codes do not decode are reported, not guessed
//! - `*Insert` structs: prepare entity data for database operations

mod action;
mod comment;

pub use action::ActionInsert;
pub use comment::CommentInsert;
