//! Action record database model

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Database model for the action_records table.
/// `state` holds the signed direction (-1, 0, 1); the class decides what it means.
#[derive(Debug, Clone, FromRow)]
pub struct ActionRecordModel {
    pub id: i64,
    pub class: i16,
    pub actor_id: i64,
    pub target_id: i64,
    pub state: i16,
    pub updated_at: DateTime<Utc>,
}
