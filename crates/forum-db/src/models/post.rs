//! Post projections used to build feed indexes

use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct PostScoreModel {
    pub post_id: i64,
    pub score: f64,
}
