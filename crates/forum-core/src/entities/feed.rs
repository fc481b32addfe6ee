//! Ordered feed queries

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::DomainError;
use crate::value_objects::Snowflake;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedOrder {
    #[default]
    Time,
    Score,
}

/// 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct PageQuery {
    #[validate(range(min = 1))]
    pub page: u32,
    #[validate(range(min = 1, max = 100))]
    pub size: u32,
}

impl PageQuery {
    pub fn new(page: u32, size: u32) -> Result<Self, DomainError> {
        let query = Self { page, size };
        query
            .validate()
            .map_err(|e| DomainError::ValidationError(e.to_string()))?;
        Ok(query)
    }

    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize) * self.size as usize
    }

    pub fn limit(&self) -> usize {
        self.size as usize
    }
}

impl Default for PageQuery {
    fn default() -> Self {
        Self { page: 1, size: 10 }
    }
}

/// Feed request, optionally scoped to one community
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeedQuery {
    pub order: FeedOrder,
    pub community_id: Option<Snowflake>,
    pub page: PageQuery,
}
