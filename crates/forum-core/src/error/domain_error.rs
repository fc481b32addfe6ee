//! Domain errors - error types for the domain layer

use std::fmt;
use thiserror::Error;

use crate::entities::{ActionClass, ActionState};
use crate::value_objects::Snowflake;

/// Which backing store an infrastructure error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    Relational,
    Fast,
    Filter,
    Queue,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Relational => "relational",
            Self::Fast => "fast",
            Self::Filter => "filter",
            Self::Queue => "queue",
        })
    }
}

/// Domain layer errors
#[derive(Debug, Error)]
pub enum DomainError {
    // =========================================================================
    // Not Found Errors
    // =========================================================================
    #[error("Post not found: {0}")]
    PostNotFound(Snowflake),

    #[error("Comment not found: {0}")]
    CommentNotFound(Snowflake),

    #[error("User not found: {0}")]
    UserNotFound(Snowflake),

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid direction {direction} for {class}")]
    InvalidDirection { class: ActionClass, direction: i8 },

    #[error("{class} does not admit state {state}")]
    StateNotAdmitted {
        class: ActionClass,
        state: ActionState,
    },

    // =========================================================================
    // Consistency Errors
    // =========================================================================
    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    // =========================================================================
    // Infrastructure Errors (wrapped)
    // =========================================================================
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Membership filter error: {0}")]
    FilterError(String),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("{store} store timed out after {after_ms}ms")]
    Timeout { store: StoreKind, after_ms: u64 },

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl DomainError {
    /// Get an error code string for API responses
    pub fn code(&self) -> &'static str {
        match self {
            // Not Found
            Self::PostNotFound(_) => "UNKNOWN_POST",
            Self::CommentNotFound(_) => "UNKNOWN_COMMENT",
            Self::UserNotFound(_) => "UNKNOWN_USER",

            // Validation
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::InvalidDirection { .. } => "INVALID_DIRECTION",
            Self::StateNotAdmitted { .. } => "INVALID_ACTION_STATE",

            // Consistency
            Self::InconsistentState(_) => "INCONSISTENT_STATE",

            // Infrastructure
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::CacheError(_) => "CACHE_ERROR",
            Self::FilterError(_) => "FILTER_ERROR",
            Self::QueueError(_) => "QUEUE_ERROR",
            Self::Timeout { .. } => "STORE_TIMEOUT",
            Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::PostNotFound(_) | Self::CommentNotFound(_) | Self::UserNotFound(_)
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::ValidationError(_) | Self::InvalidDirection { .. } | Self::StateNotAdmitted { .. }
        )
    }

    /// The store that failed, if this is a connectivity or timeout error
    pub fn unavailable_store(&self) -> Option<StoreKind> {
        match self {
            Self::DatabaseError(_) => Some(StoreKind::Relational),
            Self::CacheError(_) => Some(StoreKind::Fast),
            Self::FilterError(_) => Some(StoreKind::Filter),
            Self::QueueError(_) => Some(StoreKind::Queue),
            Self::Timeout { store, .. } => Some(*store),
            _ => None,
        }
    }

    pub fn is_store_unavailable(&self) -> bool {
        self.unavailable_store().is_some()
    }
}
