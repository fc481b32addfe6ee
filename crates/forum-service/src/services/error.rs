//! Service layer error types
//!
//! Provides a unified error type for request-path operations and the drain.

use forum_core::{DomainError, EventClass, StoreKind};
use std::fmt;

use crate::drain::FlushStage;

/// Service layer error type
#[derive(Debug)]
pub enum ServiceError {
    /// Domain rule violation
    Domain(DomainError),

    /// Resource not found
    NotFound { resource: &'static str, id: String },

    /// Validation error
    Validation(String),

    /// A backing store failed or timed out
    StoreUnavailable { store: StoreKind, message: String },

    /// The stores disagree in a way the caller cannot paper over
    InconsistentState(String),

    /// A drained batch still failed after every retry
    BatchCommitFailed {
        class: EventClass,
        stage: FlushStage,
        attempts: u32,
    },

    /// Internal error
    Internal(String),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Domain(e) => write!(f, "{e}"),
            Self::NotFound { resource, id } => write!(f, "{resource} not found: {id}"),
            Self::Validation(msg) => write!(f, "Validation error: {msg}"),
            Self::StoreUnavailable { store, message } => {
                write!(f, "{store} store unavailable: {message}")
            }
            Self::InconsistentState(msg) => write!(f, "Inconsistent state: {msg}"),
            Self::BatchCommitFailed {
                class,
                stage,
                attempts,
            } => write!(
                f,
                "{class} batch failed at {stage} stage after {attempts} attempts"
            ),
            Self::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Domain(e) => Some(e),
            _ => None,
        }
    }
}

impl ServiceError {
    /// Create a not found error
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Domain(e) => e.is_not_found(),
            Self::NotFound { .. } => true,
            _ => false,
        }
    }

    pub fn is_validation(&self) -> bool {
        match self {
            Self::Domain(e) => e.is_validation(),
            Self::Validation(_) => true,
            _ => false,
        }
    }

    /// The store behind a `StoreUnavailable` error
    pub fn unavailable_store(&self) -> Option<StoreKind> {
        match self {
            Self::StoreUnavailable { store, .. } => Some(*store),
            _ => None,
        }
    }

    /// Get the error code for API responses
    pub fn error_code(&self) -> &str {
        match self {
            Self::Domain(e) => e.code(),
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::StoreUnavailable { .. } => "STORE_UNAVAILABLE",
            Self::InconsistentState(_) => "INCONSISTENT_STATE",
            Self::BatchCommitFailed { .. } => "BATCH_COMMIT_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<DomainError> for ServiceError {
    fn from(err: DomainError) -> Self {
        match err.unavailable_store() {
            Some(store) => Self::StoreUnavailable {
                store,
                message: err.to_string(),
            },
            None => Self::Domain(err),
        }
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
