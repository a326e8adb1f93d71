//! Storage error types

use holocron_core::{EntityId, EntityKind, Error, Violation};
use thiserror::Error;

/// Result type alias for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Storage-specific error types
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: EntityId },

    #[error("Constraint violated: {0}")]
    Constraint(Violation),

    #[error("Dataset rejected with {} violation(s)", .0.len())]
    Inconsistent(Vec<Violation>),

    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    pub fn not_found(kind: EntityKind, id: &EntityId) -> Self {
        Self::NotFound {
            kind,
            id: id.clone(),
        }
    }
}

impl From<Violation> for StorageError {
    fn from(v: Violation) -> Self {
        Self::Constraint(v)
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Unavailable(msg) => Error::StoreUnavailable(msg),
            StorageError::NotFound { kind, id } => Error::NotFound { kind, id },
            StorageError::Constraint(v) => Error::ValidationFailed(v),
            StorageError::Inconsistent(mut violations) => {
                if violations.is_empty() {
                    Error::Internal("Dataset rejected without violations".to_string())
                } else {
                    Error::ValidationFailed(violations.swap_remove(0))
                }
            }
            StorageError::Conflict(msg) => Error::ConflictRetryable(msg),
            StorageError::Serialization(e) => Error::Serialization(e.to_string()),
            other @ (StorageError::Transaction(_) | StorageError::Database(_)) => {
                Error::Internal(other.to_string())
            }
        }
    }
}
