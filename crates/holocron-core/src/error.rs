//! Error types for Holocron

use crate::entity::{EntityId, EntityKind};
use crate::invariants::Violation;
use thiserror::Error;

/// Result type alias using Holocron's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Holocron error types
///
/// Every variant maps to a stable machine-readable code via [`Error::code`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: EntityId },

    #[error("Validation failed: {0}")]
    ValidationFailed(Violation),

    #[error("Conflicting mutation, retry: {0}")]
    ConflictRetryable(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Unknown relationship '{name}' on {kind}")]
    UnknownRelationship { kind: EntityKind, name: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(kind: EntityKind, id: impl Into<EntityId>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn unknown_relationship(kind: EntityKind, name: impl Into<String>) -> Self {
        Self::UnknownRelationship {
            kind,
            name: name.into(),
        }
    }

    /// Stable code for callers to branch on
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::ValidationFailed(_) => "VALIDATION_FAILED",
            Self::ConflictRetryable(_) => "CONFLICT_RETRYABLE",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::UnknownRelationship { .. } => "UNKNOWN_RELATIONSHIP",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::Serialization(_) => "SERIALIZATION",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// The violation behind a rejected mutation
    pub fn violation(&self) -> Option<&Violation> {
        match self {
            Self::ValidationFailed(v) => Some(v),
            _ => None,
        }
    }

    /// Only conflicts may be retried by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConflictRetryable(_))
    }
}

impl From<Violation> for Error {
    fn from(v: Violation) -> Self {
        Self::ValidationFailed(v)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
