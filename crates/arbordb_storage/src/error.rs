//! Error types for store operations.

use crate::transaction::TransactionId;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The resource does not exist.
    #[error("resource not found: {path}")]
    NotFound {
        /// The missing path.
        path: String,
    },

    /// A resource already exists at the target path.
    #[error("resource already exists: {path}")]
    AlreadyExists {
        /// The occupied path.
        path: String,
    },

    /// The parent collection of the target path does not exist.
    #[error("parent collection not found for {path}")]
    ParentNotFound {
        /// The path whose parent is missing.
        path: String,
    },

    /// The resource exists but has the wrong kind for the operation.
    #[error("wrong resource kind at {path}: expected {expected}")]
    WrongKind {
        /// The offending path.
        path: String,
        /// The kind the operation needed.
        expected: &'static str,
    },

    /// The path is malformed or not allowed for the operation.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath {
        /// The offending path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The transaction is unknown, committed or aborted.
    #[error("transaction not active: {txn}")]
    TransactionNotActive {
        /// The transaction that was used.
        txn: TransactionId,
    },

    /// A failure inside the backing store.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Creates a not-found error.
    pub fn not_found(path: impl ToString) -> Self {
        Self::NotFound {
            path: path.to_string(),
        }
    }

    /// Creates an already-exists error.
    pub fn already_exists(path: impl ToString) -> Self {
        Self::AlreadyExists {
            path: path.to_string(),
        }
    }

    /// Creates a parent-not-found error.
    pub fn parent_not_found(path: impl ToString) -> Self {
        Self::ParentNotFound {
            path: path.to_string(),
        }
    }

    /// Creates an invalid path error.
    pub fn invalid_path(path: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}
