//! Error types for ArborDB core.
//!
//! Each concern has its own error type. Before-phase trigger failures and
//! lock failures always reach the caller; After-phase trigger failures never
//! do (see [`crate::trigger::TriggerDispatcher`]).

use crate::query::EvalError;
use crate::security::Principal;
use crate::trigger::{LifecycleEvent, Phase};
use arbordb_storage::{DbPath, StoreError};
use thiserror::Error;

/// Result type for configuration resolution.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for trigger dispatch.
pub type TriggerResult<T> = Result<T, TriggerError>;

/// Result type for advisory lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// Result type for pipeline mutations.
pub type MutationResult<T> = Result<T, MutationError>;

/// Errors raised while resolving collection configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration document failed structural validation.
    #[error("invalid collection configuration {path}: {message}")]
    InvalidConfig {
        /// The configuration document.
        path: DbPath,
        /// Description of the problem.
        message: String,
    },

    /// The store failed while reading configuration.
    #[error("storage error while resolving configuration: {0}")]
    Storage(#[from] StoreError),
}

impl ConfigError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(path: &DbPath, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            path: path.clone(),
            message: message.into(),
        }
    }
}

/// Errors raised by a trigger hook.
#[derive(Debug, Error)]
pub enum TriggerError {
    /// The hook source failed to compile.
    #[error("error during trigger {phase}: hook declared at {declared_at} failed to compile for {event}")]
    Compile {
        /// Collection whose configuration declared the hook.
        declared_at: DbPath,
        /// Event being dispatched.
        event: LifecycleEvent,
        /// Phase being dispatched.
        phase: Phase,
        /// Evaluator error.
        source: EvalError,
    },

    /// The hook compiled but failed while executing.
    #[error("error during trigger {phase}: hook declared at {declared_at} failed on {event}")]
    Eval {
        /// Collection whose configuration declared the hook.
        declared_at: DbPath,
        /// Event being dispatched.
        event: LifecycleEvent,
        /// Phase being dispatched.
        phase: Phase,
        /// Evaluator error.
        source: EvalError,
    },

    /// The owning collection's configuration could not be resolved.
    #[error("trigger configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised by the advisory document lock table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// A live token of another owner exists. Retriable.
    #[error("document {path} is already locked by {owner}")]
    DocumentAlreadyLocked {
        /// The locked document.
        path: DbPath,
        /// Owner of the live token.
        owner: Principal,
    },

    /// No live token matches.
    #[error("no live lock for token {token}")]
    DocumentNotLocked {
        /// The token that was presented.
        token: String,
    },

    /// The caller may not perform the lock operation.
    #[error("permission denied for {principal}: {message}")]
    PermissionDenied {
        /// The caller.
        principal: Principal,
        /// Why the operation was refused.
        message: String,
    },
}

impl LockError {
    /// Creates a permission denied error.
    pub fn permission_denied(principal: &Principal, message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            principal: principal.clone(),
            message: message.into(),
        }
    }

    /// Returns true if retrying later may succeed.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::DocumentAlreadyLocked { .. })
    }
}

/// Errors returned by [`crate::MutationPipeline::perform`].
///
/// Every variant means the mutation did not happen; the caller should abort
/// the enclosing transaction.
#[derive(Debug, Error)]
pub enum MutationError {
    /// A Before-phase hook vetoed the mutation.
    #[error(transparent)]
    Trigger(#[from] TriggerError),

    /// The store rejected the mutation.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// A client-protocol request hit another owner's advisory lock.
    #[error("document {path} is locked by {owner}")]
    Locked {
        /// The locked document.
        path: DbPath,
        /// Owner of the live token.
        owner: Principal,
    },
}
