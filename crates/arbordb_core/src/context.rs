//! Per-request execution context.

use crate::security::Principal;
use crate::trigger::ReentrancyGuard;
use arbordb_storage::{DbPath, TransactionId};

/// State owned by one logical thread of control.
///
/// Every request creates its own context and passes it by `&mut` through
/// the pipeline, into hooks and back into nested mutations. A context is
/// never shared between threads, so the guard it carries needs no locking.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    pub(crate) guard: ReentrancyGuard,
    pub(crate) active_transaction: Option<TransactionId>,
    principal: Option<Principal>,
}

impl ExecutionContext {
    /// Creates a context for internal work (no client principal).
    ///
    /// Internal contexts are not subject to advisory lock checks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context for a client-protocol request made by `principal`.
    #[must_use]
    pub fn with_principal(principal: Principal) -> Self {
        Self {
            principal: Some(principal),
            ..Self::default()
        }
    }

    /// Returns the requesting principal, if this is a client request.
    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// Returns the transaction a trigger run is bound to.
    #[must_use]
    pub const fn active_transaction(&self) -> Option<TransactionId> {
        self.active_transaction
    }

    /// Returns true while a trigger run holds this context.
    #[must_use]
    pub const fn is_trigger_running(&self) -> bool {
        self.guard.is_engaged()
    }

    /// Returns the reentrancy guard.
    #[must_use]
    pub const fn guard(&self) -> &ReentrancyGuard {
        &self.guard
    }

    /// Clears the running marker and the transaction binding.
    pub(crate) fn end_trigger_run(&mut self) {
        self.guard.leave();
        self.active_transaction = None;
    }

    /// Releases a marker parked on `path` whose After phase will not run.
    pub(crate) fn abandon_parked(&mut self, path: &DbPath) {
        if self.guard.abandon(path) {
            self.active_transaction = None;
        }
    }
}
