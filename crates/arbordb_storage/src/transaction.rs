//! Transaction handles.

use std::fmt;

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// State of a transaction as tracked by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform mutations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

/// An opaque handle to a store transaction.
///
/// The handle is passed through the mutation pipeline untouched: triggers
/// run inside the same transaction as the mutation that fired them, so their
/// own changes commit or roll back together with it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transaction {
    id: TransactionId,
}

impl Transaction {
    /// Creates a handle for a transaction opened by a store.
    #[must_use]
    pub const fn new(id: TransactionId) -> Self {
        Self { id }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub const fn id(&self) -> TransactionId {
        self.id
    }
}
