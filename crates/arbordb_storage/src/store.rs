//! Resource store trait and mutation operations.

use crate::error::StoreResult;
use crate::path::DbPath;
use crate::transaction::Transaction;

/// A structural change to the collection/document hierarchy.
///
/// Every change the mutation pipeline performs is expressed as one of these
/// values and handed to [`ResourceStore::perform_mutation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Create an empty collection.
    CreateCollection {
        /// Path of the new collection.
        path: DbPath,
    },
    /// Touch a collection's metadata.
    UpdateCollection {
        /// Path of the collection.
        path: DbPath,
    },
    /// Copy a collection subtree.
    CopyCollection {
        /// Existing collection.
        source: DbPath,
        /// Path of the copy.
        destination: DbPath,
    },
    /// Move a collection subtree.
    MoveCollection {
        /// Existing collection.
        source: DbPath,
        /// New path.
        destination: DbPath,
    },
    /// Delete a collection subtree.
    DeleteCollection {
        /// Path of the collection.
        path: DbPath,
    },
    /// Store a new document.
    CreateDocument {
        /// Path of the new document.
        path: DbPath,
        /// Document content.
        content: Vec<u8>,
    },
    /// Replace an existing document's content.
    UpdateDocument {
        /// Path of the document.
        path: DbPath,
        /// New content.
        content: Vec<u8>,
    },
    /// Copy a document.
    CopyDocument {
        /// Existing document.
        source: DbPath,
        /// Path of the copy.
        destination: DbPath,
    },
    /// Move a document.
    MoveDocument {
        /// Existing document.
        source: DbPath,
        /// New path.
        destination: DbPath,
    },
    /// Delete a document.
    DeleteDocument {
        /// Path of the document.
        path: DbPath,
    },
}

impl Mutation {
    /// Returns the path the mutation acts on (the pre-image for copy/move).
    #[must_use]
    pub fn source(&self) -> &DbPath {
        match self {
            Self::CreateCollection { path }
            | Self::UpdateCollection { path }
            | Self::DeleteCollection { path }
            | Self::CreateDocument { path, .. }
            | Self::UpdateDocument { path, .. }
            | Self::DeleteDocument { path } => path,
            Self::CopyCollection { source, .. }
            | Self::MoveCollection { source, .. }
            | Self::CopyDocument { source, .. }
            | Self::MoveDocument { source, .. } => source,
        }
    }

    /// Returns the destination path of a copy or move.
    #[must_use]
    pub fn destination(&self) -> Option<&DbPath> {
        match self {
            Self::CopyCollection { destination, .. }
            | Self::MoveCollection { destination, .. }
            | Self::CopyDocument { destination, .. }
            | Self::MoveDocument { destination, .. } => Some(destination),
            _ => None,
        }
    }

    /// Returns true if the mutation targets a collection.
    #[must_use]
    pub fn targets_collection(&self) -> bool {
        matches!(
            self,
            Self::CreateCollection { .. }
                | Self::UpdateCollection { .. }
                | Self::CopyCollection { .. }
                | Self::MoveCollection { .. }
                | Self::DeleteCollection { .. }
        )
    }

    /// Returns true if the source path no longer exists afterwards.
    #[must_use]
    pub fn removes_source(&self) -> bool {
        matches!(
            self,
            Self::MoveCollection { .. }
                | Self::DeleteCollection { .. }
                | Self::MoveDocument { .. }
                | Self::DeleteDocument { .. }
        )
    }
}

/// The storage collaborator the mutation pipeline delegates to.
///
/// Stores own the hierarchy and its transactions. Implementations must be
/// `Send + Sync`; the pipeline shares one store across request threads.
///
/// # Invariants
///
/// - `perform_mutation` either applies the whole mutation or nothing
/// - changes made in a transaction are undone by `abort`
/// - `read_config_document` returns `None` for a missing document
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
pub trait ResourceStore: Send + Sync {
    /// Opens a new transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot start a transaction.
    fn open_transaction(&self) -> StoreResult<Transaction>;

    /// Commits a transaction, making its mutations permanent.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is not active.
    fn commit(&self, txn: &Transaction) -> StoreResult<()>;

    /// Aborts a transaction, undoing its mutations.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is not active.
    fn abort(&self, txn: &Transaction) -> StoreResult<()>;

    /// Applies a structural change inside `txn`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is not active or the change
    /// violates the hierarchy (missing parent, occupied target, wrong kind).
    fn perform_mutation(&self, txn: &Transaction, mutation: &Mutation) -> StoreResult<()>;

    /// Returns true if a collection or document exists at `path`.
    fn resource_exists(&self, path: &DbPath) -> bool;

    /// Reads a configuration document's raw content.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource exists but is not a document, or
    /// the backend fails.
    fn read_config_document(&self, path: &DbPath) -> StoreResult<Option<Vec<u8>>>;
}
