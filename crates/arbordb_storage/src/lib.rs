//! # ArborDB Storage
//!
//! Resource store interface and a reference in-memory store for ArborDB.
//!
//! This crate is the lowest layer the mutation pipeline talks to. A store
//! owns the collection/document hierarchy and the transactions that change
//! it; it knows nothing about triggers, configuration or advisory locks.
//!
//! ## Design Principles
//!
//! - Paths are absolute, normalized [`DbPath`] values
//! - Every structural change is a [`Mutation`] applied inside a [`Transaction`]
//! - Stores must be `Send + Sync` for concurrent access
//! - Transaction handles are opaque; stores own their state
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral databases
//!
//! ## Example
//!
//! ```rust
//! use arbordb_storage::{DbPath, InMemoryStore, Mutation, ResourceStore};
//!
//! let store = InMemoryStore::new();
//! let txn = store.open_transaction().unwrap();
//! let path = DbPath::parse("/db/books").unwrap();
//! store
//!     .perform_mutation(&txn, &Mutation::CreateCollection { path: path.clone() })
//!     .unwrap();
//! store.commit(&txn).unwrap();
//! assert!(store.resource_exists(&path));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod path;
mod store;
mod transaction;

pub use error::{StoreError, StoreResult};
pub use memory::{AppliedMutation, InMemoryStore, Resource};
pub use path::DbPath;
pub use store::{Mutation, ResourceStore};
pub use transaction::{Transaction, TransactionId, TransactionState};
