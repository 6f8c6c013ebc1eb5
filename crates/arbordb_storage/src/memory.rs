//! In-memory resource store.

use crate::error::{StoreError, StoreResult};
use crate::path::DbPath;
use crate::store::{Mutation, ResourceStore};
use crate::transaction::{Transaction, TransactionId, TransactionState};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// A stored resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    /// A collection node.
    Collection,
    /// A document leaf with its content.
    Document(Vec<u8>),
}

/// A mutation that was successfully applied, in application order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMutation {
    /// The transaction the mutation ran in.
    pub txn: TransactionId,
    /// The mutation itself.
    pub mutation: Mutation,
}

/// Per-transaction undo log.
#[derive(Debug)]
struct TxnLog {
    state: TransactionState,
    /// Prior values of every path touched, in write order.
    undo: Vec<(DbPath, Option<Resource>)>,
}

#[derive(Debug, Default)]
struct Tree {
    resources: BTreeMap<DbPath, Resource>,
    transactions: HashMap<TransactionId, TxnLog>,
}

impl Tree {
    fn get(&self, path: &DbPath) -> Option<&Resource> {
        self.resources.get(path)
    }

    fn set(&mut self, txid: TransactionId, path: DbPath, value: Option<Resource>) {
        let prior = match &value {
            Some(resource) => self.resources.insert(path.clone(), resource.clone()),
            None => self.resources.remove(&path),
        };
        if let Some(log) = self.transactions.get_mut(&txid) {
            log.undo.push((path, prior));
        }
    }

    fn subtree(&self, root: &DbPath) -> Vec<(DbPath, Resource)> {
        let mut out = Vec::new();
        if let Some(resource) = self.resources.get(root) {
            out.push((root.clone(), resource.clone()));
        }
        let prefix = root.descendant_prefix();
        out.extend(
            self.resources
                .range::<str, _>((
                    std::ops::Bound::Included(prefix.as_str()),
                    std::ops::Bound::Unbounded,
                ))
                .take_while(|(path, _)| path.as_str().starts_with(&prefix))
                .map(|(path, resource)| (path.clone(), resource.clone())),
        );
        out
    }

    fn expect_collection(&self, path: &DbPath) -> StoreResult<()> {
        match self.get(path) {
            Some(Resource::Collection) => Ok(()),
            Some(_) => Err(StoreError::WrongKind {
                path: path.to_string(),
                expected: "collection",
            }),
            None => Err(StoreError::not_found(path)),
        }
    }

    fn expect_document(&self, path: &DbPath) -> StoreResult<Vec<u8>> {
        match self.get(path) {
            Some(Resource::Document(content)) => Ok(content.clone()),
            Some(_) => Err(StoreError::WrongKind {
                path: path.to_string(),
                expected: "document",
            }),
            None => Err(StoreError::not_found(path)),
        }
    }

    /// Checks that `path` is free and its parent collection exists.
    fn expect_vacant(&self, path: &DbPath) -> StoreResult<()> {
        if self.resources.contains_key(path) {
            return Err(StoreError::already_exists(path));
        }
        match path.parent() {
            Some(parent) => match self.get(&parent) {
                Some(Resource::Collection) => Ok(()),
                _ => Err(StoreError::parent_not_found(path)),
            },
            None => Ok(()),
        }
    }

    fn apply(&mut self, txid: TransactionId, mutation: &Mutation) -> StoreResult<()> {
        match mutation {
            Mutation::CreateCollection { path } => {
                self.expect_vacant(path)?;
                self.set(txid, path.clone(), Some(Resource::Collection));
            }
            Mutation::UpdateCollection { path } => {
                self.expect_collection(path)?;
                self.set(txid, path.clone(), Some(Resource::Collection));
            }
            Mutation::CopyCollection {
                source,
                destination,
            }
            | Mutation::MoveCollection {
                source,
                destination,
            } => {
                self.expect_collection(source)?;
                if destination.starts_with(source) {
                    return Err(StoreError::invalid_path(
                        destination,
                        "cannot copy or move a collection into itself",
                    ));
                }
                self.expect_vacant(destination)?;
                let subtree = self.subtree(source);
                let is_move = matches!(mutation, Mutation::MoveCollection { .. });
                for (path, resource) in &subtree {
                    if let Some(target) = path.rebase(source, destination) {
                        self.set(txid, target, Some(resource.clone()));
                    }
                }
                if is_move {
                    for (path, _) in subtree.into_iter().rev() {
                        self.set(txid, path, None);
                    }
                }
            }
            Mutation::DeleteCollection { path } => {
                self.expect_collection(path)?;
                for (child, _) in self.subtree(path).into_iter().rev() {
                    self.set(txid, child, None);
                }
            }
            Mutation::CreateDocument { path, content } => {
                self.expect_vacant(path)?;
                self.set(txid, path.clone(), Some(Resource::Document(content.clone())));
            }
            Mutation::UpdateDocument { path, content } => {
                self.expect_document(path)?;
                self.set(txid, path.clone(), Some(Resource::Document(content.clone())));
            }
            Mutation::CopyDocument {
                source,
                destination,
            } => {
                let content = self.expect_document(source)?;
                self.expect_vacant(destination)?;
                self.set(txid, destination.clone(), Some(Resource::Document(content)));
            }
            Mutation::MoveDocument {
                source,
                destination,
            } => {
                let content = self.expect_document(source)?;
                self.expect_vacant(destination)?;
                self.set(txid, destination.clone(), Some(Resource::Document(content)));
                self.set(txid, source.clone(), None);
            }
            Mutation::DeleteDocument { path } => {
                self.expect_document(path)?;
                self.set(txid, path.clone(), None);
            }
        }
        Ok(())
    }

    fn active_log(&mut self, txid: TransactionId) -> StoreResult<&mut TxnLog> {
        match self.transactions.get_mut(&txid) {
            Some(log) if log.state == TransactionState::Active => Ok(log),
            _ => Err(StoreError::TransactionNotActive { txn: txid }),
        }
    }
}

/// An in-memory resource store.
///
/// This store keeps the whole hierarchy in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral databases that don't need persistence
///
/// Mutations are applied immediately and recorded in a per-transaction undo
/// log; other transactions observe uncommitted changes. `abort` replays the
/// undo log in reverse.
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use arbordb_storage::{DbPath, InMemoryStore, ResourceStore};
///
/// let store = InMemoryStore::new();
/// assert!(store.resource_exists(&DbPath::root()));
/// ```
#[derive(Debug)]
pub struct InMemoryStore {
    tree: RwLock<Tree>,
    next_txid: AtomicU64,
    applied: Mutex<Vec<AppliedMutation>>,
}

impl InMemoryStore {
    /// Creates a store holding only the `/db` root collection.
    #[must_use]
    pub fn new() -> Self {
        let mut tree = Tree::default();
        tree.resources.insert(DbPath::root(), Resource::Collection);
        Self {
            tree: RwLock::new(tree),
            next_txid: AtomicU64::new(1),
            applied: Mutex::new(Vec::new()),
        }
    }

    /// Returns a copy of the resource at `path`.
    #[must_use]
    pub fn get(&self, path: &DbPath) -> Option<Resource> {
        self.tree.read().get(path).cloned()
    }

    /// Returns the content of the document at `path`.
    #[must_use]
    pub fn document(&self, path: &DbPath) -> Option<Vec<u8>> {
        match self.tree.read().get(path) {
            Some(Resource::Document(content)) => Some(content.clone()),
            _ => None,
        }
    }

    /// Returns the direct children of a collection, in path order.
    #[must_use]
    pub fn children(&self, path: &DbPath) -> Vec<DbPath> {
        let depth = path.depth() + 1;
        self.tree
            .read()
            .subtree(path)
            .into_iter()
            .map(|(child, _)| child)
            .filter(|child| child.depth() == depth)
            .collect()
    }

    /// Returns the state of a transaction opened by this store.
    #[must_use]
    pub fn transaction_state(&self, txn: &Transaction) -> Option<TransactionState> {
        self.tree
            .read()
            .transactions
            .get(&txn.id())
            .map(|log| log.state)
    }

    /// Returns every mutation applied so far, including aborted ones.
    #[must_use]
    pub fn applied_mutations(&self) -> Vec<AppliedMutation> {
        self.applied.lock().clone()
    }

    /// Returns the number of mutations applied so far.
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.applied.lock().len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceStore for InMemoryStore {
    fn open_transaction(&self) -> StoreResult<Transaction> {
        let txid = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        self.tree.write().transactions.insert(
            txid,
            TxnLog {
                state: TransactionState::Active,
                undo: Vec::new(),
            },
        );
        Ok(Transaction::new(txid))
    }

    fn commit(&self, txn: &Transaction) -> StoreResult<()> {
        let mut tree = self.tree.write();
        let log = tree.active_log(txn.id())?;
        log.state = TransactionState::Committed;
        log.undo.clear();
        Ok(())
    }

    fn abort(&self, txn: &Transaction) -> StoreResult<()> {
        let mut tree = self.tree.write();
        let log = tree.active_log(txn.id())?;
        log.state = TransactionState::Aborted;
        let undo = std::mem::take(&mut log.undo);
        for (path, prior) in undo.into_iter().rev() {
            match prior {
                Some(resource) => {
                    tree.resources.insert(path, resource);
                }
                None => {
                    tree.resources.remove(&path);
                }
            }
        }
        tracing::debug!(txn = %txn.id(), "transaction rolled back");
        Ok(())
    }

    fn perform_mutation(&self, txn: &Transaction, mutation: &Mutation) -> StoreResult<()> {
        let mut tree = self.tree.write();
        tree.active_log(txn.id())?;
        // Validation happens before the first write in every arm, so a
        // failing mutation leaves the tree untouched.
        tree.apply(txn.id(), mutation)?;
        self.applied.lock().push(AppliedMutation {
            txn: txn.id(),
            mutation: mutation.clone(),
        });
        Ok(())
    }

    fn resource_exists(&self, path: &DbPath) -> bool {
        self.tree.read().resources.contains_key(path)
    }

    fn read_config_document(&self, path: &DbPath) -> StoreResult<Option<Vec<u8>>> {
        match self.tree.read().get(path) {
            Some(Resource::Document(content)) => Ok(Some(content.clone())),
            Some(Resource::Collection) => Err(StoreError::WrongKind {
                path: path.to_string(),
                expected: "document",
            }),
            None => Ok(None),
        }
    }
}
