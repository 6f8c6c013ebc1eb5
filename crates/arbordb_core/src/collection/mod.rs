//! Hierarchical collection configuration.
//!
//! Every collection's effective configuration is the union of the
//! configuration documents of all its ancestors, root first. Documents live
//! under the configuration root in a tree mirroring the data hierarchy.

mod cache;
mod document;
mod resolver;

pub use cache::ConfigCache;
pub use document::{
    ConfigDocument, IndexKind, IndexingRule, TriggerDeclaration, TriggerParameter,
    QUERY_TRIGGER_CLASS,
};
pub use resolver::ConfigResolver;

use crate::trigger::{TriggerBinding, TriggerRegistry};
use arbordb_storage::DbPath;

/// The effective configuration of one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    collection: DbPath,
    indexing_rules: Vec<IndexingRule>,
    triggers: TriggerRegistry,
}

impl ResolvedConfig {
    /// Creates a configuration with no rules and no triggers.
    #[must_use]
    pub fn empty(collection: DbPath) -> Self {
        Self {
            collection,
            indexing_rules: Vec::new(),
            triggers: TriggerRegistry::new(),
        }
    }

    /// Appends one ancestor level's declarations.
    pub(crate) fn merge_level(
        &mut self,
        rules: impl IntoIterator<Item = IndexingRule>,
        bindings: impl IntoIterator<Item = TriggerBinding>,
    ) {
        self.indexing_rules.extend(rules);
        self.triggers.extend(bindings);
    }

    /// Returns the collection this configuration applies to.
    #[must_use]
    pub const fn collection(&self) -> &DbPath {
        &self.collection
    }

    /// Returns inherited indexing rules, root first.
    #[must_use]
    pub fn indexing_rules(&self) -> &[IndexingRule] {
        &self.indexing_rules
    }

    /// Returns the trigger registry.
    #[must_use]
    pub const fn triggers(&self) -> &TriggerRegistry {
        &self.triggers
    }

    /// Returns inherited trigger bindings, root first.
    #[must_use]
    pub fn trigger_bindings(&self) -> &[TriggerBinding] {
        self.triggers.bindings()
    }
}
