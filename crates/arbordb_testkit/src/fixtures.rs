//! Test fixtures and database helpers.
//!
//! [`TestDb`] wires an in-memory store, a [`ScriptedEvaluator`], a manual
//! lock clock and a [`MutationPipeline`] together. Setup helpers write
//! straight to the store so fixtures never fire triggers.

use crate::evaluator::ScriptedEvaluator;
use arbordb_core::collection::{ConfigDocument, IndexingRule, TriggerDeclaration, TriggerParameter};
use arbordb_core::lock::ManualClock;
use arbordb_core::{
    AllowAll, DbPath, DocumentLockTable, ExecutionContext, Mutation, MutationPipeline,
    MutationResult, PermissionChecker, PipelineConfig, Principal, ResourceStore,
};
use arbordb_storage::InMemoryStore;
use std::sync::Arc;

/// Parses a path, panicking on invalid input.
pub fn path(raw: &str) -> DbPath {
    DbPath::parse(raw).unwrap_or_else(|e| panic!("invalid test path {raw}: {e}"))
}

/// A pipeline over an in-memory store with scripted hooks.
pub struct TestDb {
    /// The store.
    pub store: Arc<InMemoryStore>,
    /// The evaluator hooks run on.
    pub evaluator: Arc<ScriptedEvaluator>,
    /// The lock table's clock.
    pub clock: Arc<ManualClock>,
    /// The pipeline under test.
    pub pipeline: MutationPipeline,
}

impl TestDb {
    /// Creates a database with the default configuration.
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    /// Creates a database with a specific configuration.
    pub fn with_config(config: PipelineConfig) -> Self {
        Self::with_permissions(config, Arc::new(AllowAll))
    }

    /// Creates a database whose lock table checks `permissions`.
    pub fn with_permissions(config: PipelineConfig, permissions: Arc<dyn PermissionChecker>) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let evaluator = Arc::new(ScriptedEvaluator::new());
        let clock = Arc::new(ManualClock::default());
        let locks = Arc::new(
            DocumentLockTable::new(Arc::clone(&permissions), &config).with_clock(clock.clone()),
        );
        let pipeline = MutationPipeline::with_permissions(
            store.clone(),
            evaluator.clone(),
            permissions,
            config,
        )
        .with_lock_table(locks);
        pipeline
            .resolver()
            .bootstrap()
            .expect("Failed to create configuration root");
        Self {
            store,
            evaluator,
            clock,
            pipeline,
        }
    }

    /// Runs one mutation in its own transaction.
    pub fn run(&self, ctx: &mut ExecutionContext, mutation: Mutation) -> MutationResult<()> {
        self.pipeline
            .transaction(ctx, |session| session.perform(mutation))
    }

    /// Runs one mutation on behalf of a system caller.
    pub fn system(&self, mutation: Mutation) -> MutationResult<()> {
        self.run(&mut ExecutionContext::new(), mutation)
    }

    /// Runs one mutation on behalf of a client principal.
    pub fn client(&self, principal: &str, mutation: Mutation) -> MutationResult<()> {
        self.run(
            &mut ExecutionContext::with_principal(Principal::new(principal)),
            mutation,
        )
    }

    /// Creates a collection and its missing ancestors without triggers.
    pub fn mkcol(&self, raw: &str) {
        let txn = self.store.open_transaction().expect("Failed to open transaction");
        for level in path(raw).ancestors_inclusive() {
            if !self.store.resource_exists(&level) {
                self.store
                    .perform_mutation(&txn, &Mutation::CreateCollection { path: level })
                    .expect("Failed to create collection");
            }
        }
        self.store.commit(&txn).expect("Failed to commit");
    }

    /// Stores a document without triggers, creating its collection.
    pub fn put(&self, raw: &str, content: &str) {
        let doc = path(raw);
        if let Some(parent) = doc.parent() {
            self.mkcol(parent.as_str());
        }
        let mutation = if self.store.resource_exists(&doc) {
            Mutation::UpdateDocument {
                path: doc,
                content: content.as_bytes().to_vec(),
            }
        } else {
            Mutation::CreateDocument {
                path: doc,
                content: content.as_bytes().to_vec(),
            }
        };
        let txn = self.store.open_transaction().expect("Failed to open transaction");
        self.store
            .perform_mutation(&txn, &mutation)
            .expect("Failed to store document");
        self.store.commit(&txn).expect("Failed to commit");
    }

    /// Writes the configuration document of `collection`.
    ///
    /// The write bypasses the pipeline, so the cached configuration is
    /// invalidated explicitly.
    pub fn configure(&self, collection: &str, document: &ConfigDocument) {
        let bytes = document.to_bytes().expect("Failed to serialize configuration");
        self.configure_raw(collection, &bytes);
    }

    /// Writes a configuration document given as JSON.
    pub fn configure_json(&self, collection: &str, json: &serde_json::Value) {
        let bytes = serde_json::to_vec(json).expect("Failed to serialize configuration");
        self.configure_raw(collection, &bytes);
    }

    /// Writes configuration triggers for `collection`.
    pub fn triggers(&self, collection: &str, specs: impl IntoIterator<Item = TriggerSpec>) {
        self.configure(
            collection,
            &ConfigDocument {
                index: Vec::new(),
                triggers: specs.into_iter().map(TriggerSpec::into_declaration).collect(),
            },
        );
    }

    fn configure_raw(&self, collection: &str, bytes: &[u8]) {
        let doc = self
            .pipeline
            .config()
            .config_document_path(&path(collection))
            .expect("Invalid configuration document path");
        self.put(doc.as_str(), &String::from_utf8_lossy(bytes));
        self.pipeline.resolver().invalidate_for_mutation(&doc, None);
    }

    /// Returns the configuration document path of `collection`.
    pub fn config_path(&self, collection: &str) -> DbPath {
        self.pipeline
            .config()
            .config_document_path(&path(collection))
            .expect("Invalid configuration document path")
    }

    /// Returns true if the resource exists.
    pub fn exists(&self, raw: &str) -> bool {
        self.store.resource_exists(&path(raw))
    }
}

impl Default for TestDb {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestDb {
    type Target = MutationPipeline;

    fn deref(&self) -> &Self::Target {
        &self.pipeline
    }
}

/// Builder for a trigger declaration.
#[derive(Debug, Clone, Default)]
pub struct TriggerSpec {
    class: Option<String>,
    parameters: Vec<TriggerParameter>,
}

impl TriggerSpec {
    /// A trigger running an inline program.
    pub fn query(program: &str) -> Self {
        Self::default().param("query", program)
    }

    /// A trigger loading its program from `location`.
    pub fn url(location: &str) -> Self {
        Self::default().param("url", location)
    }

    /// Restricts the trigger to a comma or space separated event list.
    #[must_use]
    pub fn events(self, events: &str) -> Self {
        self.param("event", events)
    }

    /// Sets the variable prefix.
    #[must_use]
    pub fn binding_prefix(self, prefix: &str) -> Self {
        self.param("bindingPrefix", prefix)
    }

    /// Sets the trigger class.
    #[must_use]
    pub fn class(mut self, class: &str) -> Self {
        self.class = Some(class.to_owned());
        self
    }

    /// Adds a parameter.
    #[must_use]
    pub fn param(mut self, name: &str, value: &str) -> Self {
        self.parameters.push(TriggerParameter {
            name: name.to_owned(),
            value: value.to_owned(),
        });
        self
    }

    /// Builds the declaration.
    pub fn into_declaration(self) -> TriggerDeclaration {
        TriggerDeclaration {
            class: self.class,
            parameters: self.parameters,
        }
    }
}

/// Builds a configuration document with index rules only.
pub fn index_document(rules: impl IntoIterator<Item = IndexingRule>) -> ConfigDocument {
    ConfigDocument {
        index: rules.into_iter().collect(),
        triggers: Vec::new(),
    }
}
