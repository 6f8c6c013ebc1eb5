//! The mutation pipeline.

use crate::collection::ConfigResolver;
use crate::config::PipelineConfig;
use crate::context::ExecutionContext;
use crate::error::{MutationError, MutationResult};
use crate::lock::DocumentLockTable;
use crate::query::{HookSession, MutationHost, QueryEvaluator};
use crate::security::{AllowAll, PermissionChecker};
use crate::trigger::{LifecycleEvent, Phase, TriggerDiagnostics, TriggerDispatcher};
use arbordb_storage::{DbPath, Mutation, ResourceStore, Transaction, TransactionId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Every structural change to the hierarchy goes through here.
///
/// For one mutation the pipeline:
///
/// 1. checks advisory locks (client requests only)
/// 2. dispatches Before triggers; a failure stops here
/// 3. applies the change through the store
/// 4. dispatches After triggers
/// 5. drops advisory locks of removed documents
/// 6. invalidates affected cached configuration
///
/// Configuration invalidated inside a transaction is invalidated again when
/// that transaction aborts through [`Self::abort`], since a resolution in
/// between may have read the changes the abort undoes.
///
/// Hooks run in the caller's transaction and may perform nested mutations
/// through their [`HookSession`], which re-enter this pipeline with the same
/// execution context.
pub struct MutationPipeline {
    store: Arc<dyn ResourceStore>,
    resolver: Arc<ConfigResolver>,
    dispatcher: TriggerDispatcher,
    locks: Arc<DocumentLockTable>,
    config: PipelineConfig,
    /// Collections whose configuration each open transaction changed.
    touched: Mutex<HashMap<TransactionId, Vec<DbPath>>>,
}

impl MutationPipeline {
    /// Creates a pipeline granting every lock permission.
    pub fn new(
        store: Arc<dyn ResourceStore>,
        evaluator: Arc<dyn QueryEvaluator>,
        config: PipelineConfig,
    ) -> Self {
        Self::with_permissions(store, evaluator, Arc::new(AllowAll), config)
    }

    /// Creates a pipeline whose lock table checks `permissions`.
    pub fn with_permissions(
        store: Arc<dyn ResourceStore>,
        evaluator: Arc<dyn QueryEvaluator>,
        permissions: Arc<dyn PermissionChecker>,
        config: PipelineConfig,
    ) -> Self {
        let locks = Arc::new(DocumentLockTable::new(permissions, &config));
        let resolver = Arc::new(ConfigResolver::new(Arc::clone(&store), config.clone()));
        let diagnostics = Arc::new(TriggerDiagnostics::with_max_history(
            config.diagnostics_history,
        ));
        let dispatcher = TriggerDispatcher::new(Arc::clone(&resolver), evaluator, diagnostics);
        Self {
            store,
            resolver,
            dispatcher,
            locks,
            config,
            touched: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the lock table, e.g. one with a manual clock.
    #[must_use]
    pub fn with_lock_table(mut self, locks: Arc<DocumentLockTable>) -> Self {
        self.locks = locks;
        self
    }

    /// Runs one mutation inside `txn`.
    ///
    /// # Errors
    ///
    /// - [`MutationError::Locked`] if a client request hits another owner's
    ///   advisory lock
    /// - [`MutationError::Trigger`] if a Before-phase hook or its
    ///   configuration fails
    /// - [`MutationError::Storage`] if the store rejects the change
    ///
    /// On error nothing was changed by this call; hooks that already ran
    /// may have made changes in `txn`, so the caller should roll it back
    /// with [`Self::abort`].
    #[instrument(
        skip(self, ctx, txn, mutation),
        fields(event = %LifecycleEvent::of(&mutation), path = %mutation.source(), txn = %txn.id())
    )]
    pub fn perform(
        &self,
        ctx: &mut ExecutionContext,
        txn: &Transaction,
        mutation: Mutation,
    ) -> MutationResult<()> {
        let event = LifecycleEvent::of(&mutation);
        self.check_advisory_locks(ctx, &mutation)?;

        let source = mutation.source().clone();
        let destination = mutation.destination().cloned();
        self.dispatcher.dispatch(
            self,
            ctx,
            txn,
            event,
            Phase::Before,
            &source,
            destination.as_ref(),
        )?;

        if let Err(e) = self.store.perform_mutation(txn, &mutation) {
            ctx.abandon_parked(&source);
            warn!(error = %e, "store rejected mutation");
            return Err(e.into());
        }

        self.dispatcher.dispatch(
            self,
            ctx,
            txn,
            event,
            Phase::After,
            &source,
            destination.as_ref(),
        )?;

        self.release_locks(&mutation);
        self.invalidate_config(txn, &mutation);
        debug!("mutation applied");
        Ok(())
    }

    /// Runs `f` in a new transaction, committing on `Ok` and aborting on
    /// `Err`.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`, or a storage error if the transaction
    /// cannot be opened or committed. A failed abort is logged and does not
    /// replace the original error.
    pub fn transaction<F, T>(&self, ctx: &mut ExecutionContext, f: F) -> MutationResult<T>
    where
        F: FnOnce(&mut HookSession<'_>) -> MutationResult<T>,
    {
        let txn = self.store.open_transaction()?;
        let result = {
            let mut session = HookSession::new(ctx, &txn, self);
            f(&mut session)
        };
        match result {
            Ok(value) => {
                self.commit(&txn)?;
                Ok(value)
            }
            Err(e) => {
                // Don't mask the original error
                if let Err(abort_err) = self.abort(&txn) {
                    warn!(txn = %txn.id(), error = %abort_err, "failed to abort transaction");
                }
                Err(e)
            }
        }
    }

    /// Commits `txn`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store cannot commit. Configuration
    /// the transaction changed is then treated as rolled back.
    pub fn commit(&self, txn: &Transaction) -> MutationResult<()> {
        let result = self.store.commit(txn);
        self.settle(txn, result.is_err());
        result.map_err(Into::into)
    }

    /// Aborts `txn` and drops cached configuration that was resolved from
    /// its changes.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store cannot abort. The cache is
    /// invalidated either way.
    pub fn abort(&self, txn: &Transaction) -> MutationResult<()> {
        let result = self.store.abort(txn);
        self.settle(txn, true);
        result.map_err(Into::into)
    }

    fn settle(&self, txn: &Transaction, rolled_back: bool) {
        let Some(collections) = self.touched.lock().remove(&txn.id()) else {
            return;
        };
        if rolled_back {
            for collection in &collections {
                self.resolver.invalidate(collection);
            }
            debug!(txn = %txn.id(), collections = collections.len(), "invalidated configuration of rolled back transaction");
        }
    }

    /// Refuses client mutations of documents another owner has locked.
    fn check_advisory_locks(
        &self,
        ctx: &ExecutionContext,
        mutation: &Mutation,
    ) -> MutationResult<()> {
        if !self.config.enforce_advisory_locks {
            return Ok(());
        }
        let Some(principal) = ctx.principal() else {
            return Ok(());
        };

        let foreign = |path: &DbPath| {
            self.locks
                .current_lock(path)
                .filter(|token| token.owner != *principal)
        };
        let conflict = match mutation {
            Mutation::CreateDocument { path, .. }
            | Mutation::UpdateDocument { path, .. }
            | Mutation::DeleteDocument { path } => foreign(path),
            Mutation::CopyDocument { destination, .. } => foreign(destination),
            Mutation::MoveDocument {
                source,
                destination,
            } => foreign(source).or_else(|| foreign(destination)),
            Mutation::MoveCollection { source: path, .. } | Mutation::DeleteCollection { path } => {
                self.locks
                    .locks_under(path)
                    .into_iter()
                    .find(|token| token.owner != *principal)
            }
            Mutation::CreateCollection { .. }
            | Mutation::UpdateCollection { .. }
            | Mutation::CopyCollection { .. } => None,
        };

        match conflict {
            Some(token) => {
                debug!(path = %token.document_path, owner = %token.owner, "advisory lock conflict");
                Err(MutationError::Locked {
                    path: token.document_path,
                    owner: token.owner,
                })
            }
            None => Ok(()),
        }
    }

    fn release_locks(&self, mutation: &Mutation) {
        match mutation {
            Mutation::DeleteDocument { path }
            | Mutation::MoveDocument { source: path, .. } => {
                self.locks.release_document(path);
            }
            Mutation::DeleteCollection { path }
            | Mutation::MoveCollection { source: path, .. } => {
                self.locks.release_subtree(path);
            }
            _ => {}
        }
    }

    fn invalidate_config(&self, txn: &Transaction, mutation: &Mutation) {
        let source = mutation.source();
        let affected = self
            .resolver
            .affected_collections(source, mutation.destination());
        for collection in &affected {
            self.resolver.invalidate(collection);
        }
        if mutation.targets_collection() && mutation.removes_source() {
            self.resolver.invalidate(source);
        }
        if affected.is_empty() {
            return;
        }

        let mut touched = self.touched.lock();
        let pending = touched.entry(txn.id()).or_default();
        for collection in affected {
            if !pending.contains(&collection) {
                pending.push(collection);
            }
        }
    }

    /// Returns the configuration resolver.
    #[must_use]
    pub fn resolver(&self) -> &Arc<ConfigResolver> {
        &self.resolver
    }

    /// Returns the advisory lock table.
    #[must_use]
    pub fn locks(&self) -> &Arc<DocumentLockTable> {
        &self.locks
    }

    /// Returns the After-phase failure channel.
    #[must_use]
    pub fn diagnostics(&self) -> &Arc<TriggerDiagnostics> {
        self.dispatcher.diagnostics()
    }

    /// Returns the store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

impl MutationHost for MutationPipeline {
    fn perform(
        &self,
        ctx: &mut ExecutionContext,
        txn: &Transaction,
        mutation: Mutation,
    ) -> MutationResult<()> {
        Self::perform(self, ctx, txn, mutation)
    }
}

impl std::fmt::Debug for MutationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationPipeline")
            .field("resolver", &self.resolver)
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockTimeout;
    use crate::query::{CompiledQuery, EvalContext, EvalError, FunctionCall, HookSource};
    use crate::security::Principal;
    use arbordb_storage::{InMemoryStore, StoreError};

    #[derive(Debug)]
    struct Body(String);

    impl CompiledQuery for Body {
        fn declares_function(&self, _: &str, _: &str, _: usize) -> bool {
            false
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    /// `veto` fails, `touch:<path>` creates a collection, anything else
    /// succeeds.
    struct Evaluator;

    impl QueryEvaluator for Evaluator {
        fn compile(&self, source: &HookSource) -> Result<Box<dyn CompiledQuery>, EvalError> {
            match source {
                HookSource::Inline(text) => Ok(Box::new(Body(text.clone()))),
                HookSource::External(_) => Err(EvalError::compile("external")),
            }
        }

        fn execute(
            &self,
            session: &mut HookSession<'_>,
            query: &dyn CompiledQuery,
            _: &EvalContext,
            _: Option<&FunctionCall>,
        ) -> Result<(), EvalError> {
            let text = format!("{query:?}");
            if text.contains("veto") {
                return Err(EvalError::eval("vetoed"));
            }
            if let Some(start) = text.find("touch:") {
                let raw = text[start + 6..].trim_end_matches(&['"', ')'][..]);
                let path = DbPath::parse(raw).map_err(|e| EvalError::eval(e.to_string()))?;
                session
                    .perform(Mutation::CreateCollection { path })
                    .map_err(|e| EvalError::eval(e.to_string()))?;
            }
            Ok(())
        }
    }

    fn p(raw: &str) -> DbPath {
        DbPath::parse(raw).unwrap()
    }

    fn pipeline() -> (MutationPipeline, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let pipeline =
            MutationPipeline::new(store.clone(), Arc::new(Evaluator), PipelineConfig::default());
        pipeline.resolver().bootstrap().unwrap();
        (pipeline, store)
    }

    fn configure(pipeline: &MutationPipeline, collection: &str, event: &str, query: &str) {
        let json = format!(
            r#"{{"triggers":[{{"parameters":[{{"name":"event","value":"{event}"}},{{"name":"query","value":"{query}"}}]}}]}}"#
        );
        let doc = pipeline.config().config_document_path(&p(collection)).unwrap();
        let mut ctx = ExecutionContext::new();
        pipeline
            .transaction(&mut ctx, |session| {
                for path in doc.parent().unwrap().ancestors_inclusive() {
                    if !pipeline.store().resource_exists(&path) {
                        session.perform(Mutation::CreateCollection { path })?;
                    }
                }
                session.perform(Mutation::CreateDocument {
                    path: doc.clone(),
                    content: json.into_bytes(),
                })
            })
            .unwrap();
    }

    #[test]
    fn before_veto_prevents_store_call() {
        let (pipeline, store) = pipeline();
        configure(&pipeline, "/db", "create-collection", "veto");
        let count = store.mutation_count();

        let mut ctx = ExecutionContext::new();
        let result = pipeline.transaction(&mut ctx, |s| {
            s.perform(Mutation::CreateCollection { path: p("/db/a") })
        });
        assert!(matches!(result, Err(MutationError::Trigger(_))));
        assert_eq!(store.mutation_count(), count);
        assert!(!store.resource_exists(&p("/db/a")));
        assert!(!ctx.is_trigger_running());
    }

    #[test]
    fn hook_mutations_do_not_retrigger() {
        let (pipeline, store) = pipeline();
        configure(&pipeline, "/db", "create-collection", "touch:/db/side");

        let mut ctx = ExecutionContext::new();
        pipeline
            .transaction(&mut ctx, |s| {
                s.perform(Mutation::CreateCollection { path: p("/db/a") })
            })
            .unwrap();

        assert!(store.resource_exists(&p("/db/a")));
        assert!(store.resource_exists(&p("/db/side")));
        assert!(!ctx.is_trigger_running());
    }

    #[test]
    fn failed_store_call_releases_parked_guard() {
        let (pipeline, _) = pipeline();
        configure(&pipeline, "/db", "create-collection", "ok");

        let mut ctx = ExecutionContext::new();
        let txn = pipeline.store().open_transaction().unwrap();
        let err = pipeline
            .perform(&mut ctx, &txn, Mutation::CreateCollection { path: p("/db/missing/child") })
            .unwrap_err();
        assert!(matches!(err, MutationError::Storage(StoreError::ParentNotFound { .. })));
        assert!(!ctx.is_trigger_running());
        assert!(ctx.active_transaction().is_none());
    }

    #[test]
    fn config_document_write_invalidates_cache() {
        let (pipeline, _) = pipeline();
        let before = pipeline.resolver().resolve(&p("/db/a")).unwrap();
        assert!(before.trigger_bindings().is_empty());

        configure(&pipeline, "/db", "create-document", "ok");
        let after = pipeline.resolver().resolve(&p("/db/a")).unwrap();
        assert_eq!(after.trigger_bindings().len(), 1);
    }

    #[test]
    fn aborted_config_write_does_not_stay_cached() {
        let (pipeline, store) = pipeline();
        let doc = pipeline.config().config_document_path(&p("/db")).unwrap();
        let json = br#"{"triggers":[{"parameters":[{"name":"event","value":"create-document"},{"name":"query","value":"ok"}]}]}"#;

        let mut ctx = ExecutionContext::new();
        let txn = store.open_transaction().unwrap();
        pipeline
            .perform(&mut ctx, &txn, Mutation::CreateCollection { path: doc.parent().unwrap() })
            .unwrap();
        pipeline
            .perform(&mut ctx, &txn, Mutation::CreateDocument { path: doc.clone(), content: json.to_vec() })
            .unwrap();
        let uncommitted = pipeline.resolver().resolve(&p("/db/a")).unwrap();
        assert_eq!(uncommitted.trigger_bindings().len(), 1);

        pipeline.abort(&txn).unwrap();
        assert!(!store.resource_exists(&doc));
        assert!(pipeline.resolver().cache().is_empty());
        assert!(pipeline.resolver().resolve(&p("/db/a")).unwrap().trigger_bindings().is_empty());
        assert!(pipeline.touched.lock().is_empty());
    }

    #[test]
    fn committed_config_write_is_forgotten() {
        let (pipeline, _) = pipeline();
        configure(&pipeline, "/db", "create-document", "ok");
        assert!(pipeline.touched.lock().is_empty());
        assert_eq!(pipeline.resolver().resolve(&p("/db/a")).unwrap().trigger_bindings().len(), 1);
    }

    #[test]
    fn client_requests_respect_foreign_locks() {
        let (pipeline, store) = pipeline();
        let doc = p("/db/a.xml");
        let alice = Principal::new("alice");
        let mut internal = ExecutionContext::new();
        pipeline
            .transaction(&mut internal, |s| {
                s.perform(Mutation::CreateDocument { path: doc.clone(), content: b"<a/>".to_vec() })
            })
            .unwrap();
        pipeline
            .locks()
            .lock(&doc, &alice, Some(LockTimeout::Seconds(60)))
            .unwrap();

        let mut bob = ExecutionContext::with_principal(Principal::new("bob"));
        let result = pipeline.transaction(&mut bob, |s| {
            s.perform(Mutation::UpdateDocument { path: doc.clone(), content: b"<b/>".to_vec() })
        });
        assert!(matches!(result, Err(MutationError::Locked { .. })));
        assert_eq!(store.document(&doc), Some(b"<a/>".to_vec()));

        let mut alice_ctx = ExecutionContext::with_principal(alice);
        pipeline
            .transaction(&mut alice_ctx, |s| {
                s.perform(Mutation::UpdateDocument { path: doc.clone(), content: b"<c/>".to_vec() })
            })
            .unwrap();

        // Internal contexts are never checked.
        pipeline
            .transaction(&mut internal, |s| s.perform(Mutation::DeleteDocument { path: doc.clone() }))
            .unwrap();
        assert!(pipeline.locks().current_lock(&doc).is_none());
    }
}
