//! Effective configuration resolution.

use super::cache::ConfigCache;
use super::document::ConfigDocument;
use super::ResolvedConfig;
use crate::config::PipelineConfig;
use crate::error::ConfigResult;
use arbordb_storage::{DbPath, Mutation, ResourceStore};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Computes and caches the effective configuration of collections.
///
/// The resolver walks from the database root down to the requested
/// collection, reading `{config_root}{level}/{config_file_name}` at each
/// level. Declarations of closer ancestors come after those of more distant
/// ones.
pub struct ConfigResolver {
    store: Arc<dyn ResourceStore>,
    cache: ConfigCache,
    config: PipelineConfig,
    bootstrapped: AtomicBool,
    bootstrap_lock: Mutex<()>,
}

impl ConfigResolver {
    /// Creates a resolver reading configuration through `store`.
    pub fn new(store: Arc<dyn ResourceStore>, config: PipelineConfig) -> Self {
        Self {
            store,
            cache: ConfigCache::new(),
            config,
            bootstrapped: AtomicBool::new(false),
            bootstrap_lock: Mutex::new(()),
        }
    }

    /// Returns the effective configuration of `collection`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ConfigError::InvalidConfig`] if a configuration
    /// document on the ancestor chain is malformed, or a storage error.
    /// Nothing is cached on failure.
    #[instrument(skip(self), fields(collection = %collection))]
    pub fn resolve(&self, collection: &DbPath) -> ConfigResult<Arc<ResolvedConfig>> {
        self.bootstrap()?;
        self.cache
            .get_or_resolve(collection, || self.load(collection))
    }

    fn load(&self, collection: &DbPath) -> ConfigResult<ResolvedConfig> {
        let mut resolved = ResolvedConfig::empty(collection.clone());
        for level in collection.ancestors_inclusive() {
            let Some(doc_path) = self.config.config_document_path(&level) else {
                continue;
            };
            let Some(bytes) = self.store.read_config_document(&doc_path)? else {
                continue;
            };
            let document = ConfigDocument::parse(&doc_path, &bytes)?;
            let bindings = document.trigger_bindings(
                &doc_path,
                &level,
                &self.config.default_binding_prefix,
            )?;
            debug!(
                level = %level,
                rules = document.index.len(),
                triggers = bindings.len(),
                "merged configuration level"
            );
            resolved.merge_level(document.index, bindings);
        }
        Ok(resolved)
    }

    /// Creates the configuration root and its missing ancestors.
    ///
    /// Runs once per resolver, in its own transaction, without triggers.
    /// [`Self::resolve`] calls it on first use; call it at startup to create
    /// the root before any client mutation touches its ancestors.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the collections cannot be created.
    pub fn bootstrap(&self) -> ConfigResult<()> {
        if self.bootstrapped.load(Ordering::Acquire) {
            return Ok(());
        }
        let _serialize = self.bootstrap_lock.lock();
        if self.bootstrapped.load(Ordering::Acquire) {
            return Ok(());
        }

        let missing: Vec<DbPath> = self
            .config
            .config_root
            .ancestors_inclusive()
            .into_iter()
            .filter(|path| !self.store.resource_exists(path))
            .collect();

        if !missing.is_empty() {
            let txn = self.store.open_transaction()?;
            let created = missing.iter().try_for_each(|path| {
                self.store
                    .perform_mutation(&txn, &Mutation::CreateCollection { path: path.clone() })
            });
            match created {
                Ok(()) => self.store.commit(&txn)?,
                Err(e) => {
                    if let Err(abort_err) = self.store.abort(&txn) {
                        warn!(error = %abort_err, "failed to abort configuration bootstrap");
                    }
                    return Err(e.into());
                }
            }
            info!(root = %self.config.config_root, created = missing.len(), "created configuration root");
        }

        self.bootstrapped.store(true, Ordering::Release);
        Ok(())
    }

    /// Drops the cached configuration of `path` and everything below it.
    pub fn invalidate(&self, path: &DbPath) -> usize {
        let removed = self.cache.invalidate(path);
        if removed > 0 {
            debug!(path = %path, removed, "invalidated collection configuration");
        }
        removed
    }

    /// Returns the collections whose configuration a change at `source` and
    /// `destination` affects.
    ///
    /// Paths below the configuration root map back to the collection they
    /// configure. The root itself or one of its ancestors affects every
    /// collection. Other paths affect nothing.
    #[must_use]
    pub fn affected_collections(&self, source: &DbPath, destination: Option<&DbPath>) -> Vec<DbPath> {
        let mut affected = Vec::new();
        for path in std::iter::once(source).chain(destination) {
            let collection = if self.config.config_root.starts_with(path) {
                Some(DbPath::root())
            } else {
                self.config.configured_collection(path)
            };
            if let Some(collection) = collection {
                if !affected.contains(&collection) {
                    affected.push(collection);
                }
            }
        }
        affected
    }

    /// Invalidates configuration affected by a change at `source` and
    /// `destination`.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate_for_mutation(&self, source: &DbPath, destination: Option<&DbPath>) -> usize {
        self.affected_collections(source, destination)
            .iter()
            .map(|collection| self.invalidate(collection))
            .sum()
    }

    /// Returns the configuration root.
    #[must_use]
    pub fn config_root(&self) -> &DbPath {
        &self.config.config_root
    }

    /// Returns the cache.
    #[must_use]
    pub const fn cache(&self) -> &ConfigCache {
        &self.cache
    }
}

impl std::fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigResolver")
            .field("config_root", &self.config.config_root)
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::query::HookSource;
    use arbordb_storage::InMemoryStore;

    fn p(raw: &str) -> DbPath {
        DbPath::parse(raw).unwrap()
    }

    fn trigger_json(query: &str) -> String {
        format!(
            r#"{{"triggers":[{{"parameters":[{{"name":"event","value":"create-document"}},{{"name":"query","value":"{query}"}}]}}]}}"#
        )
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        resolver: ConfigResolver,
        config: PipelineConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(InMemoryStore::new());
            let config = PipelineConfig::default();
            let resolver = ConfigResolver::new(store.clone(), config.clone());
            Self {
                store,
                resolver,
                config,
            }
        }

        fn mkcol(&self, raw: &str) {
            let txn = self.store.open_transaction().unwrap();
            for path in p(raw).ancestors_inclusive() {
                if !self.store.resource_exists(&path) {
                    self.store
                        .perform_mutation(&txn, &Mutation::CreateCollection { path })
                        .unwrap();
                }
            }
            self.store.commit(&txn).unwrap();
        }

        fn configure(&self, collection: &str, json: &str) {
            let doc = self.config.config_document_path(&p(collection)).unwrap();
            self.mkcol(doc.parent().unwrap().as_str());
            let txn = self.store.open_transaction().unwrap();
            let mutation = if self.store.resource_exists(&doc) {
                Mutation::UpdateDocument {
                    path: doc,
                    content: json.as_bytes().to_vec(),
                }
            } else {
                Mutation::CreateDocument {
                    path: doc,
                    content: json.as_bytes().to_vec(),
                }
            };
            self.store.perform_mutation(&txn, &mutation).unwrap();
            self.store.commit(&txn).unwrap();
        }
    }

    #[test]
    fn bootstrap_creates_config_root() {
        let fx = Fixture::new();
        assert!(!fx.store.resource_exists(&p("/db/system/config")));
        let resolved = fx.resolver.resolve(&p("/db")).unwrap();
        assert!(resolved.trigger_bindings().is_empty());
        assert!(fx.store.resource_exists(&p("/db/system")));
        assert!(fx.store.resource_exists(&p("/db/system/config")));
    }

    #[test]
    fn bindings_are_ordered_root_to_leaf() {
        let fx = Fixture::new();
        fx.configure("/db", &trigger_json("root"));
        fx.configure("/db/a/b", &trigger_json("leaf"));
        fx.configure("/db/a", &trigger_json("middle"));

        let resolved = fx.resolver.resolve(&p("/db/a/b")).unwrap();
        let sources: Vec<_> = resolved
            .trigger_bindings()
            .iter()
            .map(|b| b.source().clone())
            .collect();
        assert_eq!(
            sources,
            vec![
                HookSource::Inline("root".into()),
                HookSource::Inline("middle".into()),
                HookSource::Inline("leaf".into()),
            ]
        );
        assert_eq!(resolved.trigger_bindings()[1].declared_at(), &p("/db/a"));
    }

    #[test]
    fn invalid_document_fails_and_is_not_cached() {
        let fx = Fixture::new();
        fx.configure("/db/a", "{ broken");
        let err = fx.resolver.resolve(&p("/db/a/b")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfig { .. }));
        assert!(fx.resolver.cache().is_empty());

        fx.configure("/db/a", &trigger_json("fixed"));
        let resolved = fx.resolver.resolve(&p("/db/a/b")).unwrap();
        assert_eq!(resolved.trigger_bindings().len(), 1);
    }

    #[test]
    fn config_change_invalidates_descendants() {
        let fx = Fixture::new();
        let before = fx.resolver.resolve(&p("/db/a/b")).unwrap();
        let sibling = fx.resolver.resolve(&p("/db/c")).unwrap();
        assert!(before.trigger_bindings().is_empty());

        fx.configure("/db/a", &trigger_json("new"));
        let doc = fx.config.config_document_path(&p("/db/a")).unwrap();
        assert_eq!(fx.resolver.invalidate_for_mutation(&doc, None), 1);

        let after = fx.resolver.resolve(&p("/db/a/b")).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.trigger_bindings().len(), 1);
        let sibling_again = fx.resolver.resolve(&p("/db/c")).unwrap();
        assert!(Arc::ptr_eq(&sibling, &sibling_again));
    }

    #[test]
    fn removing_the_config_root_invalidates_everything() {
        let fx = Fixture::new();
        fx.configure("/db", &trigger_json("root"));
        fx.resolver.resolve(&p("/db/a")).unwrap();
        fx.resolver.resolve(&p("/db/b/c")).unwrap();

        assert_eq!(
            fx.resolver.affected_collections(&p("/db/system"), None),
            vec![p("/db")]
        );
        assert_eq!(fx.resolver.invalidate_for_mutation(&p("/db/system/config"), None), 2);
        assert!(fx.resolver.cache().is_empty());
        assert!(fx
            .resolver
            .affected_collections(&p("/db/systemic"), None)
            .is_empty());
    }

    #[test]
    fn paths_outside_config_root_do_not_invalidate() {
        let fx = Fixture::new();
        fx.resolver.resolve(&p("/db/a")).unwrap();
        assert_eq!(fx.resolver.invalidate_for_mutation(&p("/db/a/x.xml"), None), 0);
        assert_eq!(fx.resolver.cache().len(), 1);
    }
}
