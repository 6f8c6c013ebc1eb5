//! Pipeline configuration.

use arbordb_storage::DbPath;
use std::time::Duration;

/// Configuration for a [`crate::MutationPipeline`] and its components.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Collection mirroring the data hierarchy that holds configuration
    /// documents.
    pub config_root: DbPath,

    /// File name of the configuration document at each level.
    pub config_file_name: String,

    /// Variable prefix used when a trigger does not override it.
    pub default_binding_prefix: String,

    /// Lock timeout used when a client does not request one.
    pub default_lock_timeout: Duration,

    /// Upper bound for requested lock timeouts (`None` = unbounded).
    pub max_lock_timeout: Option<Duration>,

    /// Whether requests carrying a principal must respect advisory locks.
    pub enforce_advisory_locks: bool,

    /// Number of After-phase failures kept for polling.
    pub diagnostics_history: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            config_root: DbPath::root().join_path(&Self::system_config_suffix()),
            config_file_name: "collection.xconf.json".to_owned(),
            default_binding_prefix: "local:".to_owned(),
            default_lock_timeout: Duration::from_secs(3600), // 1 hour
            max_lock_timeout: Some(Duration::from_secs(7 * 24 * 3600)), // 1 week
            enforce_advisory_locks: true,
            diagnostics_history: 1000,
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn system_config_suffix() -> DbPath {
        // Both segments are static and valid.
        DbPath::parse("/system/config").unwrap_or_else(|_| DbPath::root())
    }

    /// Sets the configuration root collection.
    #[must_use]
    pub fn config_root(mut self, root: DbPath) -> Self {
        self.config_root = root;
        self
    }

    /// Sets the configuration document file name.
    #[must_use]
    pub fn config_file_name(mut self, name: impl Into<String>) -> Self {
        self.config_file_name = name.into();
        self
    }

    /// Sets the default binding prefix (a trailing `:` is added if missing).
    #[must_use]
    pub fn default_binding_prefix(mut self, prefix: &str) -> Self {
        self.default_binding_prefix = normalize_prefix(prefix);
        self
    }

    /// Sets the default lock timeout.
    #[must_use]
    pub const fn default_lock_timeout(mut self, timeout: Duration) -> Self {
        self.default_lock_timeout = timeout;
        self
    }

    /// Sets the maximum lock timeout.
    #[must_use]
    pub const fn max_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.max_lock_timeout = timeout;
        self
    }

    /// Sets whether client requests must respect advisory locks.
    #[must_use]
    pub const fn enforce_advisory_locks(mut self, value: bool) -> Self {
        self.enforce_advisory_locks = value;
        self
    }

    /// Sets the diagnostics history size.
    #[must_use]
    pub const fn diagnostics_history(mut self, size: usize) -> Self {
        self.diagnostics_history = size;
        self
    }

    /// Returns the path of the configuration document for `collection`.
    ///
    /// `/db/books` maps to `/db/system/config/db/books/collection.xconf.json`.
    #[must_use]
    pub fn config_document_path(&self, collection: &DbPath) -> Option<DbPath> {
        self.config_root
            .join_path(collection)
            .join(&self.config_file_name)
            .ok()
    }

    /// Maps a path below the configuration root back to the collection whose
    /// configuration it affects.
    ///
    /// A configuration document maps to its mirrored collection; any other
    /// path maps to the mirrored collection itself. Paths outside the root
    /// return `None`.
    #[must_use]
    pub fn configured_collection(&self, path: &DbPath) -> Option<DbPath> {
        let mirrored = path.strip_prefix(&self.config_root)?;
        if mirrored.name() == self.config_file_name {
            mirrored.parent()
        } else {
            Some(mirrored)
        }
    }
}

/// Trims a binding prefix and ensures it ends with `:`.
pub(crate) fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim();
    if trimmed.ends_with(':') {
        trimmed.to_owned()
    } else {
        format!("{trimmed}:")
    }
}
