//! Collection configuration documents.
//!
//! A configuration document is JSON:
//!
//! ```json
//! {
//!   "index": [ { "path": "//title", "kind": "range" } ],
//!   "triggers": [
//!     { "class": "QueryTrigger",
//!       "parameters": [ { "name": "event", "value": "create-document" },
//!                       { "name": "query", "value": "..." } ] }
//!   ]
//! }
//! ```

use crate::error::{ConfigError, ConfigResult};
use crate::query::HookSource;
use crate::trigger::{LifecycleEvent, TriggerBinding};
use arbordb_storage::DbPath;
use serde::{Deserialize, Serialize};

/// The only trigger class the database knows.
pub const QUERY_TRIGGER_CLASS: &str = "QueryTrigger";

/// Kind of index an indexing rule builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Typed range index.
    Range,
    /// Full-text index.
    #[serde(alias = "full-text")]
    FullText,
    /// N-gram index.
    #[serde(alias = "n-gram")]
    NGram,
}

/// An index declaration, inherited by descendant collections.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexingRule {
    /// Node path the index covers.
    pub path: String,
    /// Index kind.
    pub kind: IndexKind,
}

/// A `name`/`value` trigger parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerParameter {
    /// Parameter name.
    pub name: String,
    /// Parameter value.
    pub value: String,
}

/// A trigger declaration as written in a configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerDeclaration {
    /// Trigger class; must be `QueryTrigger` when given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    /// Parameters in document order.
    #[serde(default)]
    pub parameters: Vec<TriggerParameter>,
}

/// A parsed configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigDocument {
    /// Index declarations.
    #[serde(default)]
    pub index: Vec<IndexingRule>,
    /// Trigger declarations.
    #[serde(default)]
    pub triggers: Vec<TriggerDeclaration>,
}

impl ConfigDocument {
    /// Parses a configuration document stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidConfig`] for malformed JSON, unknown
    /// fields or unknown index kinds.
    pub fn parse(path: &DbPath, bytes: &[u8]) -> ConfigResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| ConfigError::invalid_config(path, e.to_string()))
    }

    /// Serializes the document.
    ///
    /// # Errors
    ///
    /// Returns a serialization error (never for documents built in memory).
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    /// Validates the trigger declarations into bindings for `collection`.
    ///
    /// `path` is the document's own path, used in error reports;
    /// `default_prefix` is applied to bindings without `bindingPrefix`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidConfig`] for an unsupported class, an
    /// unknown event name, or a trigger with neither `query` nor `url`.
    pub fn trigger_bindings(
        &self,
        path: &DbPath,
        collection: &DbPath,
        default_prefix: &str,
    ) -> ConfigResult<Vec<TriggerBinding>> {
        self.triggers
            .iter()
            .map(|decl| decl.to_binding(path, collection, default_prefix))
            .collect()
    }
}

impl TriggerDeclaration {
    fn to_binding(
        &self,
        path: &DbPath,
        collection: &DbPath,
        default_prefix: &str,
    ) -> ConfigResult<TriggerBinding> {
        if let Some(class) = &self.class {
            if class != QUERY_TRIGGER_CLASS {
                return Err(ConfigError::invalid_config(
                    path,
                    format!("unsupported trigger class '{class}'"),
                ));
            }
        }

        let mut events = Vec::new();
        let mut query = None;
        let mut url = None;
        let mut prefix = None;
        let mut user = Vec::new();
        for TriggerParameter { name, value } in &self.parameters {
            match name.as_str() {
                "event" => {
                    let parsed = LifecycleEvent::parse_list(value).map_err(|unknown| {
                        ConfigError::invalid_config(path, format!("unknown trigger event '{unknown}'"))
                    })?;
                    events.extend(parsed);
                }
                "query" => {
                    query.get_or_insert(value);
                }
                "url" => {
                    url.get_or_insert(value);
                }
                "bindingPrefix" => {
                    prefix.get_or_insert(value);
                }
                _ => user.push((name, value)),
            }
        }

        let source = match (url, query) {
            (Some(url), _) => HookSource::External(url.clone()),
            (None, Some(query)) => HookSource::Inline(query.clone()),
            (None, None) => {
                return Err(ConfigError::invalid_config(
                    path,
                    "trigger needs a 'query' or 'url' parameter",
                ));
            }
        };

        let mut binding = TriggerBinding::new(collection.clone(), source)
            .with_events(events)
            .with_binding_prefix(default_prefix);
        if let Some(prefix) = prefix {
            binding = binding.with_binding_prefix(prefix);
        }
        for (name, value) in user {
            binding = binding.with_parameter(name.clone(), value.clone());
        }
        Ok(binding)
    }
}
