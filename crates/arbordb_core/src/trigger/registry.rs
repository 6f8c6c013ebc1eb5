//! Trigger bindings and per-collection selection.

use super::event::LifecycleEvent;
use crate::config::normalize_prefix;
use crate::query::HookSource;
use arbordb_storage::DbPath;
use std::collections::BTreeSet;

/// Prefix used for hook variables when a binding does not override it.
pub const DEFAULT_BINDING_PREFIX: &str = "local:";

/// A declaration that a hook runs on some events of a collection subtree.
///
/// Bindings are immutable once built. A binding runs its program body for
/// the events it lists. For every other event it calls the per-event
/// function its program declares, if any. A binding with no event list is a
/// catch-all and only ever runs in function mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerBinding {
    source: HookSource,
    events: BTreeSet<LifecycleEvent>,
    binding_prefix: String,
    parameters: Vec<(String, String)>,
    declared_at: DbPath,
}

impl TriggerBinding {
    /// Creates a catch-all binding declared by the configuration of
    /// `declared_at`.
    #[must_use]
    pub fn new(declared_at: DbPath, source: HookSource) -> Self {
        Self {
            source,
            events: BTreeSet::new(),
            binding_prefix: DEFAULT_BINDING_PREFIX.to_owned(),
            parameters: Vec::new(),
            declared_at,
        }
    }

    /// Adds events the binding reacts to.
    #[must_use]
    pub fn with_events(mut self, events: impl IntoIterator<Item = LifecycleEvent>) -> Self {
        self.events.extend(events);
        self
    }

    /// Overrides the variable prefix; `p` becomes `p:`. Blank prefixes are
    /// ignored.
    #[must_use]
    pub fn with_binding_prefix(mut self, prefix: &str) -> Self {
        if !prefix.trim().is_empty() {
            self.binding_prefix = normalize_prefix(prefix);
        }
        self
    }

    /// Adds a user parameter. The first value given for a name wins.
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        if !self.parameters.iter().any(|(existing, _)| *existing == name) {
            self.parameters.push((name, value.into()));
        }
        self
    }

    /// Returns where the hook program comes from.
    #[must_use]
    pub const fn source(&self) -> &HookSource {
        &self.source
    }

    /// Returns the events the binding reacts to (empty for catch-all).
    #[must_use]
    pub const fn events(&self) -> &BTreeSet<LifecycleEvent> {
        &self.events
    }

    /// Returns the variable prefix, always ending in `:`.
    #[must_use]
    pub fn binding_prefix(&self) -> &str {
        &self.binding_prefix
    }

    /// Returns user parameters in declaration order.
    pub fn parameters(&self) -> impl Iterator<Item = (&String, &String)> {
        self.parameters.iter().map(|(name, value)| (name, value))
    }

    /// Returns the collection whose configuration declared the binding.
    #[must_use]
    pub const fn declared_at(&self) -> &DbPath {
        &self.declared_at
    }

    /// Returns true if the binding has no event list and so never runs in
    /// event mode.
    #[must_use]
    pub fn is_catch_all(&self) -> bool {
        self.events.is_empty()
    }
}

/// How a selected binding is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// The program body runs with the event variables declared.
    Event,
    /// The program's per-event function is called.
    Function,
}

/// A binding chosen for one dispatch.
#[derive(Debug, Clone, Copy)]
pub struct Selected<'a> {
    /// The binding.
    pub binding: &'a TriggerBinding,
    /// How to run it.
    pub mode: DispatchMode,
}

/// The ordered trigger bindings in effect for one collection.
///
/// Bindings declared closer to the root come first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerRegistry {
    bindings: Vec<TriggerBinding>,
}

impl TriggerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bindings declared one level further from the root.
    pub fn extend(&mut self, bindings: impl IntoIterator<Item = TriggerBinding>) {
        self.bindings.extend(bindings);
    }

    /// Selects the bindings to run for `event`, in order.
    ///
    /// Every binding is selected. Bindings listing the event run in event
    /// mode, the others in function mode.
    #[must_use]
    pub fn select(&self, event: LifecycleEvent) -> Vec<Selected<'_>> {
        self.bindings
            .iter()
            .map(|binding| Selected {
                binding,
                mode: if binding.events.contains(&event) {
                    DispatchMode::Event
                } else {
                    DispatchMode::Function
                },
            })
            .collect()
    }

    /// Returns every binding in order.
    #[must_use]
    pub fn bindings(&self) -> &[TriggerBinding] {
        &self.bindings
    }

    /// Returns the number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns true if no bindings are in effect.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
