//! Cache of resolved collection configurations.
//!
//! The cache is an ordered arena keyed by collection path. Because all
//! descendants of a path sort contiguously after `path + "/"`, invalidating a
//! subtree is a single range scan.
//!
//! Resolution is single-flight per path: the first caller for an uncached
//! path inserts a pending slot and resolves outside the lock; later callers
//! for the same path wait on that slot. An invalidation removes pending
//! slots too, and a resolution only publishes its result if its own slot is
//! still in place, so a result computed from configuration that changed
//! mid-flight is never cached.

use super::ResolvedConfig;
use crate::error::ConfigResult;
use arbordb_storage::DbPath;
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

#[derive(Debug, Default)]
struct InFlight {
    /// `Some(None)`: resolution failed or was invalidated, retry.
    outcome: Mutex<Option<Option<Arc<ResolvedConfig>>>>,
    done: Condvar,
}

impl InFlight {
    fn finish(&self, outcome: Option<Arc<ResolvedConfig>>) {
        *self.outcome.lock() = Some(outcome);
        self.done.notify_all();
    }

    fn wait(&self) -> Option<Arc<ResolvedConfig>> {
        let mut outcome = self.outcome.lock();
        loop {
            if let Some(result) = outcome.as_ref() {
                return result.clone();
            }
            self.done.wait(&mut outcome);
        }
    }
}

#[derive(Debug)]
enum Slot {
    Ready(Arc<ResolvedConfig>),
    Pending(Arc<InFlight>),
}

enum Role {
    Leader(Arc<InFlight>),
    Waiter(Arc<InFlight>),
}

/// Resolved configurations keyed by collection path.
///
/// At most one [`ResolvedConfig`] exists per path at any time; entries are
/// removed on invalidation, never patched in place.
#[derive(Debug, Default)]
pub struct ConfigCache {
    slots: Mutex<BTreeMap<DbPath, Slot>>,
}

impl ConfigCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached configuration for `path`, if resolved.
    #[must_use]
    pub fn get(&self, path: &DbPath) -> Option<Arc<ResolvedConfig>> {
        match self.slots.lock().get(path) {
            Some(Slot::Ready(config)) => Some(Arc::clone(config)),
            _ => None,
        }
    }

    /// Returns the cached configuration for `path`, resolving it with
    /// `resolve` on a miss.
    ///
    /// Concurrent callers for the same uncached path share one resolution.
    ///
    /// # Errors
    ///
    /// Returns the error of this caller's own `resolve` call. Callers that
    /// waited on a failed resolution retry with their own `resolve`.
    pub fn get_or_resolve<F>(&self, path: &DbPath, mut resolve: F) -> ConfigResult<Arc<ResolvedConfig>>
    where
        F: FnMut() -> ConfigResult<ResolvedConfig>,
    {
        loop {
            let role = {
                let mut slots = self.slots.lock();
                match slots.get(path) {
                    Some(Slot::Ready(config)) => return Ok(Arc::clone(config)),
                    Some(Slot::Pending(flight)) => Role::Waiter(Arc::clone(flight)),
                    None => {
                        let flight = Arc::new(InFlight::default());
                        slots.insert(path.clone(), Slot::Pending(Arc::clone(&flight)));
                        Role::Leader(flight)
                    }
                }
            };

            match role {
                Role::Waiter(flight) => {
                    if let Some(config) = flight.wait() {
                        return Ok(config);
                    }
                }
                Role::Leader(flight) => {
                    let result = resolve().map(Arc::new);
                    let published = {
                        let mut slots = self.slots.lock();
                        let ours = matches!(
                            slots.get(path),
                            Some(Slot::Pending(current)) if Arc::ptr_eq(current, &flight)
                        );
                        match (&result, ours) {
                            (Ok(config), true) => {
                                slots.insert(path.clone(), Slot::Ready(Arc::clone(config)));
                                Some(Arc::clone(config))
                            }
                            (Err(_), true) => {
                                slots.remove(path);
                                None
                            }
                            (_, false) => None,
                        }
                    };
                    flight.finish(published);
                    return result;
                }
            }
        }
    }

    /// Removes the entries for `path` and every path below it.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate(&self, path: &DbPath) -> usize {
        let mut slots = self.slots.lock();
        let prefix = path.descendant_prefix();
        let doomed: Vec<DbPath> = slots
            .range::<str, _>((Bound::Included(prefix.as_str()), Bound::Unbounded))
            .take_while(|(key, _)| key.as_str().starts_with(&prefix))
            .map(|(key, _)| key.clone())
            .collect();

        let mut removed = usize::from(slots.remove(path).is_some());
        for key in doomed {
            slots.remove(&key);
            removed += 1;
        }
        removed
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    /// Returns the number of resolved entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    /// Returns true if nothing is resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
