//! Per-context reentrancy guard.
//!
//! A hook that mutates the database would otherwise fire triggers for its
//! own mutations, and so on forever. The guard holds at most one running
//! marker per [`crate::ExecutionContext`]; while a marker is set, any further
//! dispatch on that context is suppressed.
//!
//! # Phase hand-off
//!
//! The Before and After dispatches of one operation count as a single run:
//!
//! ```text
//!   try_enter(p, Before) ──hooks ok──> park(p) ──store ok──> resume_after(p)
//!          │                               │                      │
//!      hooks fail                      store fails            hooks done
//!          │                               │                      │
//!        leave()                       abandon(p)              leave()
//! ```
//!
//! A parked marker is never set while hooks execute, so nested dispatches
//! issued by a hook always see a plain running marker and are rejected.

use super::event::Phase;
use arbordb_storage::DbPath;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Marker {
    path: DbPath,
    phase: Phase,
    parked: bool,
}

/// Tracks whether a trigger is running on one execution context.
#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    marker: Option<Marker>,
}

impl ReentrancyGuard {
    /// Creates an idle guard.
    #[must_use]
    pub const fn new() -> Self {
        Self { marker: None }
    }

    /// Sets the running marker unless one is already set.
    ///
    /// Returns false, leaving the marker untouched, if any marker (running
    /// or parked) exists, regardless of resource.
    pub fn try_enter(&mut self, path: &DbPath, phase: Phase) -> bool {
        if self.marker.is_some() {
            return false;
        }
        self.marker = Some(Marker {
            path: path.clone(),
            phase,
            parked: false,
        });
        true
    }

    /// Clears the marker.
    pub fn leave(&mut self) {
        self.marker = None;
    }

    /// Parks the running marker between a successful Before phase and the
    /// matching After phase.
    pub fn park(&mut self) {
        if let Some(marker) = &mut self.marker {
            marker.parked = true;
        }
    }

    /// Resumes a marker parked on `path` for the After phase.
    ///
    /// Returns false if no marker is parked on `path`.
    pub fn resume_after(&mut self, path: &DbPath) -> bool {
        match &mut self.marker {
            Some(marker) if marker.parked && marker.path == *path => {
                marker.parked = false;
                marker.phase = Phase::After;
                true
            }
            _ => false,
        }
    }

    /// Releases a marker parked on `path` whose After phase will not run.
    ///
    /// Running markers and markers parked on other paths are kept.
    pub fn abandon(&mut self, path: &DbPath) -> bool {
        match &self.marker {
            Some(marker) if marker.parked && marker.path == *path => {
                self.marker = None;
                true
            }
            _ => false,
        }
    }

    /// Returns true if a marker is set.
    #[must_use]
    pub const fn is_engaged(&self) -> bool {
        self.marker.is_some()
    }

    /// Returns true if a marker is parked awaiting its After phase.
    #[must_use]
    pub fn is_parked(&self) -> bool {
        self.marker.as_ref().is_some_and(|m| m.parked)
    }

    /// Returns the resource and phase of the current marker.
    #[must_use]
    pub fn current(&self) -> Option<(&DbPath, Phase)> {
        self.marker.as_ref().map(|m| (&m.path, m.phase))
    }
}
