//! Diagnostic channel for After-phase hook failures.
//!
//! An After-phase failure cannot veto a mutation that already happened, so
//! it is logged and published here instead of being returned. Operators can
//! subscribe for live notifications or poll recent history.
//!
//! ```rust,ignore
//! let rx = pipeline.diagnostics().subscribe();
//! std::thread::spawn(move || {
//!     while let Ok(failure) = rx.recv() {
//!         eprintln!("{} on {} failed: {}", failure.event, failure.path, failure.message);
//!     }
//! });
//! ```

use super::event::LifecycleEvent;
use arbordb_storage::{DbPath, TransactionId};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

/// One After-phase hook failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AfterPhaseFailure {
    /// Position in the diagnostic stream, starting at 1.
    pub sequence: u64,
    /// Event being dispatched.
    pub event: LifecycleEvent,
    /// Primary resource of the failed hook.
    pub path: DbPath,
    /// Collection whose configuration declared the failed hook.
    pub declared_at: DbPath,
    /// Error description.
    pub message: String,
    /// Transaction the mutation ran in.
    pub transaction: TransactionId,
}

/// Distributes After-phase failures to subscribers and keeps a bounded
/// history.
///
/// Publishing never fails and never blocks on subscribers.
#[derive(Debug)]
pub struct TriggerDiagnostics {
    subscribers: RwLock<Vec<Sender<AfterPhaseFailure>>>,
    history: RwLock<Vec<AfterPhaseFailure>>,
    max_history: usize,
    next_sequence: AtomicU64,
}

impl TriggerDiagnostics {
    /// Creates a channel keeping up to 1000 failures.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_history(1000)
    }

    /// Creates a channel with a specific history limit.
    #[must_use]
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
            next_sequence: AtomicU64::new(1),
        }
    }

    /// Subscribes to future failures.
    pub fn subscribe(&self) -> Receiver<AfterPhaseFailure> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Publishes a failure, assigning its sequence number.
    pub(crate) fn emit(
        &self,
        event: LifecycleEvent,
        path: &DbPath,
        declared_at: &DbPath,
        message: String,
        transaction: TransactionId,
    ) {
        let failure = AfterPhaseFailure {
            sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
            event,
            path: path.clone(),
            declared_at: declared_at.clone(),
            message,
            transaction,
        };

        {
            let mut history = self.history.write();
            history.push(failure.clone());
            if history.len() > self.max_history {
                let excess = history.len() - self.max_history;
                history.drain(0..excess);
            }
        }

        // Disconnected subscribers are dropped.
        self.subscribers
            .write()
            .retain(|tx| tx.send(failure.clone()).is_ok());
    }

    /// Returns failures with sequence > `cursor`, up to `limit`.
    #[must_use]
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<AfterPhaseFailure> {
        self.history
            .read()
            .iter()
            .filter(|f| f.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the sequence number of the latest failure, or 0.
    #[must_use]
    pub fn latest_sequence(&self) -> u64 {
        self.history.read().last().map_or(0, |f| f.sequence)
    }

    /// Returns the number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Returns the number of failures in history.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }
}

impl Default for TriggerDiagnostics {
    fn default() -> Self {
        Self::new()
    }
}
