//! The advisory document lock table.

use super::clock::{Clock, SystemClock};
use super::token::{LockTimeout, LockToken};
use crate::config::PipelineConfig;
use crate::error::{LockError, LockResult};
use crate::security::{Action, PermissionChecker, Principal};
use arbordb_storage::DbPath;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, instrument};

/// Client-visible document locks.
///
/// Locks are advisory: the table never blocks storage operations itself.
/// Client-protocol front-ends take, refresh and release tokens here, and the
/// mutation pipeline consults it for requests that carry a principal.
///
/// At most one live token exists per document. Expired tokens are evicted
/// lazily by whichever operation next looks at them. Every operation runs
/// under one table-wide mutex, so check-then-set is atomic.
pub struct DocumentLockTable {
    entries: Mutex<HashMap<DbPath, LockToken>>,
    permissions: Arc<dyn PermissionChecker>,
    clock: Arc<dyn Clock>,
    default_timeout: Duration,
    max_timeout: Option<Duration>,
}

impl DocumentLockTable {
    /// Creates a table using the system clock and the lock settings of
    /// `config`.
    pub fn new(permissions: Arc<dyn PermissionChecker>, config: &PipelineConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            permissions,
            clock: Arc::new(SystemClock),
            default_timeout: config.default_lock_timeout,
            max_timeout: config.max_lock_timeout,
        }
    }

    /// Replaces the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn effective_timeout(&self, requested: Option<LockTimeout>) -> LockTimeout {
        requested
            .unwrap_or_else(|| LockTimeout::from_duration(self.default_timeout))
            .clamp_to(self.max_timeout)
    }

    /// Locks `path` for `owner`.
    ///
    /// Locking a document the owner already holds refreshes its deadline and
    /// returns the same token id. Without a requested timeout the configured
    /// default applies; every timeout is capped at the configured maximum.
    ///
    /// # Errors
    ///
    /// - [`LockError::PermissionDenied`] if `owner` may not write `path`
    /// - [`LockError::DocumentAlreadyLocked`] if another owner holds a live
    ///   token
    #[instrument(skip(self), fields(path = %path, owner = %owner))]
    pub fn lock(
        &self,
        path: &DbPath,
        owner: &Principal,
        timeout: Option<LockTimeout>,
    ) -> LockResult<LockToken> {
        if !self.permissions.check_permission(owner, path, Action::Write) {
            return Err(LockError::permission_denied(
                owner,
                format!("no write permission on {path}"),
            ));
        }
        let timeout = self.effective_timeout(timeout);
        let now = self.clock.now();

        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get_mut(path) {
            if !existing.is_expired(now) {
                if existing.owner != *owner {
                    return Err(LockError::DocumentAlreadyLocked {
                        path: path.clone(),
                        owner: existing.owner.clone(),
                    });
                }
                existing.renew(timeout, now);
                debug!(token = %existing.token_id, "lock renewed by owner");
                return Ok(existing.clone());
            }
        }

        let token = LockToken::new(path.clone(), owner.clone(), timeout, now);
        entries.insert(path.clone(), token.clone());
        debug!(token = %token.token_id, timeout = %timeout, "lock granted");
        Ok(token)
    }

    /// Restarts the lifetime of a live token.
    ///
    /// # Errors
    ///
    /// - [`LockError::DocumentNotLocked`] if no live token has this id
    /// - [`LockError::PermissionDenied`] if `caller` does not own it
    #[instrument(skip(self), fields(caller = %caller))]
    pub fn refresh(
        &self,
        token_id: &str,
        caller: &Principal,
        timeout: Option<LockTimeout>,
    ) -> LockResult<LockToken> {
        let timeout = self.effective_timeout(timeout);
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let path = Self::owned_entry(&mut entries, token_id, caller, now)?;
        let Some(token) = entries.get_mut(&path) else {
            return Err(LockError::DocumentNotLocked {
                token: token_id.to_owned(),
            });
        };
        token.renew(timeout, now);
        Ok(token.clone())
    }

    /// Releases a live token.
    ///
    /// # Errors
    ///
    /// - [`LockError::DocumentNotLocked`] if no live token has this id
    /// - [`LockError::PermissionDenied`] if `caller` does not own it
    #[instrument(skip(self), fields(caller = %caller))]
    pub fn unlock(&self, token_id: &str, caller: &Principal) -> LockResult<()> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let path = Self::owned_entry(&mut entries, token_id, caller, now)?;
        entries.remove(&path);
        debug!(path = %path, "lock released");
        Ok(())
    }

    /// Finds the live entry for `token_id` and checks `caller` owns it.
    fn owned_entry(
        entries: &mut HashMap<DbPath, LockToken>,
        token_id: &str,
        caller: &Principal,
        now: SystemTime,
    ) -> LockResult<DbPath> {
        let not_locked = || LockError::DocumentNotLocked {
            token: token_id.to_owned(),
        };
        let (path, expired, owner) = entries
            .values()
            .find(|token| token.token_id == token_id)
            .map(|token| {
                (
                    token.document_path.clone(),
                    token.is_expired(now),
                    token.owner.clone(),
                )
            })
            .ok_or_else(not_locked)?;

        if expired {
            entries.remove(&path);
            return Err(not_locked());
        }
        if owner != *caller {
            return Err(LockError::permission_denied(
                caller,
                format!("lock on {path} is owned by {owner}"),
            ));
        }
        Ok(path)
    }

    /// Returns the live token on `path`, evicting it if expired.
    #[must_use]
    pub fn current_lock(&self, path: &DbPath) -> Option<LockToken> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match entries.get(path) {
            Some(token) if token.is_expired(now) => {
                entries.remove(path);
                None
            }
            Some(token) => Some(token.clone()),
            None => None,
        }
    }

    /// Returns the live tokens on `path` and every document below it.
    #[must_use]
    pub fn locks_under(&self, path: &DbPath) -> Vec<LockToken> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        entries.retain(|_, token| !token.is_expired(now));
        let mut found: Vec<LockToken> = entries
            .values()
            .filter(|token| token.document_path.starts_with(path))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.document_path.cmp(&b.document_path));
        found
    }

    /// Drops the token on a deleted or moved document.
    pub fn release_document(&self, path: &DbPath) -> Option<LockToken> {
        let released = self.entries.lock().remove(path);
        if let Some(token) = &released {
            debug!(path = %path, token = %token.token_id, "lock dropped with document");
        }
        released
    }

    /// Drops every token on `path` or below it. Returns how many were
    /// dropped.
    pub fn release_subtree(&self, path: &DbPath) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|locked, _| !locked.starts_with(path));
        let released = before - entries.len();
        if released > 0 {
            debug!(path = %path, released, "locks dropped with collection");
        }
        released
    }

    /// Returns the number of tokens held, live or not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no tokens are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for DocumentLockTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentLockTable")
            .field("locks", &self.len())
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::ManualClock;
    use crate::security::AllowAll;
    use std::thread;

    struct ReadOnlyFor(&'static str);

    impl PermissionChecker for ReadOnlyFor {
        fn check_permission(&self, principal: &Principal, _: &DbPath, action: Action) -> bool {
            principal.name() != self.0 || action == Action::Read
        }
    }

    fn p(raw: &str) -> DbPath {
        DbPath::parse(raw).unwrap()
    }

    fn table() -> (DocumentLockTable, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let config = PipelineConfig::default()
            .default_lock_timeout(Duration::from_secs(60))
            .max_lock_timeout(Some(Duration::from_secs(3600)));
        let table = DocumentLockTable::new(Arc::new(AllowAll), &config).with_clock(clock.clone());
        (table, clock)
    }

    #[test]
    fn second_owner_is_rejected() {
        let (table, _) = table();
        let doc = p("/db/a.xml");
        let alice = Principal::new("alice");
        let bob = Principal::new("bob");

        let token = table.lock(&doc, &alice, None).unwrap();
        assert_eq!(token.timeout, LockTimeout::Seconds(60));
        let err = table.lock(&doc, &bob, None).unwrap_err();
        assert_eq!(
            err,
            LockError::DocumentAlreadyLocked {
                path: doc.clone(),
                owner: alice
            }
        );
        assert!(err.is_retriable());
    }

    #[test]
    fn same_owner_relock_keeps_token_id() {
        let (table, clock) = table();
        let doc = p("/db/a.xml");
        let alice = Principal::new("alice");
        let first = table.lock(&doc, &alice, None).unwrap();
        clock.advance(Duration::from_secs(30));
        let second = table
            .lock(&doc, &alice, Some(LockTimeout::Seconds(120)))
            .unwrap();
        assert_eq!(first.token_id, second.token_id);
        assert!(second.deadline > first.deadline);
    }

    #[test]
    fn expired_lock_is_free_for_others() {
        let (table, clock) = table();
        let doc = p("/db/a.xml");
        table.lock(&doc, &Principal::new("alice"), None).unwrap();
        clock.advance(Duration::from_secs(61));
        assert!(table.current_lock(&doc).is_none());
        let token = table.lock(&doc, &Principal::new("bob"), None).unwrap();
        assert_eq!(token.owner, Principal::new("bob"));
    }

    #[test]
    fn refresh_and_unlock_check_owner() {
        let (table, clock) = table();
        let doc = p("/db/a.xml");
        let alice = Principal::new("alice");
        let bob = Principal::new("bob");
        let token = table.lock(&doc, &alice, None).unwrap();

        assert!(matches!(
            table.refresh(&token.token_id, &bob, None),
            Err(LockError::PermissionDenied { .. })
        ));
        assert!(matches!(
            table.unlock(&token.token_id, &bob),
            Err(LockError::PermissionDenied { .. })
        ));

        clock.advance(Duration::from_secs(50));
        let refreshed = table.refresh(&token.token_id, &alice, None).unwrap();
        clock.advance(Duration::from_secs(50));
        assert_eq!(table.current_lock(&doc), Some(refreshed));

        table.unlock(&token.token_id, &alice).unwrap();
        assert!(table.current_lock(&doc).is_none());
        assert_eq!(
            table.unlock(&token.token_id, &alice),
            Err(LockError::DocumentNotLocked {
                token: token.token_id.clone()
            })
        );
    }

    #[test]
    fn refresh_of_expired_token_fails() {
        let (table, clock) = table();
        let alice = Principal::new("alice");
        let token = table.lock(&p("/db/a.xml"), &alice, None).unwrap();
        clock.advance(Duration::from_secs(60));
        assert!(matches!(
            table.refresh(&token.token_id, &alice, None),
            Err(LockError::DocumentNotLocked { .. })
        ));
        assert!(table.is_empty());
    }

    #[test]
    fn lock_requires_write_permission() {
        let table = DocumentLockTable::new(Arc::new(ReadOnlyFor("guest")), &PipelineConfig::default());
        let err = table
            .lock(&p("/db/a.xml"), &Principal::new("guest"), None)
            .unwrap_err();
        assert!(matches!(err, LockError::PermissionDenied { .. }));
        assert!(table.is_empty());
    }

    #[test]
    fn timeouts_are_capped() {
        let (table, _) = table();
        let token = table
            .lock(&p("/db/a.xml"), &Principal::new("alice"), Some(LockTimeout::Infinite))
            .unwrap();
        assert_eq!(token.timeout, LockTimeout::Seconds(3600));
    }

    #[test]
    fn release_subtree_is_segment_aware() {
        let (table, _) = table();
        let alice = Principal::new("alice");
        for doc in ["/db/a/x.xml", "/db/a/b/y.xml", "/db/ab/z.xml"] {
            table.lock(&p(doc), &alice, None).unwrap();
        }
        assert_eq!(table.locks_under(&p("/db/a")).len(), 2);
        assert_eq!(table.release_subtree(&p("/db/a")), 2);
        assert!(table.current_lock(&p("/db/ab/z.xml")).is_some());
        assert!(table.release_document(&p("/db/ab/z.xml")).is_some());
        assert!(table.is_empty());
    }

    #[test]
    fn concurrent_lockers_get_one_winner() {
        let (table, _) = table();
        let table = Arc::new(table);
        let doc = p("/db/contended.xml");
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let table = Arc::clone(&table);
                let doc = doc.clone();
                thread::spawn(move || table.lock(&doc, &Principal::new(format!("user{i}")), None))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Result::is_ok)
            .count();
        assert_eq!(winners, 1);
    }
}
