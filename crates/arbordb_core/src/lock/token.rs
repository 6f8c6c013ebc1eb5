//! Lock tokens and timeouts.

use crate::security::Principal;
use arbordb_storage::DbPath;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// URI scheme of lock token identifiers.
pub const TOKEN_SCHEME: &str = "opaquelocktoken:";

/// Lock scope. Only exclusive locks are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockScope {
    /// No other owner may lock the document.
    #[default]
    Exclusive,
}

/// Requested or granted lock lifetime.
///
/// Written the way the WebDAV `Timeout` header does: `Infinite` or
/// `Second-<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LockTimeout {
    /// Never expires.
    Infinite,
    /// Expires after this many seconds.
    Seconds(u64),
}

impl LockTimeout {
    /// Creates a timeout from a duration, rounded down to whole seconds.
    #[must_use]
    pub const fn from_duration(duration: Duration) -> Self {
        Self::Seconds(duration.as_secs())
    }

    /// Parses a `Timeout` header value: a comma-separated preference list
    /// of which the first understood entry is used.
    #[must_use]
    pub fn parse_header(value: &str) -> Option<Self> {
        value.split(',').find_map(|entry| entry.parse().ok())
    }

    /// Returns the lifetime, or `None` for an infinite timeout.
    #[must_use]
    pub const fn as_duration(self) -> Option<Duration> {
        match self {
            Self::Infinite => None,
            Self::Seconds(secs) => Some(Duration::from_secs(secs)),
        }
    }

    /// Caps the timeout at `max` (`None` = no cap). A finite timeout is
    /// never shorter than one second.
    #[must_use]
    pub fn clamp_to(self, max: Option<Duration>) -> Self {
        let capped = match (self, max) {
            (Self::Seconds(secs), Some(max)) if secs > max.as_secs() => Self::from_duration(max),
            (Self::Infinite, Some(max)) => Self::from_duration(max),
            _ => self,
        };
        match capped {
            Self::Seconds(0) => Self::Seconds(1),
            other => other,
        }
    }
}

impl FromStr for LockTimeout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("infinite") {
            return Ok(Self::Infinite);
        }
        s.get(..7)
            .filter(|prefix| prefix.eq_ignore_ascii_case("second-"))
            .and_then(|_| s[7..].parse().ok())
            .map(Self::Seconds)
            .ok_or_else(|| format!("invalid lock timeout '{s}'"))
    }
}

impl fmt::Display for LockTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infinite => f.write_str("Infinite"),
            Self::Seconds(secs) => write!(f, "Second-{secs}"),
        }
    }
}

impl TryFrom<String> for LockTimeout {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LockTimeout> for String {
    fn from(timeout: LockTimeout) -> Self {
        timeout.to_string()
    }
}

/// A live advisory lock on one document.
///
/// Serializes for lock discovery responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockToken {
    /// `opaquelocktoken:<uuid>`.
    pub token_id: String,
    /// Principal holding the lock.
    pub owner: Principal,
    /// Locked document.
    pub document_path: DbPath,
    /// Lock scope.
    pub scope: LockScope,
    /// Granted timeout.
    pub timeout: LockTimeout,
    /// Expiry instant, `None` for infinite locks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<SystemTime>,
}

impl LockToken {
    pub(crate) fn new(
        document_path: DbPath,
        owner: Principal,
        timeout: LockTimeout,
        now: SystemTime,
    ) -> Self {
        let mut token = Self {
            token_id: format!("{TOKEN_SCHEME}{}", Uuid::new_v4()),
            owner,
            document_path,
            scope: LockScope::Exclusive,
            timeout,
            deadline: None,
        };
        token.renew(timeout, now);
        token
    }

    /// Restarts the lifetime with `timeout`, keeping the token id.
    pub(crate) fn renew(&mut self, timeout: LockTimeout, now: SystemTime) {
        self.timeout = timeout;
        self.deadline = timeout
            .as_duration()
            .map(|lifetime| saturating_deadline(now, lifetime));
    }

    /// Returns true if the lock has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Returns the remaining lifetime at `now`; `None` for infinite locks.
    #[must_use]
    pub fn remaining(&self, now: SystemTime) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.duration_since(now).unwrap_or(Duration::ZERO))
    }
}

/// Returns `now + lifetime`, or the latest instant the platform can
/// represent on the way there.
fn saturating_deadline(now: SystemTime, lifetime: Duration) -> SystemTime {
    if let Some(deadline) = now.checked_add(lifetime) {
        return deadline;
    }
    let mut step = lifetime;
    let mut deadline = now;
    while !step.is_zero() {
        match deadline.checked_add(step) {
            Some(later) => deadline = later,
            None => step /= 2,
        }
    }
    deadline
}
