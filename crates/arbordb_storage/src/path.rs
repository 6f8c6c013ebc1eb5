//! Database paths.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// An absolute, normalized path in the collection hierarchy.
///
/// Paths look like `/db`, `/db/books` or `/db/books/moby-dick.xml`. They
/// always start with `/`, never end with one, and contain no empty, `.` or
/// `..` segments. Ordering is plain string ordering, so all descendants of a
/// path sort contiguously after `path + "/"`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DbPath(String);

impl DbPath {
    /// Name of the database root collection.
    pub const ROOT: &'static str = "/db";

    /// Parses and normalizes a path.
    ///
    /// A single trailing `/` is accepted and dropped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPath`] if the path is relative, empty,
    /// or contains empty, `.` or `..` segments.
    pub fn parse(raw: &str) -> StoreResult<Self> {
        let trimmed = match raw.strip_suffix('/') {
            Some(rest) if !rest.is_empty() => rest,
            _ => raw,
        };
        let Some(body) = trimmed.strip_prefix('/') else {
            return Err(StoreError::invalid_path(raw, "path must be absolute"));
        };
        if body.is_empty() {
            return Err(StoreError::invalid_path(raw, "path has no segments"));
        }
        for segment in body.split('/') {
            match segment {
                "" => return Err(StoreError::invalid_path(raw, "empty segment")),
                "." | ".." => {
                    return Err(StoreError::invalid_path(raw, "relative segment"));
                }
                _ => {}
            }
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the database root collection path.
    #[must_use]
    pub fn root() -> Self {
        Self(Self::ROOT.to_owned())
    }

    /// Returns the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterates over the path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0[1..].split('/')
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// Returns the last segment.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// Returns the parent path, or `None` for a single-segment path.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        match self.0.rfind('/') {
            Some(0) | None => None,
            Some(idx) => Some(Self(self.0[..idx].to_owned())),
        }
    }

    /// Appends one segment.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPath`] if the segment is empty, relative
    /// or contains a `/`.
    pub fn join(&self, segment: &str) -> StoreResult<Self> {
        if segment.is_empty() || segment == "." || segment == ".." || segment.contains('/') {
            return Err(StoreError::invalid_path(
                format!("{}/{segment}", self.0),
                "invalid segment",
            ));
        }
        Ok(Self(format!("{}/{segment}", self.0)))
    }

    /// Appends every segment of `other` below this path.
    ///
    /// `/db/system/config` joined with `/db/books` is
    /// `/db/system/config/db/books`.
    #[must_use]
    pub fn join_path(&self, other: &Self) -> Self {
        Self(format!("{}{}", self.0, other.0))
    }

    /// Returns true if `prefix` equals this path or is one of its ancestors.
    ///
    /// The comparison is segment-aware: `/db/ab` does not start with `/db/a`.
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        match self.0.strip_prefix(prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Returns true if this path is a strict descendant of `ancestor`.
    #[must_use]
    pub fn is_descendant_of(&self, ancestor: &Self) -> bool {
        self != ancestor && self.starts_with(ancestor)
    }

    /// Removes an ancestor prefix, keeping the remainder absolute.
    ///
    /// `/db/system/config/db/books` stripped of `/db/system/config` is
    /// `/db/books`. Returns `None` unless this is a strict descendant.
    #[must_use]
    pub fn strip_prefix(&self, prefix: &Self) -> Option<Self> {
        if self.is_descendant_of(prefix) {
            Some(Self(self.0[prefix.0.len()..].to_owned()))
        } else {
            None
        }
    }

    /// Re-roots this path from `from` onto `to`.
    ///
    /// Used when a collection subtree is copied or moved.
    #[must_use]
    pub fn rebase(&self, from: &Self, to: &Self) -> Option<Self> {
        if self == from {
            Some(to.clone())
        } else {
            self.strip_prefix(from).map(|rest| to.join_path(&rest))
        }
    }

    /// Returns this path and all of its ancestors, root first.
    #[must_use]
    pub fn ancestors_inclusive(&self) -> Vec<Self> {
        let mut out = Vec::with_capacity(self.depth());
        let mut end = 0;
        for segment in self.segments() {
            end += 1 + segment.len();
            out.push(Self(self.0[..end].to_owned()));
        }
        out
    }

    /// Returns the key that every strict descendant of this path starts with.
    #[must_use]
    pub fn descendant_prefix(&self) -> String {
        format!("{}/", self.0)
    }
}

impl fmt::Display for DbPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DbPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DbPath({})", self.0)
    }
}

impl TryFrom<String> for DbPath {
    type Error = StoreError;

    fn try_from(value: String) -> StoreResult<Self> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for DbPath {
    type Error = StoreError;

    fn try_from(value: &str) -> StoreResult<Self> {
        Self::parse(value)
    }
}

impl From<DbPath> for String {
    fn from(path: DbPath) -> Self {
        path.0
    }
}

impl Borrow<str> for DbPath {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for DbPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
