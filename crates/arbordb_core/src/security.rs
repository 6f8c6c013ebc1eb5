//! Security collaborator interface.

use arbordb_storage::DbPath;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An authenticated user or service identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    /// Creates a principal from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the principal's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Actions a principal may be granted on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Read the resource.
    Read,
    /// Modify or lock the resource.
    Write,
    /// Execute the resource as a program.
    Execute,
}

/// Answers "has principal P permission A on resource R".
pub trait PermissionChecker: Send + Sync {
    /// Returns true if `principal` may perform `action` on `resource`.
    fn check_permission(&self, principal: &Principal, resource: &DbPath, action: Action) -> bool;
}

/// A checker that grants everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionChecker for AllowAll {
    fn check_permission(&self, _: &Principal, _: &DbPath, _: Action) -> bool {
        true
    }
}
