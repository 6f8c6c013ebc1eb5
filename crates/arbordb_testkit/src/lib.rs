//! # ArborDB Testkit
//!
//! Test utilities for ArborDB.
//!
//! This crate provides:
//! - A pipeline fixture over the in-memory store ([`TestDb`])
//! - A scriptable query evaluator that records what hooks saw
//! - Property-based test generators using proptest
//! - Test logging setup
//!
//! ## Usage
//!
//! ```rust,ignore
//! use arbordb_testkit::prelude::*;
//!
//! #[test]
//! fn hook_sees_document_uri() {
//!     let db = TestDb::new();
//!     db.evaluator.register_noop("audit");
//!     db.triggers("/db", [TriggerSpec::query("audit").events("create-document")]);
//!     db.system(Mutation::CreateDocument { path: path("/db/a.xml"), content: vec![] }).unwrap();
//!     assert_eq!(db.evaluator.executions_of("audit")[0].text("local:uri"), "/db/a.xml");
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod evaluator;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::evaluator::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_test_tracing;
    pub use arbordb_core::{
        DbPath, ExecutionContext, LifecycleEvent, Mutation, MutationError, Phase, Principal,
    };
}

pub use evaluator::*;
pub use fixtures::*;
pub use generators::*;

/// Initialize test logging (call once per test module).
///
/// Honors `RUST_LOG`; defaults to debug output for the ArborDB crates.
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("arbordb_core=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
