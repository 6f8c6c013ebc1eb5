//! # ArborDB Core
//!
//! The control logic that sits between a structural mutation request and
//! the resource store of ArborDB, a native XML database.
//!
//! This crate provides:
//! - Hierarchical collection configuration with caching and invalidation
//! - Trigger dispatch: lifecycle events, Before/After phases, reentrancy
//!   guarding and variable injection into query-language hooks
//! - An advisory document lock table for client protocols
//! - The [`MutationPipeline`] every create/update/copy/move/delete goes
//!   through
//!
//! Storage, query evaluation and security are collaborators reached through
//! [`ResourceStore`], [`QueryEvaluator`] and [`PermissionChecker`].
//!
//! ## Example
//!
//! ```rust
//! use arbordb_core::{
//!     CompiledQuery, DbPath, EvalContext, EvalError, ExecutionContext, FunctionCall,
//!     HookSession, HookSource, Mutation, MutationPipeline, PipelineConfig, QueryEvaluator,
//! };
//! use arbordb_storage::InMemoryStore;
//! use std::sync::Arc;
//!
//! #[derive(Debug)]
//! struct Noop;
//! impl CompiledQuery for Noop {
//!     fn declares_function(&self, _: &str, _: &str, _: usize) -> bool {
//!         false
//!     }
//!     fn as_any(&self) -> &dyn std::any::Any {
//!         self
//!     }
//! }
//!
//! struct NoHooks;
//! impl QueryEvaluator for NoHooks {
//!     fn compile(&self, _: &HookSource) -> Result<Box<dyn CompiledQuery>, EvalError> {
//!         Ok(Box::new(Noop))
//!     }
//!     fn execute(
//!         &self,
//!         _: &mut HookSession<'_>,
//!         _: &dyn CompiledQuery,
//!         _: &EvalContext,
//!         _: Option<&FunctionCall>,
//!     ) -> Result<(), EvalError> {
//!         Ok(())
//!     }
//! }
//!
//! let store = Arc::new(InMemoryStore::new());
//! let pipeline = MutationPipeline::new(store.clone(), Arc::new(NoHooks), PipelineConfig::new());
//! let books = DbPath::parse("/db/books").unwrap();
//!
//! let mut ctx = ExecutionContext::new();
//! pipeline
//!     .transaction(&mut ctx, |session| {
//!         session.perform(Mutation::CreateCollection { path: books.clone() })
//!     })
//!     .unwrap();
//! assert!(store.get(&books).is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod collection;
mod config;
mod context;
mod error;
pub mod lock;
mod pipeline;
pub mod query;
mod security;
pub mod trigger;

pub use arbordb_storage::{
    DbPath, Mutation, ResourceStore, StoreError, Transaction, TransactionId,
};
pub use collection::{ConfigCache, ConfigResolver, IndexingRule, ResolvedConfig};
pub use config::PipelineConfig;
pub use context::ExecutionContext;
pub use error::{
    ConfigError, ConfigResult, LockError, LockResult, MutationError, MutationResult,
    TriggerError, TriggerResult,
};
pub use lock::{DocumentLockTable, LockScope, LockTimeout, LockToken};
pub use pipeline::MutationPipeline;
pub use query::{
    CompiledQuery, EvalContext, EvalError, FunctionCall, HookSession, HookSource, MutationHost,
    QueryEvaluator, Value,
};
pub use security::{Action, AllowAll, PermissionChecker, Principal};
pub use trigger::{
    AfterPhaseFailure, LifecycleEvent, Phase, TriggerBinding, TriggerDiagnostics,
    TriggerDispatcher,
};
