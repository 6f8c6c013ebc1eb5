//! Query-evaluation collaborator interface.
//!
//! Hooks are programs in the database's query language. The core never
//! interprets them: it hands a [`HookSource`] to a [`QueryEvaluator`] to
//! compile, declares context variables on a fresh [`EvalContext`], and asks
//! the evaluator to execute the compiled program inside a [`HookSession`].

use crate::context::ExecutionContext;
use crate::error::MutationResult;
use arbordb_storage::{DbPath, Mutation, Transaction};
use std::any::Any;
use std::fmt;
use thiserror::Error;

/// Errors reported by a query evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// The source could not be loaded or compiled.
    #[error("compile error: {0}")]
    Compile(String),

    /// The program failed while running.
    #[error("evaluation error: {0}")]
    Eval(String),
}

impl EvalError {
    /// Creates a compile error.
    pub fn compile(message: impl Into<String>) -> Self {
        Self::Compile(message.into())
    }

    /// Creates an evaluation error.
    pub fn eval(message: impl Into<String>) -> Self {
        Self::Eval(message.into())
    }
}

/// Where a hook's program text comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HookSource {
    /// Program text given inline in the configuration.
    Inline(String),
    /// Reference to a stored module (path or URL), loaded by the evaluator.
    External(String),
}

impl fmt::Display for HookSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline(_) => f.write_str("<inline>"),
            Self::External(location) => f.write_str(location),
        }
    }
}

/// A value bound to an external variable or passed as a function argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A text value (`xs:string`).
    String(String),
    /// A resource URI (`xs:anyURI`).
    AnyUri(DbPath),
    /// The empty sequence.
    Empty,
}

impl Value {
    /// Returns the text of a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::AnyUri(path) => Some(path.as_str()),
            Self::Empty => None,
        }
    }
}

impl From<&DbPath> for Value {
    fn from(path: &DbPath) -> Self {
        Self::AnyUri(path.clone())
    }
}

impl From<Option<&DbPath>> for Value {
    fn from(path: Option<&DbPath>) -> Self {
        path.map_or(Self::Empty, Self::from)
    }
}

/// The variable bindings of one hook execution.
///
/// A fresh context is created for every execution; variables are kept in
/// declaration order and re-declaring a name replaces its value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvalContext {
    variables: Vec<(String, Value)>,
}

impl EvalContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an external variable.
    pub fn declare_variable(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.variables.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => self.variables.push((name, value)),
        }
    }

    /// Returns the value of a declared variable.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    /// Iterates over declared variables in declaration order.
    pub fn variables(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.variables.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Returns the number of declared variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Returns true if nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

/// A function to call in a compiled program instead of its main body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    /// Namespace URI of the function.
    pub namespace: &'static str,
    /// Local name of the function.
    pub local_name: String,
    /// Positional arguments.
    pub args: Vec<Value>,
}

impl FunctionCall {
    /// Returns the function's arity.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.args.len()
    }
}

/// A compiled hook program.
pub trait CompiledQuery: Send + Sync + fmt::Debug {
    /// Returns true if the program declares a function with this name and
    /// arity.
    fn declares_function(&self, namespace: &str, local_name: &str, arity: usize) -> bool;

    /// Returns the program as [`Any`] so its evaluator can recover the
    /// concrete type in [`QueryEvaluator::execute`].
    fn as_any(&self) -> &dyn Any;
}

/// Something that can run nested mutations on behalf of a hook.
///
/// Implemented by [`crate::MutationPipeline`]; hooks reach it through
/// [`HookSession::perform`].
pub trait MutationHost: Send + Sync {
    /// Runs a mutation through the full pipeline.
    ///
    /// # Errors
    ///
    /// Returns the pipeline's error for the nested mutation.
    fn perform(
        &self,
        ctx: &mut ExecutionContext,
        txn: &Transaction,
        mutation: Mutation,
    ) -> MutationResult<()>;
}

/// Everything a running hook may touch.
///
/// The session exposes the caller's execution context and transaction, so a
/// hook's own mutations run in the triggering transaction and are seen by
/// the reentrancy guard.
pub struct HookSession<'a> {
    ctx: &'a mut ExecutionContext,
    txn: &'a Transaction,
    host: &'a dyn MutationHost,
}

impl<'a> HookSession<'a> {
    /// Creates a session.
    pub fn new(
        ctx: &'a mut ExecutionContext,
        txn: &'a Transaction,
        host: &'a dyn MutationHost,
    ) -> Self {
        Self { ctx, txn, host }
    }

    /// Returns the transaction the hook runs in.
    #[must_use]
    pub fn transaction(&self) -> &Transaction {
        self.txn
    }

    /// Returns the caller's execution context.
    #[must_use]
    pub fn context(&self) -> &ExecutionContext {
        self.ctx
    }

    /// Runs a nested mutation in the hook's transaction.
    ///
    /// # Errors
    ///
    /// Returns the pipeline's error for the nested mutation.
    pub fn perform(&mut self, mutation: Mutation) -> MutationResult<()> {
        self.host.perform(self.ctx, self.txn, mutation)
    }
}

impl fmt::Debug for HookSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookSession")
            .field("txn", &self.txn.id())
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

/// The query-evaluation collaborator.
pub trait QueryEvaluator: Send + Sync {
    /// Loads and compiles a hook program.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::Compile`] if the source cannot be loaded or
    /// compiled.
    fn compile(&self, source: &HookSource) -> Result<Box<dyn CompiledQuery>, EvalError>;

    /// Executes a compiled program against an empty initial context.
    ///
    /// With `call` set, the named function is invoked with its arguments
    /// instead of the program body.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::Eval`] if the program fails.
    fn execute(
        &self,
        session: &mut HookSession<'_>,
        query: &dyn CompiledQuery,
        variables: &EvalContext,
        call: Option<&FunctionCall>,
    ) -> Result<(), EvalError>;
}
