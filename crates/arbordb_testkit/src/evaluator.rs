//! A scriptable query evaluator.
//!
//! Hook programs are Rust closures registered under the text a binding
//! names: the inline query for `query` parameters, the location for `url`
//! parameters. Every execution is recorded with the variables and function
//! call it received so tests can assert on what a hook saw.

use arbordb_core::query::{CompiledQuery, EvalContext, EvalError, FunctionCall, HookSession, HookSource};
use arbordb_core::trigger::TRIGGER_NAMESPACE;
use arbordb_core::{DbPath, Mutation, TransactionId};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Body of a scripted hook program.
pub type Script = Arc<
    dyn Fn(&mut HookSession<'_>, &EvalContext, Option<&FunctionCall>) -> Result<(), EvalError>
        + Send
        + Sync,
>;

/// One recorded hook execution.
#[derive(Debug, Clone)]
pub struct Execution {
    /// Program name (inline text or location).
    pub program: String,
    /// Declared variables, rendered as strings; `None` is the empty sequence.
    pub variables: Vec<(String, Option<String>)>,
    /// Function invoked instead of the body.
    pub call: Option<FunctionCall>,
    /// Transaction the hook ran in.
    pub transaction: TransactionId,
    /// Whether the context reported a running trigger.
    pub trigger_running: bool,
}

impl Execution {
    /// Returns a variable's value; `Some(None)` for the empty sequence.
    pub fn variable(&self, name: &str) -> Option<Option<&str>> {
        self.variables
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_deref())
    }

    /// Returns a variable that must hold a value.
    ///
    /// # Panics
    ///
    /// Panics if the variable is missing or empty.
    pub fn text(&self, name: &str) -> &str {
        match self.variable(name) {
            Some(Some(value)) => value,
            other => panic!("variable {name} of {} is {other:?}", self.program),
        }
    }

    /// Returns the positional arguments of the function call as strings.
    pub fn call_args(&self) -> Vec<Option<String>> {
        self.call
            .as_ref()
            .map(|call| {
                call.args
                    .iter()
                    .map(|v| v.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Clone)]
struct Program {
    script: Script,
    functions: Vec<(String, usize)>,
}

/// A compiled scripted program.
struct ScriptedQuery {
    name: String,
    functions: Vec<(String, usize)>,
}

impl fmt::Debug for ScriptedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedQuery")
            .field("name", &self.name)
            .field("functions", &self.functions)
            .finish()
    }
}

impl CompiledQuery for ScriptedQuery {
    fn declares_function(&self, namespace: &str, local_name: &str, arity: usize) -> bool {
        namespace == TRIGGER_NAMESPACE
            && self
                .functions
                .iter()
                .any(|(name, n)| name == local_name && *n == arity)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A [`arbordb_core::QueryEvaluator`] running registered closures.
///
/// Compiling an unregistered program fails with a compile error.
#[derive(Default)]
pub struct ScriptedEvaluator {
    programs: Mutex<HashMap<String, Program>>,
    executions: Mutex<Vec<Execution>>,
    compilations: Mutex<usize>,
}

impl ScriptedEvaluator {
    /// Creates an evaluator with no programs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a program.
    pub fn register<F>(&self, name: impl Into<String>, script: F)
    where
        F: Fn(&mut HookSession<'_>, &EvalContext, Option<&FunctionCall>) -> Result<(), EvalError>
            + Send
            + Sync
            + 'static,
    {
        self.programs.lock().insert(
            name.into(),
            Program {
                script: Arc::new(script),
                functions: Vec::new(),
            },
        );
    }

    /// Registers a program that does nothing.
    pub fn register_noop(&self, name: impl Into<String>) {
        self.register(name, |_, _, _| Ok(()));
    }

    /// Registers a program that always fails with `message`.
    pub fn register_failing(&self, name: impl Into<String>, message: &str) {
        let message = message.to_owned();
        self.register(name, move |_, _, _| Err(EvalError::eval(message.clone())));
    }

    /// Registers a program that runs `mutation` through its session.
    pub fn register_mutating(&self, name: impl Into<String>, mutation: Mutation) {
        self.register(name, move |session, _, _| {
            session
                .perform(mutation.clone())
                .map_err(|e| EvalError::eval(e.to_string()))
        });
    }

    /// Declares trigger-namespace functions on a registered program.
    ///
    /// # Panics
    ///
    /// Panics if the program is not registered.
    pub fn declare_functions(&self, name: &str, functions: &[(&str, usize)]) {
        let mut programs = self.programs.lock();
        let program = programs
            .get_mut(name)
            .unwrap_or_else(|| panic!("program {name} is not registered"));
        program
            .functions
            .extend(functions.iter().map(|(f, arity)| ((*f).to_owned(), *arity)));
    }

    /// Returns all recorded executions.
    pub fn executions(&self) -> Vec<Execution> {
        self.executions.lock().clone()
    }

    /// Returns the recorded executions of one program.
    pub fn executions_of(&self, program: &str) -> Vec<Execution> {
        self.executions
            .lock()
            .iter()
            .filter(|e| e.program == program)
            .cloned()
            .collect()
    }

    /// Returns how many programs were compiled.
    pub fn compilations(&self) -> usize {
        *self.compilations.lock()
    }

    /// Forgets recorded executions.
    pub fn clear(&self) {
        self.executions.lock().clear();
    }
}

impl fmt::Debug for ScriptedEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedEvaluator")
            .field("programs", &self.programs.lock().len())
            .field("executions", &self.executions.lock().len())
            .finish()
    }
}

impl arbordb_core::QueryEvaluator for ScriptedEvaluator {
    fn compile(&self, source: &HookSource) -> Result<Box<dyn CompiledQuery>, EvalError> {
        let name = match source {
            HookSource::Inline(text) => text,
            HookSource::External(location) => location,
        };
        let programs = self.programs.lock();
        let program = programs
            .get(name)
            .ok_or_else(|| EvalError::compile(format!("unknown program {name}")))?;
        *self.compilations.lock() += 1;
        Ok(Box::new(ScriptedQuery {
            name: name.clone(),
            functions: program.functions.clone(),
        }))
    }

    fn execute(
        &self,
        session: &mut HookSession<'_>,
        query: &dyn CompiledQuery,
        variables: &EvalContext,
        call: Option<&FunctionCall>,
    ) -> Result<(), EvalError> {
        let query = query
            .as_any()
            .downcast_ref::<ScriptedQuery>()
            .ok_or_else(|| EvalError::eval("not a scripted program"))?;
        // Clone out so the script may re-enter the evaluator.
        let script = self
            .programs
            .lock()
            .get(&query.name)
            .map(|program| Arc::clone(&program.script))
            .ok_or_else(|| EvalError::eval(format!("program {} was unregistered", query.name)))?;

        self.executions.lock().push(Execution {
            program: query.name.clone(),
            variables: variables
                .variables()
                .map(|(name, value)| (name.to_owned(), value.as_str().map(str::to_owned)))
                .collect(),
            call: call.cloned(),
            transaction: session.transaction().id(),
            trigger_running: session.context().is_trigger_running(),
        });
        script(session, variables, call)
    }
}

/// Parses a path inside a script, mapping failures to evaluation errors.
pub fn script_path(raw: &str) -> Result<DbPath, EvalError> {
    DbPath::parse(raw).map_err(|e| EvalError::eval(e.to_string()))
}
