//! Trigger dispatch state machine.

use super::diagnostics::TriggerDiagnostics;
use super::event::{LifecycleEvent, Phase};
use super::registry::{DispatchMode, Selected};
use super::variables::{
    declare_event_variables, declare_user_parameters, function_call, HookArguments,
};
use crate::collection::ConfigResolver;
use crate::context::ExecutionContext;
use crate::error::{TriggerError, TriggerResult};
use crate::query::{EvalContext, HookSession, MutationHost, QueryEvaluator};
use arbordb_storage::{DbPath, Transaction};
use std::sync::Arc;
use tracing::{debug, error, instrument};

/// Runs the hooks configured for a mutation.
///
/// Hooks are selected from the configuration of the collection owning the
/// mutation's source: its parent, or the source itself at the root. Each
/// selected hook is compiled, given a fresh variable context and executed
/// inside the caller's transaction.
///
/// Before-phase failures are returned and veto the mutation. After-phase
/// failures are logged, published on [`TriggerDiagnostics`] and swallowed.
pub struct TriggerDispatcher {
    resolver: Arc<ConfigResolver>,
    evaluator: Arc<dyn QueryEvaluator>,
    diagnostics: Arc<TriggerDiagnostics>,
}

impl TriggerDispatcher {
    /// Creates a dispatcher.
    pub fn new(
        resolver: Arc<ConfigResolver>,
        evaluator: Arc<dyn QueryEvaluator>,
        diagnostics: Arc<TriggerDiagnostics>,
    ) -> Self {
        Self {
            resolver,
            evaluator,
            diagnostics,
        }
    }

    /// Dispatches one phase of `event`.
    ///
    /// Nothing happens if no hook is configured or another trigger run
    /// already holds `ctx`. After a successful Before phase the context
    /// stays parked until the After phase of the same source runs or the
    /// caller abandons it.
    ///
    /// # Errors
    ///
    /// Before phase only: returns [`TriggerError`] if configuration cannot
    /// be resolved or a hook fails to compile or run.
    #[allow(clippy::too_many_arguments)]
    #[instrument(
        skip_all,
        fields(event = %event, phase = %phase, path = %source, txn = %txn.id())
    )]
    pub fn dispatch(
        &self,
        host: &dyn MutationHost,
        ctx: &mut ExecutionContext,
        txn: &Transaction,
        event: LifecycleEvent,
        phase: Phase,
        source: &DbPath,
        destination: Option<&DbPath>,
    ) -> TriggerResult<()> {
        match phase {
            Phase::Before => self.dispatch_before(host, ctx, txn, event, source, destination),
            Phase::After => {
                self.dispatch_after(host, ctx, txn, event, source, destination);
                Ok(())
            }
        }
    }

    fn dispatch_before(
        &self,
        host: &dyn MutationHost,
        ctx: &mut ExecutionContext,
        txn: &Transaction,
        event: LifecycleEvent,
        source: &DbPath,
        destination: Option<&DbPath>,
    ) -> TriggerResult<()> {
        let config = self.resolver.resolve(&owning_collection(source))?;
        let selected = config.triggers().select(event);
        if selected.is_empty() {
            return Ok(());
        }
        if !ctx.guard.try_enter(source, Phase::Before) {
            debug!("trigger already running on this context, skipping");
            return Ok(());
        }
        ctx.active_transaction = Some(txn.id());

        for hook in &selected {
            let result =
                self.run_hook(host, ctx, txn, *hook, event, Phase::Before, source, destination);
            if let Err(e) = result {
                ctx.end_trigger_run();
                return Err(e);
            }
        }
        ctx.guard.park();
        Ok(())
    }

    fn dispatch_after(
        &self,
        host: &dyn MutationHost,
        ctx: &mut ExecutionContext,
        txn: &Transaction,
        event: LifecycleEvent,
        source: &DbPath,
        destination: Option<&DbPath>,
    ) {
        let primary = HookArguments::new(event, Phase::After, source, destination).uri;
        let owner = owning_collection(source);
        let config = match self.resolver.resolve(&owner) {
            Ok(config) => config,
            Err(e) => {
                ctx.abandon_parked(source);
                self.report(txn, event, primary, &owner, &TriggerError::from(e));
                return;
            }
        };
        let selected = config.triggers().select(event);
        if selected.is_empty() {
            ctx.abandon_parked(source);
            return;
        }
        if !ctx.guard.resume_after(source) && !ctx.guard.try_enter(source, Phase::After) {
            debug!("trigger already running on this context, skipping");
            return;
        }
        ctx.active_transaction = Some(txn.id());

        for hook in &selected {
            let result =
                self.run_hook(host, ctx, txn, *hook, event, Phase::After, source, destination);
            if let Err(e) = result {
                self.report(txn, event, primary, hook.binding.declared_at(), &e);
            }
        }
        ctx.end_trigger_run();
    }

    #[allow(clippy::too_many_arguments)]
    fn run_hook(
        &self,
        host: &dyn MutationHost,
        ctx: &mut ExecutionContext,
        txn: &Transaction,
        hook: Selected<'_>,
        event: LifecycleEvent,
        phase: Phase,
        source: &DbPath,
        destination: Option<&DbPath>,
    ) -> TriggerResult<()> {
        let binding = hook.binding;
        let compiled = self
            .evaluator
            .compile(binding.source())
            .map_err(|err| TriggerError::Compile {
                declared_at: binding.declared_at().clone(),
                event,
                phase,
                source: err,
            })?;

        let mut variables = EvalContext::new();
        let call = match hook.mode {
            DispatchMode::Event => {
                let args = HookArguments::new(event, phase, source, destination);
                declare_event_variables(&mut variables, binding, event, phase, args);
                None
            }
            DispatchMode::Function => {
                let call = function_call(event, phase, source, destination);
                if !compiled.declares_function(call.namespace, &call.local_name, call.arity()) {
                    debug!(function = %call.local_name, "hook does not declare function, skipping");
                    return Ok(());
                }
                declare_user_parameters(&mut variables, binding);
                Some(call)
            }
        };

        debug!(declared_at = %binding.declared_at(), source = %binding.source(), "running hook");
        let mut session = HookSession::new(ctx, txn, host);
        self.evaluator
            .execute(&mut session, compiled.as_ref(), &variables, call.as_ref())
            .map_err(|err| TriggerError::Eval {
                declared_at: binding.declared_at().clone(),
                event,
                phase,
                source: err,
            })
    }

    fn report(
        &self,
        txn: &Transaction,
        event: LifecycleEvent,
        path: &DbPath,
        declared_at: &DbPath,
        err: &TriggerError,
    ) {
        error!(
            event = %event,
            path = %path,
            declared_at = %declared_at,
            error = %err,
            "after-phase trigger failed"
        );
        self.diagnostics
            .emit(event, path, declared_at, err.to_string(), txn.id());
    }

    /// Returns the diagnostic channel.
    #[must_use]
    pub fn diagnostics(&self) -> &Arc<TriggerDiagnostics> {
        &self.diagnostics
    }
}

impl std::fmt::Debug for TriggerDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerDispatcher")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

/// Returns the collection whose configuration governs `source`.
pub(crate) fn owning_collection(source: &DbPath) -> DbPath {
    source.parent().unwrap_or_else(|| source.clone())
}
