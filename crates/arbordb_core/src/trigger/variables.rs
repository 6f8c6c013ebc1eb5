//! Variable injection for hook executions.
//!
//! Event-mode hooks see these external variables, each named with the
//! binding's prefix (`local:` unless overridden):
//!
//! | name | value |
//! |---|---|
//! | `type` | phase name, `prepare` or `finish` |
//! | `event` | event name, e.g. `create-document` |
//! | `collection` | the uri for collection events, its parent for documents |
//! | `uri` | primary resource |
//! | `new-uri` | secondary resource or the empty sequence |
//! | `eventType`, `triggerEvent`, `collectionName` | deprecated aliases |
//! | `documentName` | deprecated alias of `uri`, document events only |
//!
//! plus one text variable per user parameter.

use super::event::{LifecycleEvent, Phase};
use super::registry::TriggerBinding;
use crate::query::{EvalContext, FunctionCall, Value};
use arbordb_storage::DbPath;

/// Namespace of the per-event functions hooks declare.
pub const TRIGGER_NAMESPACE: &str = "http://arbordb.dev/ns/trigger";

/// The primary and secondary resource of one hook execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HookArguments<'a> {
    pub uri: &'a DbPath,
    pub new_uri: Option<&'a DbPath>,
}

impl<'a> HookArguments<'a> {
    /// Orders source and destination for a phase.
    ///
    /// Before hooks see the source as primary and the destination as
    /// secondary. After a copy or move the destination is the resource
    /// that now exists, so it becomes primary and the source secondary.
    pub fn new(
        event: LifecycleEvent,
        phase: Phase,
        source: &'a DbPath,
        destination: Option<&'a DbPath>,
    ) -> Self {
        match (phase, destination) {
            (Phase::After, Some(destination)) if event.has_destination() => Self {
                uri: destination,
                new_uri: Some(source),
            },
            (Phase::After, _) => Self {
                uri: source,
                new_uri: None,
            },
            (Phase::Before, _) => Self {
                uri: source,
                new_uri: destination,
            },
        }
    }

    fn collection(&self, event: LifecycleEvent) -> Value {
        if event.is_collection_event() {
            Value::from(self.uri)
        } else {
            Value::from(self.uri.parent().as_ref())
        }
    }
}

/// Declares the event-mode variables on a fresh context.
pub(crate) fn declare_event_variables(
    ctx: &mut EvalContext,
    binding: &TriggerBinding,
    event: LifecycleEvent,
    phase: Phase,
    args: HookArguments<'_>,
) {
    let prefix = binding.binding_prefix();
    let var = |name: &str| format!("{prefix}{name}");
    let phase_name = Value::String(phase.name().to_owned());
    let event_name = Value::String(event.name().to_owned());
    let collection = args.collection(event);

    ctx.declare_variable(var("type"), phase_name.clone());
    ctx.declare_variable(var("event"), event_name.clone());
    ctx.declare_variable(var("collection"), collection.clone());
    ctx.declare_variable(var("uri"), Value::from(args.uri));
    ctx.declare_variable(var("new-uri"), Value::from(args.new_uri));

    // Deprecated aliases
    ctx.declare_variable(var("eventType"), phase_name);
    ctx.declare_variable(var("triggerEvent"), event_name);
    ctx.declare_variable(var("collectionName"), collection);
    if !event.is_collection_event() {
        ctx.declare_variable(var("documentName"), Value::from(args.uri));
    }

    declare_user_parameters(ctx, binding);
}

/// Declares one text variable per user parameter.
pub(crate) fn declare_user_parameters(ctx: &mut EvalContext, binding: &TriggerBinding) {
    let prefix = binding.binding_prefix();
    for (name, value) in binding.parameters() {
        ctx.declare_variable(format!("{prefix}{name}"), Value::String(value.clone()));
    }
}

/// Builds the per-event function call for a hook run in function mode.
///
/// Before: `trigger:before-{event}(source, destination?)`.
/// After: `trigger:after-{event}(destination?, source)`.
pub(crate) fn function_call(
    event: LifecycleEvent,
    phase: Phase,
    source: &DbPath,
    destination: Option<&DbPath>,
) -> FunctionCall {
    let mut args = Vec::with_capacity(2);
    match (phase, destination) {
        (Phase::Before, Some(destination)) => {
            args.push(Value::from(source));
            args.push(Value::from(destination));
        }
        (Phase::After, Some(destination)) => {
            args.push(Value::from(destination));
            args.push(Value::from(source));
        }
        (_, None) => args.push(Value::from(source)),
    }
    FunctionCall {
        namespace: TRIGGER_NAMESPACE,
        local_name: format!("{}-{}", phase.function_prefix(), event.name()),
        args,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::HookSource;

    fn p(raw: &str) -> DbPath {
        DbPath::parse(raw).unwrap()
    }

    fn binding(prefix: &str) -> TriggerBinding {
        TriggerBinding::new(p("/db"), HookSource::Inline("()".into()))
            .with_events([LifecycleEvent::CreateDocument])
            .with_binding_prefix(prefix)
            .with_parameter("threshold", "10")
    }

    fn text(ctx: &EvalContext, name: &str) -> Option<String> {
        ctx.variable(name).and_then(Value::as_str).map(str::to_owned)
    }

    #[test]
    fn document_event_variables() {
        let b = binding("local:");
        let source = p("/db/a/x.xml");
        let mut ctx = EvalContext::new();
        let args = HookArguments::new(LifecycleEvent::CreateDocument, Phase::Before, &source, None);
        declare_event_variables(&mut ctx, &b, LifecycleEvent::CreateDocument, Phase::Before, args);

        assert_eq!(text(&ctx, "local:type").as_deref(), Some("prepare"));
        assert_eq!(text(&ctx, "local:event").as_deref(), Some("create-document"));
        assert_eq!(ctx.variable("local:collection"), Some(&Value::AnyUri(p("/db/a"))));
        assert_eq!(ctx.variable("local:uri"), Some(&Value::AnyUri(source.clone())));
        assert_eq!(ctx.variable("local:new-uri"), Some(&Value::Empty));
        assert_eq!(text(&ctx, "local:eventType").as_deref(), Some("prepare"));
        assert_eq!(text(&ctx, "local:triggerEvent").as_deref(), Some("create-document"));
        assert_eq!(ctx.variable("local:documentName"), Some(&Value::AnyUri(source)));
        assert_eq!(text(&ctx, "local:threshold").as_deref(), Some("10"));
    }

    #[test]
    fn collection_events_have_no_document_name() {
        let b = binding("p");
        let source = p("/db/a");
        let mut ctx = EvalContext::new();
        let args =
            HookArguments::new(LifecycleEvent::DeleteCollection, Phase::After, &source, None);
        declare_event_variables(&mut ctx, &b, LifecycleEvent::DeleteCollection, Phase::After, args);

        assert_eq!(text(&ctx, "p:type").as_deref(), Some("finish"));
        assert_eq!(ctx.variable("p:collection"), Some(&Value::AnyUri(source)));
        assert!(ctx.variable("p:documentName").is_none());
        assert!(ctx.variable("local:type").is_none());
    }

    #[test]
    fn after_copy_swaps_primary_resource() {
        let src = p("/db/a/x.xml");
        let dst = p("/db/b/y.xml");
        let before =
            HookArguments::new(LifecycleEvent::CopyDocument, Phase::Before, &src, Some(&dst));
        assert_eq!(before.uri, &src);
        assert_eq!(before.new_uri, Some(&dst));

        let after =
            HookArguments::new(LifecycleEvent::MoveDocument, Phase::After, &src, Some(&dst));
        assert_eq!(after.uri, &dst);
        assert_eq!(after.new_uri, Some(&src));
        assert_eq!(after.collection(LifecycleEvent::MoveDocument), Value::AnyUri(p("/db/b")));
    }

    #[test]
    fn function_call_argument_order() {
        let src = p("/db/a");
        let dst = p("/db/b");
        let before = function_call(LifecycleEvent::MoveCollection, Phase::Before, &src, Some(&dst));
        assert_eq!(before.local_name, "before-move-collection");
        assert_eq!(before.args, vec![Value::AnyUri(src.clone()), Value::AnyUri(dst.clone())]);

        let after = function_call(LifecycleEvent::MoveCollection, Phase::After, &src, Some(&dst));
        assert_eq!(after.local_name, "after-move-collection");
        assert_eq!(after.args, vec![Value::AnyUri(dst), Value::AnyUri(src.clone())]);

        let delete = function_call(LifecycleEvent::DeleteDocument, Phase::After, &src, None);
        assert_eq!(delete.arity(), 1);
        assert_eq!(delete.namespace, TRIGGER_NAMESPACE);
    }
}
