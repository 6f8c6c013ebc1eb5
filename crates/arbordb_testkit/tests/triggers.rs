//! Trigger dispatch through the full mutation pipeline.

use arbordb_core::query::{EvalError, Value};
use arbordb_core::trigger::TRIGGER_NAMESPACE;
use arbordb_core::TriggerError;
use arbordb_testkit::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn create_doc(raw: &str) -> Mutation {
    Mutation::CreateDocument {
        path: path(raw),
        content: b"<doc/>".to_vec(),
    }
}

#[test]
fn hooks_see_prepare_then_finish() {
    init_test_tracing();
    let db = TestDb::new();
    db.evaluator.register_noop("audit");
    db.triggers("/db", [TriggerSpec::query("audit").events("create-document")]);
    db.mkcol("/db/a");

    db.system(create_doc("/db/a/x.xml")).unwrap();

    let runs = db.evaluator.executions_of("audit");
    assert_eq!(runs.len(), 2);
    let (before, after) = (&runs[0], &runs[1]);

    assert_eq!(before.text("local:type"), "prepare");
    assert_eq!(before.text("local:event"), "create-document");
    assert_eq!(before.text("local:uri"), "/db/a/x.xml");
    assert_eq!(before.text("local:collection"), "/db/a");
    assert_eq!(before.variable("local:new-uri"), Some(None));
    assert_eq!(before.text("local:documentName"), "/db/a/x.xml");

    assert_eq!(after.text("local:type"), "finish");
    assert_eq!(after.text("local:uri"), "/db/a/x.xml");
    assert_eq!(before.transaction, after.transaction);
    assert!(before.trigger_running && after.trigger_running);
    assert!(db.exists("/db/a/x.xml"));
}

#[test]
fn binding_prefix_and_parameters_are_declared() {
    let db = TestDb::new();
    db.evaluator.register_noop("audit");
    db.triggers(
        "/db",
        [TriggerSpec::query("audit")
            .events("delete-collection")
            .binding_prefix("t")
            .param("threshold", "10")],
    );
    db.mkcol("/db/a/b");

    db.system(Mutation::DeleteCollection { path: path("/db/a/b") })
        .unwrap();

    let runs = db.evaluator.executions_of("audit");
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].text("t:collection"), "/db/a/b");
    assert_eq!(runs[0].text("t:threshold"), "10");
    assert!(runs[0].variable("t:documentName").is_none());
    assert!(runs[0].variable("local:type").is_none());
}

#[test]
fn move_swaps_primary_resource_after_the_fact() {
    let db = TestDb::new();
    db.evaluator.register_noop("audit");
    db.triggers("/db", [TriggerSpec::query("audit").events("move-document")]);
    db.put("/db/a/x.xml", "<doc/>");
    db.mkcol("/db/b");

    db.system(Mutation::MoveDocument {
        source: path("/db/a/x.xml"),
        destination: path("/db/b/y.xml"),
    })
    .unwrap();

    let runs = db.evaluator.executions_of("audit");
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].text("local:uri"), "/db/a/x.xml");
    assert_eq!(runs[0].text("local:new-uri"), "/db/b/y.xml");
    assert_eq!(runs[1].text("local:uri"), "/db/b/y.xml");
    assert_eq!(runs[1].text("local:new-uri"), "/db/a/x.xml");
    assert_eq!(runs[1].text("local:collection"), "/db/b");
}

#[test]
fn hook_mutations_do_not_fire_triggers() {
    let db = TestDb::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let hook_counter = Arc::clone(&counter);
    db.evaluator.register("audit", move |session, _, _| {
        let n = hook_counter.fetch_add(1, Ordering::SeqCst);
        session
            .perform(Mutation::CreateDocument {
                path: script_path(&format!("/db/log/entry-{n}.xml"))?,
                content: Vec::new(),
            })
            .map_err(|e| EvalError::eval(e.to_string()))
    });
    db.triggers("/db", [TriggerSpec::query("audit").events("create-document")]);
    db.mkcol("/db/a");
    db.mkcol("/db/log");

    db.system(create_doc("/db/a/x.xml")).unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(db.evaluator.executions().len(), 2);
    assert!(db.exists("/db/log/entry-0.xml"));
    assert!(db.exists("/db/log/entry-1.xml"));
}

#[test]
fn before_failure_vetoes_the_mutation() {
    let db = TestDb::new();
    db.evaluator.register_failing("guard", "quota exceeded");
    db.triggers("/db", [TriggerSpec::query("guard").events("create-collection")]);
    let applied = db.store.mutation_count();

    let mut ctx = ExecutionContext::new();
    let err = db
        .run(&mut ctx, Mutation::CreateCollection { path: path("/db/a") })
        .unwrap_err();

    match err {
        MutationError::Trigger(TriggerError::Eval { phase, event, .. }) => {
            assert_eq!(phase, Phase::Before);
            assert_eq!(event, LifecycleEvent::CreateCollection);
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(db.store.mutation_count(), applied);
    assert!(!db.exists("/db/a"));
    assert!(!ctx.is_trigger_running());
    assert_eq!(db.evaluator.executions().len(), 1);
}

#[test]
fn compile_failure_vetoes_with_compile_error() {
    let db = TestDb::new();
    db.triggers("/db", [TriggerSpec::url("/db/hooks/missing.xq")]);

    let err = db
        .system(Mutation::CreateCollection { path: path("/db/a") })
        .unwrap_err();
    assert!(matches!(
        err,
        MutationError::Trigger(TriggerError::Compile { .. })
    ));
}

#[test]
fn invalid_configuration_vetoes_mutations_below_it() {
    let db = TestDb::new();
    db.configure_json(
        "/db/a",
        &serde_json::json!({ "triggers": [ { "parameters": [ { "name": "event", "value": "explode" }, { "name": "query", "value": "x" } ] } ] }),
    );
    db.mkcol("/db/a");

    let err = db.system(create_doc("/db/a/x.xml")).unwrap_err();
    assert!(matches!(err, MutationError::Trigger(TriggerError::Config(_))));

    db.system(create_doc("/db/y.xml")).unwrap();
}

#[test]
fn after_failures_are_reported_not_returned() {
    let db = TestDb::new();
    db.evaluator.register("fragile", |_, variables, _| {
        match variables.variable("local:type").and_then(Value::as_str) {
            Some("finish") => Err(EvalError::eval("index update failed")),
            _ => Ok(()),
        }
    });
    db.evaluator.register_noop("audit");
    db.triggers(
        "/db",
        [
            TriggerSpec::query("fragile").events("create-document"),
            TriggerSpec::query("audit").events("create-document"),
        ],
    );
    db.mkcol("/db/a");
    let rx = db.diagnostics().subscribe();

    db.system(create_doc("/db/a/x.xml")).unwrap();

    assert!(db.exists("/db/a/x.xml"));
    let failure = rx.try_recv().unwrap();
    assert_eq!(failure.event, LifecycleEvent::CreateDocument);
    assert_eq!(failure.path, path("/db/a/x.xml"));
    assert_eq!(failure.declared_at, path("/db"));
    assert!(failure.message.contains("finish"));
    assert!(rx.try_recv().is_err());

    // The binding after the failing one still ran in the After phase.
    assert_eq!(db.evaluator.executions_of("audit").len(), 2);
}

#[test]
fn store_failure_releases_the_context() {
    let db = TestDb::new();
    db.evaluator.register_noop("audit");
    db.triggers("/db", [TriggerSpec::query("audit").events("create-collection")]);
    db.mkcol("/db/a");

    let mut ctx = ExecutionContext::new();
    let err = db
        .run(&mut ctx, Mutation::CreateCollection { path: path("/db/a") })
        .unwrap_err();
    assert!(matches!(err, MutationError::Storage(_)));
    assert!(!ctx.is_trigger_running());
    assert_eq!(db.evaluator.executions().len(), 1);

    db.run(&mut ctx, Mutation::CreateCollection { path: path("/db/b") })
        .unwrap();
    assert_eq!(db.evaluator.executions().len(), 3);
}

#[test]
fn catch_all_hooks_call_per_event_functions() {
    let db = TestDb::new();
    db.evaluator.register_noop("lib");
    db.evaluator.declare_functions(
        "lib",
        &[("before-copy-document", 2), ("after-copy-document", 2)],
    );
    db.triggers("/db", [TriggerSpec::query("lib").param("mode", "strict")]);
    db.put("/db/a/x.xml", "<doc/>");
    db.mkcol("/db/b");

    db.system(create_doc("/db/a/z.xml")).unwrap();
    assert!(db.evaluator.executions().is_empty());

    db.system(Mutation::CopyDocument {
        source: path("/db/a/x.xml"),
        destination: path("/db/b/x.xml"),
    })
    .unwrap();

    let runs = db.evaluator.executions_of("lib");
    assert_eq!(runs.len(), 2);
    let before = runs[0].call.as_ref().unwrap();
    assert_eq!(before.namespace, TRIGGER_NAMESPACE);
    assert_eq!(before.local_name, "before-copy-document");
    assert_eq!(
        runs[0].call_args(),
        vec![Some("/db/a/x.xml".to_owned()), Some("/db/b/x.xml".to_owned())]
    );
    assert_eq!(runs[1].call.as_ref().unwrap().local_name, "after-copy-document");
    assert_eq!(
        runs[1].call_args(),
        vec![Some("/db/b/x.xml".to_owned()), Some("/db/a/x.xml".to_owned())]
    );
    assert_eq!(runs[0].text("local:mode"), "strict");
    assert!(runs[0].variable("local:uri").is_none());
}

#[test]
fn unlisted_events_call_declared_per_event_functions() {
    let db = TestDb::new();
    db.evaluator.register_noop("audit");
    db.evaluator
        .declare_functions("audit", &[("before-update-document", 1)]);
    db.triggers("/db", [TriggerSpec::query("audit").events("create-document")]);
    db.put("/db/a/x.xml", "<v1/>");

    db.system(Mutation::UpdateDocument {
        path: path("/db/a/x.xml"),
        content: b"<v2/>".to_vec(),
    })
    .unwrap();

    let runs = db.evaluator.executions_of("audit");
    assert_eq!(runs.len(), 1);
    let call = runs[0].call.as_ref().unwrap();
    assert_eq!(call.namespace, TRIGGER_NAMESPACE);
    assert_eq!(call.local_name, "before-update-document");
    assert_eq!(runs[0].call_args(), vec![Some("/db/a/x.xml".to_owned())]);
    assert!(runs[0].variable("local:type").is_none());

    // The listed event still runs the program body.
    db.evaluator.clear();
    db.system(create_doc("/db/a/y.xml")).unwrap();
    let runs = db.evaluator.executions_of("audit");
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|run| run.call.is_none()));
    assert_eq!(runs[0].text("local:type"), "prepare");
}

#[test]
fn hooks_of_every_ancestor_run_root_first() {
    let db = TestDb::new();
    db.evaluator.register_noop("outer");
    db.evaluator.register_noop("inner");
    db.triggers("/db/a", [TriggerSpec::query("inner").events("update-document")]);
    db.triggers("/db", [TriggerSpec::query("outer").events("update-document")]);
    db.put("/db/a/b/x.xml", "<v1/>");

    db.system(Mutation::UpdateDocument {
        path: path("/db/a/b/x.xml"),
        content: b"<v2/>".to_vec(),
    })
    .unwrap();

    let order: Vec<_> = db
        .evaluator
        .executions()
        .into_iter()
        .map(|e| e.program)
        .collect();
    assert_eq!(order, ["outer", "inner", "outer", "inner"]);
    assert_eq!(db.store.document(&path("/db/a/b/x.xml")).unwrap(), b"<v2/>");
}

#[test]
fn hook_changes_roll_back_with_a_vetoed_mutation() {
    let db = TestDb::new();
    db.evaluator
        .register_mutating("side", Mutation::CreateCollection { path: path("/db/side") });
    db.evaluator.register_failing("guard", "rejected");
    db.triggers(
        "/db",
        [
            TriggerSpec::query("side").events("create-collection"),
            TriggerSpec::query("guard").events("create-collection"),
        ],
    );

    let err = db
        .system(Mutation::CreateCollection { path: path("/db/a") })
        .unwrap_err();
    assert!(matches!(err, MutationError::Trigger(_)));
    assert_eq!(db.evaluator.compilations(), 2);
    assert!(!db.exists("/db/side"));
    assert!(!db.exists("/db/a"));

    db.evaluator.clear();
    db.triggers("/db", [TriggerSpec::query("side").events("create-collection")]);
    db.system(Mutation::CreateCollection { path: path("/db/a") })
        .unwrap();
    assert!(db.exists("/db/side"));
    // The After run tries to create /db/side again and is only reported.
    assert_eq!(db.evaluator.executions().len(), 2);
    assert_eq!(db.diagnostics().latest_sequence(), 1);
}
