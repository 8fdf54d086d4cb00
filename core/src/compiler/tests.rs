//! Tests for compilation, classification and pooled programs

use futures::FutureExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::config::EngineOptions;
use crate::interpreter::{Annotations, Engine, Implementation, Output, RunOptions};

fn engine() -> Engine {
    let mut engine = Engine::default();
    engine.add_operator(
        "fetch",
        Implementation::asynchronous(|input, _, _| async move { Ok(Output::Value(input.into_value())) }.boxed()),
        Annotations::new(),
    );
    engine.add_operator(
        "tick",
        Implementation::sync(|_, _, handle| {
            let n = handle.state().get("ticks").and_then(|n| n.as_u64()).unwrap_or(0) + 1;
            handle.state().insert("ticks", json!(n));
            Ok(json!(n).into())
        }),
        Annotations::new().use_context(),
    );
    engine
}

fn done(evaluation: Evaluation) -> Value {
    evaluation.into_value().expect("unexpected suspension")
}

#[test]
fn test_classification() {
    let engine = engine();
    let build = |logic: Value| engine.build(&logic, BuildOptions::default()).unwrap();

    assert_eq!(build(json!({"+": [1, {"var": "a"}]})).kind(), ProgramKind::Sync);
    assert_eq!(build(json!({"map": [{"var": "a"}, {"*": [{"var": ""}, 2]}]})).kind(), ProgramKind::Sync);
    assert_eq!(build(json!({"+": [1, {"fetch": 2}]})).kind(), ProgramKind::Async);

    // Reachable through the raw arguments of a non-traversing operator
    assert_eq!(build(json!({"if": [true, {"fetch": 1}, 0]})).kind(), ProgramKind::Async);
}

#[test]
fn test_unknown_operator_fails_at_build() {
    let err = engine()
        .build(&json!({"+": [1, {"nope": []}]}), BuildOptions::default())
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownOperator(name) if name == "nope"));
}

#[test]
fn test_unknown_operator_in_evaluated_raw_arguments_fails_at_build() {
    let engine = engine();
    let cases = [
        json!({"if": [true, {"nope": 1}, 0]}),
        json!({"and": [true, {"nope": [1]}]}),
        json!({"map": [[1, 2], {"nope": [{"var": ""}]}]}),
        json!({"reduce": [[1, 2], {"+": [{"var": "current"}, {"nope": []}]}, 0]}),
    ];

    for logic in cases {
        let err = engine.build(&logic, BuildOptions::default()).unwrap_err();
        assert!(matches!(err, EngineError::UnknownOperator(ref name) if name == "nope"), "logic: {logic}");
    }
}

#[test]
fn test_preserve_inside_raw_arguments_stays_data() {
    let program = engine()
        .build(&json!({"if": [true, {"preserve": {"nope": 1}}, 0]}), BuildOptions::default())
        .unwrap();
    assert_eq!(done(program.call_sync(json!({})).unwrap()), json!({"nope": 1}));
}

#[test]
fn test_unknown_names_in_raw_arguments_are_data() {
    let program = engine()
        .build(&json!({"preserve": {"nope": [1]}}), BuildOptions::default())
        .unwrap();
    assert_eq!(done(program.call_sync(json!({})).unwrap()), json!({"nope": [1]}));
}

#[test]
fn test_pooling_rules() {
    let engine = engine();
    let build = |logic: Value, options: BuildOptions| engine.build(&logic, options).unwrap();

    // async + stateful
    let pooled = build(json!([{"fetch": 1}, {"tick": []}]), BuildOptions::default());
    assert!(pooled.is_pooled());
    assert!(pooled.program().is_stateful());

    // async but pure
    assert!(!build(json!({"fetch": 1}), BuildOptions::default()).is_pooled());

    // stateful but sync
    let sync_stateful = build(json!({"tick": []}), BuildOptions::default());
    assert_eq!(sync_stateful.kind(), ProgramKind::Sync);
    assert!(!sync_stateful.is_pooled());

    // nested programs are never pooled
    let nested = BuildOptions {
        top: false,
        ..BuildOptions::default()
    };
    assert!(!build(json!([{"fetch": 1}, {"tick": []}]), nested).is_pooled());
}

#[test]
fn test_constant_calls_are_inlined() {
    let program = engine().build(&json!({"+": [1, {"*": [2, 3]}]}), BuildOptions::default()).unwrap();
    assert!(matches!(program.program().root(), CompiledNode::Literal(value) if *value == json!(7)));

    let program = engine().build(&json!({"+": [1, {"var": "a"}]}), BuildOptions::default()).unwrap();
    assert!(matches!(program.program().root(), CompiledNode::Call { .. }));
}

#[test]
fn test_inline_disabled() {
    let engine = Engine::with_builtins(EngineOptions::default().with_disable_inline(true));
    let program = engine.build(&json!({"+": [1, 2]}), BuildOptions::default()).unwrap();
    assert!(matches!(program.program().root(), CompiledNode::Call { .. }));
    assert_eq!(done(program.call_sync(json!({})).unwrap()), json!(3));
}

#[test]
fn test_inlined_operator_runs_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut engine = Engine::default();
    let counter = calls.clone();
    engine.add_operator(
        "square",
        Implementation::sync(move |input, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            let n = input.into_args().first().and_then(Value::as_i64).unwrap_or(0);
            Ok(json!(n * n).into())
        }),
        Annotations::new().deterministic(),
    );

    let program = engine.build(&json!({"square": 4}), BuildOptions::default()).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for _ in 0..3 {
        assert_eq!(done(program.call_sync(json!({})).unwrap()), json!(16));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_failing_constant_call_fails_at_run() {
    let program = engine().build(&json!({"*": []}), BuildOptions::default()).unwrap();
    assert!(matches!(program.program().root(), CompiledNode::Call { .. }));

    let err = program.call_sync(json!({})).unwrap_err();
    assert!(matches!(err, EngineError::InvalidArguments { .. }));
}

#[test]
fn test_nesting_limit() {
    let options = EngineOptions {
        max_depth: 8,
        ..EngineOptions::default()
    };
    let engine = Engine::with_builtins(options);

    let mut logic = json!(true);
    for _ in 0..10 {
        logic = json!({"!": logic});
    }
    let err = engine.build(&logic, BuildOptions::default()).unwrap_err();
    assert!(matches!(err, EngineError::NestingTooDeep { limit: 8 }));
}

#[test]
fn test_deep_logic_fails_before_compiling() {
    let mut logic = json!(true);
    for _ in 0..1000 {
        logic = json!({"!": logic});
    }
    let err = engine().build(&logic, BuildOptions::default()).unwrap_err();
    assert!(matches!(err, EngineError::NestingTooDeep { limit: 256 }));
}

#[test]
fn test_fingerprint() {
    let a = fingerprint(&json!({"+": [1, 2]}));
    assert_eq!(a.len(), 64);
    assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(a, fingerprint(&json!({"+": [1, 2]})));
    assert_ne!(a, fingerprint(&json!({"+": [2, 1]})));
}

#[test]
fn test_call_sync_rejects_async_programs() {
    let program = engine().build(&json!({"fetch": 1}), BuildOptions::default()).unwrap();
    assert!(matches!(program.call_sync(json!({})), Err(EngineError::NotSynchronous)));
}

#[tokio::test]
async fn test_compiled_matches_interpreted() {
    let engine = engine();
    let data = json!({"a": [1, 2, 3, 4], "t": 12, "adder": 10, "name": "x"});
    let cases = [
        json!({"+": [{"var": "t"}, {"*": [2, 3]}]}),
        json!({"if": [{"<": [{"var": "t"}, 10]}, "cold", {"<": [{"var": "t"}, 20]}, "mild", "hot"]}),
        json!({"filter": [{"var": "a"}, {"%": [{"var": ""}, 2]}]}),
        json!({"reduce": [{"var": "a"}, {"+": [{"var": "accumulator"}, {"var": "current"}, {"var": "../../adder"}]}]}),
        json!({"cat": ["hi ", {"fetch": {"var": "name"}}]}),
        json!([{"missing": ["a", "zz"]}, {"preserve": {"var": "a"}}, {"in": [3, {"var": "a"}]}]),
    ];

    for logic in cases {
        let interpreted = engine.run(&logic, data.clone(), RunOptions::default()).await.unwrap();
        let compiled = engine
            .build(&logic, BuildOptions::default())
            .unwrap()
            .call(data.clone())
            .await
            .unwrap();
        assert_eq!(compiled, interpreted, "logic: {logic}");
    }
}

#[tokio::test]
async fn test_build_above() {
    let options = BuildOptions {
        above: vec![json!({"limit": 5})],
        ..BuildOptions::default()
    };
    let program = engine()
        .build(&json!({"<": [{"var": "n"}, {"var": "../limit"}]}), options)
        .unwrap();
    assert_eq!(done(program.call(json!({"n": 3})).await.unwrap()), json!(true));
    assert_eq!(done(program.call(json!({"n": 8})).await.unwrap()), json!(false));
}

/* ===================== Pooled Programs ===================== */

/// Engine with `stash`: writes its input into the invocation state, waits,
/// then returns what the state holds. Tracks how many run at once.
fn stash_engine() -> (Engine, Arc<AtomicUsize>) {
    let peak = Arc::new(AtomicUsize::new(0));
    let active = Arc::new(AtomicUsize::new(0));
    let mut engine = Engine::default();

    let tracked = peak.clone();
    engine.add_operator(
        "stash",
        Implementation::asynchronous(move |input, _, handle| {
            let peak = tracked.clone();
            let active = active.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);

                handle.state().insert("stash", input.into_value());
                tokio::time::sleep(Duration::from_millis(10)).await;
                let stashed = handle.state().get("stash").unwrap_or(Value::Null);

                active.fetch_sub(1, Ordering::SeqCst);
                Ok(Output::Value(stashed))
            }
            .boxed()
        }),
        Annotations::new().use_context(),
    );

    (engine, peak)
}

#[tokio::test]
async fn test_pooled_invocations_do_not_share_state() {
    let (engine, peak) = stash_engine();
    let options = BuildOptions {
        max: Some(2),
        ..BuildOptions::default()
    };
    let program = Arc::new(engine.build(&json!({"stash": {"var": "id"}}), options).unwrap());
    assert!(program.is_pooled());

    let calls = (0..6).map(|id| {
        let program = program.clone();
        tokio::spawn(async move { program.call(json!({"id": id})).await })
    });
    let results = futures::future::join_all(calls).await;

    for (id, result) in results.into_iter().enumerate() {
        let evaluation = result.unwrap().unwrap();
        assert_eq!(done(evaluation), json!(id));
    }

    assert!(peak.load(Ordering::SeqCst) <= 2, "peak {}", peak.load(Ordering::SeqCst));
    let pool = program.pool().unwrap();
    assert_eq!(pool.checked_out(), 0);
    assert!(pool.idle() <= 2);
}

#[tokio::test]
async fn test_pooled_release_on_failure() {
    let (mut engine, _) = stash_engine();
    engine.add_operator(
        "fail",
        Implementation::sync(|_, _, _| Err(anyhow::anyhow!("boom").into())),
        Annotations::new(),
    );
    let options = BuildOptions {
        max: Some(1),
        ..BuildOptions::default()
    };
    let program = engine.build(&json!([{"stash": 1}, {"fail": []}]), options).unwrap();
    assert!(program.is_pooled());

    assert!(program.call(json!({})).await.is_err());
    assert!(program.call(json!({})).await.is_err());
    assert_eq!(program.pool().unwrap().checked_out(), 0);
}
