//! Tests for the operator contract as seen from evaluation

use futures::FutureExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

use super::helpers::{done, run, test_engine};
use crate::interpreter::{Annotations, Engine, Implementation, Input, Output, RunOptions};
use crate::EngineError;

#[tokio::test]
async fn test_traversing_operator_sees_evaluated_arguments() {
    let mut engine = Engine::default();
    engine.add_operator(
        "echo",
        Implementation::sync(|input, _, _| match input {
            Input::Evaluated(value) => Ok(Output::Value(value)),
            Input::Raw(_) => Ok(Output::Value(json!("raw"))),
        }),
        Annotations::new(),
    );

    let result = run(&engine, json!({"echo": [{"+": [1, 2]}, {"var": "a"}]}), json!({"a": "x"})).await;
    assert_eq!(done(result), json!([3, "x"]));
}

#[tokio::test]
async fn test_non_traversing_operator_gets_raw_tree() {
    let mut engine = Engine::default();
    engine.add_operator(
        "quote",
        Implementation::descriptor()
            .method(|input, _, _| Ok(Output::Value(json!({"raw": input.raw().is_some(), "tree": input.into_value()}))))
            .traverse(false),
        Annotations::new(),
    );

    let result = run(&engine, json!({"quote": [{"var": "a"}, {"unknown": 1}]}), json!({"a": 1})).await;
    assert_eq!(
        done(result),
        json!({"raw": true, "tree": [{"var": "a"}, {"unknown": 1}]})
    );
}

#[tokio::test]
async fn test_non_traversing_operator_evaluates_selectively() {
    let mut engine = Engine::default();
    // Evaluates only its second argument
    engine.add_operator(
        "second",
        Implementation::descriptor()
            .async_method(|input, scope, handle| {
                async move {
                    let node = input.raw().map(|raw| raw.arguments()[1].clone());
                    match node {
                        Some(node) => handle.evaluate(&node, &scope).await.map(Output::Evaluation),
                        None => Ok(Output::Value(Value::Null)),
                    }
                }
                .boxed()
            })
            .traverse(false),
        Annotations::new(),
    );

    let result = run(&engine, json!({"second": [{"nope": []}, {"var": "a"}]}), json!({"a": 5})).await;
    assert_eq!(done(result), json!(5));
}

#[tokio::test]
async fn test_async_method_is_preferred() {
    let mut engine = Engine::default();
    engine.add_operator(
        "which",
        Implementation::descriptor()
            .method(|_, _, _| Ok(Output::Value(json!("sync"))))
            .async_method(|_, _, _| async { Ok(Output::Value(json!("async"))) }.boxed()),
        Annotations::new(),
    );

    assert_eq!(done(run(&engine, json!({"which": []}), json!({})).await), json!("async"));
}

#[tokio::test]
async fn test_pending_values_resolve_in_order() {
    let mut engine = Engine::default();
    engine.add_operator(
        "later",
        Implementation::sync(|input, _, _| {
            let pending = input
                .into_args()
                .into_iter()
                .map(|value| {
                    async move {
                        let ms = value.as_u64().unwrap_or(0);
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        Ok::<_, EngineError>(value)
                    }
                    .boxed()
                })
                .collect();
            Ok(Output::Pending(pending))
        }),
        Annotations::new(),
    );

    assert_eq!(done(run(&engine, json!({"later": [30, 1, 10]}), json!({})).await), json!([30, 1, 10]));
}

#[tokio::test]
async fn test_sequence_elements_run_concurrently() {
    let mut engine = Engine::default();
    let barrier = Arc::new(Barrier::new(2));
    engine.add_operator(
        "rendezvous",
        Implementation::asynchronous(move |input, _, _| {
            let barrier = barrier.clone();
            async move {
                // Completes only if both elements are waiting at the same time
                barrier.wait().await;
                Ok(Output::Value(input.into_value()))
            }
            .boxed()
        }),
        Annotations::new(),
    );

    let logic = json!([{"rendezvous": "a"}, {"rendezvous": "b"}]);
    let result = tokio::time::timeout(Duration::from_secs(5), run(&engine, logic, json!({})))
        .await
        .expect("sequence elements were evaluated one after another");
    assert_eq!(done(result), json!(["a", "b"]));
}

#[tokio::test]
async fn test_operator_failures_keep_their_cause() {
    let (engine, _) = test_engine(false);
    let err = engine
        .run(&json!({"+": [1, {"fail": []}]}), json!({}), RunOptions::default())
        .await
        .unwrap_err();

    match err {
        EngineError::OperatorExecution { operator, source } => {
            assert_eq!(operator, "fail");
            assert_eq!(source.to_string(), "boom");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_registries_are_per_engine() {
    let base = Engine::default();
    let mut extended = base.clone();
    extended.add_operator("one", Implementation::sync(|_, _, _| Ok(json!(1).into())), Annotations::new());

    assert_eq!(done(run(&extended, json!({"one": []}), json!({})).await), json!(1));
    let err = base
        .run(&json!({"one": []}), json!({}), RunOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownOperator(_)));
}

#[tokio::test]
async fn test_invocation_state_is_per_run() {
    let mut engine = Engine::default();
    engine.add_operator(
        "count",
        Implementation::sync(|_, _, handle| {
            let next = handle.state().get("n").and_then(|n| n.as_u64()).unwrap_or(0) + 1;
            handle.state().insert("n", json!(next));
            Ok(json!(next).into())
        }),
        Annotations::new().use_context(),
    );

    let logic = json!({"+": [{"count": []}, {"count": []}, {"count": []}]});
    assert_eq!(done(run(&engine, logic.clone(), json!({})).await), json!(6));
    assert_eq!(done(run(&engine, logic, json!({})).await), json!(6));
}
