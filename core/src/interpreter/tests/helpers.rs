//! Test helpers for interpreter tests
//!
//! Engines preloaded with the built-ins plus a few test operators:
//!
//! - `ask`: yields `{"question": <input>}` and counts its invocations
//! - `effect`: returns its input and counts its invocations
//! - `fetch`: async; `[value, ms]` returns `{"fetched": value}` after `ms`
//! - `fail`: always fails with an `anyhow` error

use futures::FutureExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineOptions;
use crate::interpreter::{Annotations, Engine, Evaluation, Implementation, Output, RunOptions};

#[derive(Clone, Default)]
pub struct Counters {
    pub ask: Arc<AtomicUsize>,
    pub effect: Arc<AtomicUsize>,
}

impl Counters {
    pub fn asked(&self) -> usize {
        self.ask.load(Ordering::SeqCst)
    }

    pub fn effects(&self) -> usize {
        self.effect.load(Ordering::SeqCst)
    }
}

/// Engine with test operators; `yield_supported` toggles suspension tracking
pub fn test_engine(yield_supported: bool) -> (Engine, Counters) {
    let counters = Counters::default();
    let mut engine = Engine::with_builtins(EngineOptions::default().with_yield_supported(yield_supported));

    let asked = counters.ask.clone();
    engine.add_operator(
        "ask",
        Implementation::sync(move |input, _, _| {
            asked.fetch_add(1, Ordering::SeqCst);
            Ok(Output::Yield(json!({"question": input.into_value()})))
        }),
        Annotations::new().yields(),
    );

    let effects = counters.effect.clone();
    engine.add_operator(
        "effect",
        Implementation::sync(move |input, _, _| {
            effects.fetch_add(1, Ordering::SeqCst);
            Ok(Output::Value(input.into_value()))
        }),
        Annotations::new(),
    );

    engine.add_operator(
        "fetch",
        Implementation::asynchronous(|input, _, _| {
            async move {
                let args = input.into_args();
                let value = args.first().cloned().unwrap_or(Value::Null);
                let ms = args.get(1).and_then(Value::as_u64).unwrap_or(1);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(Output::Value(json!({ "fetched": value })))
            }
            .boxed()
        }),
        Annotations::new(),
    );

    engine.add_operator(
        "fail",
        Implementation::sync(|_, _, _| Err(anyhow::anyhow!("boom").into())),
        Annotations::new(),
    );

    (engine, counters)
}

pub async fn run(engine: &Engine, logic: Value, data: Value) -> Evaluation {
    engine
        .run(&logic, data, RunOptions::default())
        .await
        .expect("evaluation failed")
}

/// Unwrap a completed evaluation
pub fn done(evaluation: Evaluation) -> Value {
    match evaluation {
        Evaluation::Done(value) => value,
        Evaluation::Suspended(suspension) => panic!("unexpected suspension: {suspension:?}"),
    }
}
