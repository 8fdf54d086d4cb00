//! Array iteration
//!
//! `{"map": [source, body]}` evaluates `source` in the current scope, then
//! `body` once per item. Each item runs in its own scope whose parent holds the
//! whole source array, whose parent in turn is the current scope:
//!
//! ```text
//! item scope          {"var": ""}        the item
//!   array scope       {"var": "../"}     the source array
//!     current scope   {"var": "../../x"} data around the iteration
//! ```
//!
//! `reduce` items see `{"accumulator": .., "current": ..}` instead.
//!
//! A suspension inside the body cannot be resumed per item, so it collapses
//! into one suspension point standing for the whole operator.

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use serde_json::{json, Value};
use std::ops::ControlFlow;

use crate::error::Result;
use crate::interpreter::{
    Annotations, Evaluation, Handle, Implementation, Input, LogicNode, OperatorRegistry, Output, Partial, Scope, Suspension,
};

use super::logic::suspended_at;
use super::truthy;

pub fn register(registry: &mut OperatorRegistry) {
    let lazy = Annotations::new().sync();
    registry.register("map", Implementation::descriptor().async_method(map).traverse(false), lazy);
    registry.register("filter", Implementation::descriptor().async_method(filter).traverse(false), lazy);
    registry.register("reduce", Implementation::descriptor().async_method(reduce).traverse(false), lazy);
    registry.register(
        "some",
        Implementation::descriptor().async_method(|input, scope, handle| any_all("some", true, input, scope, handle)).traverse(false),
        lazy,
    );
    registry.register(
        "every",
        Implementation::descriptor().async_method(|input, scope, handle| any_all("every", false, input, scope, handle)).traverse(false),
        lazy,
    );
}

/// Evaluate argument 0 to the item list. Non-arrays iterate as empty.
async fn source(
    operator: &str,
    input: &Input,
    args: &[LogicNode],
    scope: &Scope,
    handle: &Handle,
) -> Result<ControlFlow<Evaluation, Vec<Value>>> {
    let Some(node) = args.first() else {
        return Ok(ControlFlow::Continue(Vec::new()));
    };

    match handle.evaluate(node, scope).await? {
        Evaluation::Done(Value::Array(items)) => Ok(ControlFlow::Continue(items)),
        Evaluation::Done(_) => Ok(ControlFlow::Continue(Vec::new())),
        Evaluation::Suspended(suspension) => Ok(ControlFlow::Break(suspended_at(operator, input, args, 0, suspension))),
    }
}

fn collapsed(operator: &str, input: Input, suspension: Suspension) -> Output {
    Output::Evaluation(Evaluation::Suspended(suspension.collapse(operator, input.into_value())))
}

fn body(args: &[LogicNode]) -> LogicNode {
    args.get(1).cloned().unwrap_or(LogicNode::Literal(Value::Null))
}

fn map(input: Input, scope: Scope, handle: Handle) -> BoxFuture<'static, Result<Output>> {
    async move {
        let args = super::raw_arguments(&input);
        let items = match source("map", &input, &args, &scope, &handle).await? {
            ControlFlow::Continue(items) => items,
            ControlFlow::Break(suspended) => return Ok(Output::Evaluation(suspended)),
        };

        let body = body(&args);
        let array_scope = scope.child(Value::Array(items.clone()));
        let results = try_join_all(
            items
                .into_iter()
                .map(|item| handle.evaluate(&body, &array_scope.child(item))),
        )
        .await?;

        match Evaluation::join(results) {
            Evaluation::Done(mapped) => Ok(Output::Value(mapped)),
            Evaluation::Suspended(suspension) => Ok(collapsed("map", input, suspension)),
        }
    }
    .boxed()
}

fn filter(input: Input, scope: Scope, handle: Handle) -> BoxFuture<'static, Result<Output>> {
    async move {
        let args = super::raw_arguments(&input);
        let items = match source("filter", &input, &args, &scope, &handle).await? {
            ControlFlow::Continue(items) => items,
            ControlFlow::Break(suspended) => return Ok(Output::Evaluation(suspended)),
        };

        let body = body(&args);
        let array_scope = scope.child(Value::Array(items.clone()));
        let verdicts = try_join_all(
            items
                .iter()
                .map(|item| handle.evaluate(&body, &array_scope.child(item.clone()))),
        )
        .await?;

        let mut kept = Vec::new();
        for (item, verdict) in items.into_iter().zip(verdicts) {
            match verdict {
                Evaluation::Done(value) if truthy(&value) => kept.push(item),
                Evaluation::Done(_) => {}
                Evaluation::Suspended(suspension) => return Ok(collapsed("filter", input, suspension)),
            }
        }
        Ok(Output::Value(Value::Array(kept)))
    }
    .boxed()
}

/// `[source, body, initial?]`, folding left to right
fn reduce(input: Input, scope: Scope, handle: Handle) -> BoxFuture<'static, Result<Output>> {
    async move {
        let args = super::raw_arguments(&input);
        let items = match source("reduce", &input, &args, &scope, &handle).await? {
            ControlFlow::Continue(items) => items,
            ControlFlow::Break(suspended) => return Ok(Output::Evaluation(suspended)),
        };

        let initial = match args.get(2) {
            None => None,
            Some(node) => match handle.evaluate(node, &scope).await? {
                Evaluation::Done(value) => Some(value),
                Evaluation::Suspended(suspension) => {
                    let args = vec![
                        Partial::Done {
                            value: Value::Array(items),
                        },
                        Partial::pending(&body(&args)),
                        Evaluation::Suspended(suspension).into(),
                    ];
                    let suspended = Suspension::call("reduce", input.into_value(), args);
                    return Ok(Output::Evaluation(Evaluation::Suspended(suspended)));
                }
            },
        };

        let mut remaining = items.clone().into_iter();
        let Some(mut accumulator) = initial.or_else(|| remaining.next()) else {
            return Ok(Output::Value(Value::Null));
        };

        let body = body(&args);
        let array_scope = scope.child(Value::Array(items));
        for current in remaining {
            let item_scope = array_scope.child(json!({
                "accumulator": accumulator,
                "current": current,
            }));
            accumulator = match handle.evaluate(&body, &item_scope).await? {
                Evaluation::Done(value) => value,
                Evaluation::Suspended(suspension) => return Ok(collapsed("reduce", input, suspension)),
            };
        }

        Ok(Output::Value(accumulator))
    }
    .boxed()
}

/// `some` stops at the first truthy item, `every` at the first falsy one
fn any_all(operator: &'static str, stop_when: bool, input: Input, scope: Scope, handle: Handle) -> BoxFuture<'static, Result<Output>> {
    async move {
        let args = super::raw_arguments(&input);
        let items = match source(operator, &input, &args, &scope, &handle).await? {
            ControlFlow::Continue(items) => items,
            ControlFlow::Break(suspended) => return Ok(Output::Evaluation(suspended)),
        };

        // `every` over nothing is vacuously true
        if items.is_empty() {
            return Ok(Output::Value((!stop_when).into()));
        }

        let body = body(&args);
        let array_scope = scope.child(Value::Array(items.clone()));
        for item in items {
            match handle.evaluate(&body, &array_scope.child(item)).await? {
                Evaluation::Done(value) if truthy(&value) == stop_when => return Ok(Output::Value(stop_when.into())),
                Evaluation::Done(_) => {}
                Evaluation::Suspended(suspension) => return Ok(collapsed(operator, input, suspension)),
            }
        }

        Ok(Output::Value((!stop_when).into()))
    }
    .boxed()
}
