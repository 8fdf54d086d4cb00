//! Boolean logic and conditionals
//!
//! `and`, `or` and `if` take their arguments raw and evaluate only what they
//! need. If the argument being evaluated suspends, the suspension records the
//! arguments not reached yet so resuming continues the same decision.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::error::Result;
use crate::interpreter::{
    Annotations, Evaluation, Handle, Implementation, Input, LogicNode, OperatorRegistry, Output, Partial, Scope, Suspension,
};

use super::{arg, raw_arguments, to_number, truthy};

pub fn register(registry: &mut OperatorRegistry) {
    let pure = Annotations::new().deterministic();
    registry.register("!", Implementation::sync(not), pure);
    registry.register("!!", Implementation::sync(not_not), pure);
    registry.register("xor", Implementation::sync(xor), pure);

    // Async bodies that only wait on their own arguments
    let lazy = Annotations::new().sync();
    registry.register(
        "and",
        Implementation::descriptor().async_method(|input, scope, handle| short_circuit("and", false, input, scope, handle)).traverse(false),
        lazy,
    );
    registry.register(
        "or",
        Implementation::descriptor().async_method(|input, scope, handle| short_circuit("or", true, input, scope, handle)).traverse(false),
        lazy,
    );
    registry.register(
        "if",
        Implementation::descriptor().async_method(|input, scope, handle| conditional("if", input, scope, handle)).traverse(false),
        lazy,
    );
    registry.register(
        "?:",
        Implementation::descriptor().async_method(|input, scope, handle| conditional("?:", input, scope, handle)).traverse(false),
        lazy,
    );
}

fn not(input: Input, _scope: &Scope, _handle: &Handle) -> Result<Output> {
    let args = input.into_args();
    Ok(Output::Value((!truthy(arg(&args, 0))).into()))
}

fn not_not(input: Input, _scope: &Scope, _handle: &Handle) -> Result<Output> {
    let args = input.into_args();
    Ok(Output::Value(truthy(arg(&args, 0)).into()))
}

/// Bitwise xor of the 32-bit integer readings of both operands
fn xor(input: Input, _scope: &Scope, _handle: &Handle) -> Result<Output> {
    let args = input.into_args();
    Ok(Output::Value((to_int32(arg(&args, 0)) ^ to_int32(arg(&args, 1))).into()))
}

fn to_int32(value: &Value) -> i32 {
    let n = to_number(value);
    if n.is_finite() {
        n.trunc() as i64 as i32
    } else {
        0
    }
}

/// Suspension for an operator that paused on argument `args[idx]`
///
/// Arguments before `idx` are dropped: they were already decided and cannot
/// change the outcome.
pub(crate) fn suspended_at(
    operator: &str,
    input: &Input,
    args: &[LogicNode],
    idx: usize,
    suspension: Suspension,
) -> Evaluation {
    let mut rest: Vec<Partial> = vec![Evaluation::Suspended(suspension).into()];
    rest.extend(args.iter().skip(idx + 1).map(Partial::pending));
    Evaluation::Suspended(Suspension::call(operator, input.clone().into_value(), rest))
}

/// `and` returns the first falsy operand (or the last); `or` the first truthy
fn short_circuit(operator: &'static str, stop_when: bool, input: Input, scope: Scope, handle: Handle) -> BoxFuture<'static, Result<Output>> {
    async move {
        let args = raw_arguments(&input);
        let mut last = Value::Null;

        for (idx, node) in args.iter().enumerate() {
            match handle.evaluate(node, &scope).await? {
                Evaluation::Done(value) => {
                    if truthy(&value) == stop_when {
                        return Ok(Output::Value(value));
                    }
                    last = value;
                }
                Evaluation::Suspended(suspension) => {
                    return Ok(Output::Evaluation(suspended_at(operator, &input, &args, idx, suspension)));
                }
            }
        }

        Ok(Output::Value(last))
    }
    .boxed()
}

/// `[cond, then, cond, then, ..., else]`
fn conditional(operator: &'static str, input: Input, scope: Scope, handle: Handle) -> BoxFuture<'static, Result<Output>> {
    async move {
        let args = raw_arguments(&input);
        let mut idx = 0;

        while idx + 1 < args.len() {
            match handle.evaluate(&args[idx], &scope).await? {
                Evaluation::Done(value) if truthy(&value) => {
                    return Ok(Output::Evaluation(handle.evaluate(&args[idx + 1], &scope).await?));
                }
                Evaluation::Done(_) => idx += 2,
                Evaluation::Suspended(suspension) => {
                    return Ok(Output::Evaluation(suspended_at(operator, &input, &args, idx, suspension)));
                }
            }
        }

        match args.get(idx) {
            Some(otherwise) => Ok(Output::Evaluation(handle.evaluate(otherwise, &scope).await?)),
            None => Ok(Output::Value(Value::Null)),
        }
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use crate::interpreter::{Engine, RunOptions};
    use serde_json::{json, Value};

    fn run(logic: Value, data: Value) -> Value {
        Engine::default().run_sync(&logic, data, RunOptions::default()).unwrap().into_value().unwrap()
    }

    #[test]
    fn test_if_branches() {
        assert_eq!(run(json!({"if": [1, 2, 3]}), json!({})), json!(2));
        assert_eq!(run(json!({"if": [0, 2, 3]}), json!({})), json!(3));
        assert_eq!(run(json!({"if": [false, 1, false, 2]}), json!({})), Value::Null);
        assert_eq!(
            run(json!({"if": [{"<": [{"var": "t"}, 0]}, "cold", {"<": [{"var": "t"}, 20]}, "mild", "hot"]}), json!({"t": 12})),
            json!("mild")
        );
    }

    #[test]
    fn test_if_does_not_evaluate_untaken_branch() {
        // The untaken branch names an operator that does not exist
        assert_eq!(run(json!({"if": [true, "ok", {"nope": []}]}), json!({})), json!("ok"));
    }

    #[test]
    fn test_and_or_return_operands() {
        assert_eq!(run(json!({"and": [1, "a", 0, {"nope": []}]}), json!({})), json!(0));
        assert_eq!(run(json!({"and": [1, "a"]}), json!({})), json!("a"));
        assert_eq!(run(json!({"or": [0, "", "x", {"nope": []}]}), json!({})), json!("x"));
        assert_eq!(run(json!({"or": [0, false]}), json!({})), json!(false));
    }

    #[test]
    fn test_negation_and_xor() {
        assert_eq!(run(json!({"!": [[]]}), json!({})), json!(true));
        assert_eq!(run(json!({"!!": ["0"]}), json!({})), json!(true));
        assert_eq!(run(json!({"xor": [1, "1"]}), json!({})), json!(0));
        assert_eq!(run(json!({"xor": [3, 5]}), json!({})), json!(6));
    }
}
