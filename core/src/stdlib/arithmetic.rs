//! Arithmetic operators
//!
//! All of them fold left over their (evaluated) arguments:
//! `{"-": [1, 2, 3]}` is `(1 - 2) - 3`.

use crate::error::{EngineError, Result};
use crate::interpreter::{Annotations, Handle, Implementation, Input, OperatorRegistry, Output, Scope};

use super::{number, to_number};

pub fn register(registry: &mut OperatorRegistry) {
    let pure = Annotations::new().deterministic();
    registry.register("+", Implementation::sync(add), pure);
    registry.register("-", Implementation::sync(subtract), pure);
    registry.register("*", Implementation::sync(multiply), pure);
    registry.register("/", Implementation::sync(divide), pure);
    registry.register("%", Implementation::sync(modulo), pure);
    registry.register("min", Implementation::sync(min), pure);
    registry.register("max", Implementation::sync(max), pure);
}

fn numbers(input: Input) -> Vec<f64> {
    input.into_args().iter().map(to_number).collect()
}

/// Left fold over at least one operand
fn fold(operator: &str, operands: Vec<f64>, op: impl Fn(f64, f64) -> f64) -> Result<Output> {
    let mut operands = operands.into_iter();
    let first = operands
        .next()
        .ok_or_else(|| EngineError::invalid_arguments(operator, "expected at least one operand"))?;
    Ok(Output::Value(number(operands.fold(first, op))))
}

/// Sum; a single operand is cast to a number
fn add(input: Input, _scope: &Scope, _handle: &Handle) -> Result<Output> {
    Ok(Output::Value(number(numbers(input).into_iter().sum())))
}

/// Difference; a single operand is negated
fn subtract(input: Input, _scope: &Scope, _handle: &Handle) -> Result<Output> {
    let operands = numbers(input);
    match operands.as_slice() {
        [single] => Ok(Output::Value(number(-single))),
        _ => fold("-", operands, |a, b| a - b),
    }
}

fn multiply(input: Input, _scope: &Scope, _handle: &Handle) -> Result<Output> {
    fold("*", numbers(input), |a, b| a * b)
}

fn divide(input: Input, _scope: &Scope, _handle: &Handle) -> Result<Output> {
    fold("/", numbers(input), |a, b| a / b)
}

fn modulo(input: Input, _scope: &Scope, _handle: &Handle) -> Result<Output> {
    fold("%", numbers(input), |a, b| a % b)
}

fn min(input: Input, _scope: &Scope, _handle: &Handle) -> Result<Output> {
    Ok(Output::Value(extreme(numbers(input), f64::min)))
}

fn max(input: Input, _scope: &Scope, _handle: &Handle) -> Result<Output> {
    Ok(Output::Value(extreme(numbers(input), f64::max)))
}

/// Null for no operands or any non-numeric operand
fn extreme(operands: Vec<f64>, pick: fn(f64, f64) -> f64) -> serde_json::Value {
    if operands.iter().any(|n| n.is_nan()) {
        return serde_json::Value::Null;
    }
    operands.into_iter().reduce(pick).map(number).unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use crate::interpreter::{Engine, RunOptions};
    use serde_json::{json, Value};

    fn run(logic: Value) -> Value {
        Engine::default()
            .run_sync(&logic, json!({}), RunOptions::default())
            .unwrap()
            .into_value()
            .unwrap()
    }

    #[test]
    fn test_folds() {
        assert_eq!(run(json!({"+": [1, 2, 3]})), json!(6));
        assert_eq!(run(json!({"-": [1, 2, 3]})), json!(-4));
        assert_eq!(run(json!({"*": [1, 2, 3]})), json!(6));
        assert_eq!(run(json!({"/": [1, 2, 3]})), json!(1.0 / 6.0));
        assert_eq!(run(json!({"%": [5, 3, 7]})), json!(2));
    }

    #[test]
    fn test_unary_forms() {
        assert_eq!(run(json!({"+": "3.5"})), json!(3.5));
        assert_eq!(run(json!({"-": 2})), json!(-2));
        assert_eq!(run(json!({"+": []})), json!(0));
    }

    #[test]
    fn test_non_finite_is_null() {
        assert_eq!(run(json!({"/": [1, 0]})), Value::Null);
        assert_eq!(run(json!({"+": ["x", 1]})), Value::Null);
    }

    #[test]
    fn test_min_max() {
        assert_eq!(run(json!({"max": [5, 3, 7]})), json!(7));
        assert_eq!(run(json!({"min": [5, 3, 7]})), json!(3));
        assert_eq!(run(json!({"min": []})), Value::Null);
        assert_eq!(run(json!({"max": [1, "a"]})), Value::Null);
    }

    #[test]
    fn test_empty_fold_is_rejected() {
        let err = crate::interpreter::Engine::default()
            .run_sync(&json!({"*": []}), json!({}), RunOptions::default())
            .unwrap_err();
        assert!(matches!(err, crate::EngineError::InvalidArguments { .. }));
    }
}
