//! Equality and ordering

use serde_json::Value;
use std::cmp::Ordering;

use crate::error::Result;
use crate::interpreter::{Annotations, Handle, Implementation, Input, OperatorRegistry, Output, Scope};

use super::{arg, to_number, to_text};

pub fn register(registry: &mut OperatorRegistry) {
    let pure = Annotations::new().deterministic();
    registry.register("==", Implementation::sync(loose_eq), pure);
    registry.register("!=", Implementation::sync(loose_ne), pure);
    registry.register("===", Implementation::sync(strict_eq), pure);
    registry.register("!==", Implementation::sync(strict_ne), pure);
    registry.register("<", Implementation::sync(less), pure);
    registry.register("<=", Implementation::sync(less_eq), pure);
    registry.register(">", Implementation::sync(greater), pure);
    registry.register(">=", Implementation::sync(greater_eq), pure);
}

fn loose_eq(input: Input, _scope: &Scope, _handle: &Handle) -> Result<Output> {
    let args = input.into_args();
    Ok(Output::Value(loosely_equal(arg(&args, 0), arg(&args, 1)).into()))
}

fn loose_ne(input: Input, _scope: &Scope, _handle: &Handle) -> Result<Output> {
    let args = input.into_args();
    Ok(Output::Value((!loosely_equal(arg(&args, 0), arg(&args, 1))).into()))
}

fn strict_eq(input: Input, _scope: &Scope, _handle: &Handle) -> Result<Output> {
    let args = input.into_args();
    Ok(Output::Value(strictly_equal(arg(&args, 0), arg(&args, 1)).into()))
}

fn strict_ne(input: Input, _scope: &Scope, _handle: &Handle) -> Result<Output> {
    let args = input.into_args();
    Ok(Output::Value((!strictly_equal(arg(&args, 0), arg(&args, 1))).into()))
}

/// `a < b`, or `a < b < c` with three operands
fn less(input: Input, _scope: &Scope, _handle: &Handle) -> Result<Output> {
    Ok(Output::Value(chain(&input.into_args(), |o| o == Ordering::Less).into()))
}

fn less_eq(input: Input, _scope: &Scope, _handle: &Handle) -> Result<Output> {
    Ok(Output::Value(chain(&input.into_args(), |o| o != Ordering::Greater).into()))
}

fn greater(input: Input, _scope: &Scope, _handle: &Handle) -> Result<Output> {
    let args = input.into_args();
    let ordered = compare(arg(&args, 0), arg(&args, 1)).is_some_and(|o| o == Ordering::Greater);
    Ok(Output::Value(ordered.into()))
}

fn greater_eq(input: Input, _scope: &Scope, _handle: &Handle) -> Result<Output> {
    let args = input.into_args();
    let ordered = compare(arg(&args, 0), arg(&args, 1)).is_some_and(|o| o != Ordering::Less);
    Ok(Output::Value(ordered.into()))
}

fn chain(args: &[Value], accept: impl Fn(Ordering) -> bool) -> bool {
    let operands = if args.len() >= 3 { &args[..3] } else { args };
    match operands {
        [] | [_] => compare(arg(args, 0), arg(args, 1)).is_some_and(&accept),
        _ => operands
            .windows(2)
            .all(|pair| compare(&pair[0], &pair[1]).is_some_and(&accept)),
    }
}

/// Relational order: strings compare as text, everything else numerically.
/// `None` when either side has no numeric reading.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => to_number(a).partial_cmp(&to_number(b)),
    }
}

pub fn strictly_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Equality with type coercion between numbers, strings and booleans
pub fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Bool(_), _) | (_, Value::Bool(_)) if std::mem::discriminant(a) != std::mem::discriminant(b) => {
            to_number(a) == to_number(b)
        }
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => to_number(a) == to_number(b),
        (Value::Array(_) | Value::Object(_), Value::String(_) | Value::Number(_))
        | (Value::String(_) | Value::Number(_), Value::Array(_) | Value::Object(_)) => {
            loosely_equal(&Value::String(to_text(a)), &Value::String(to_text(b)))
                || to_number(a) == to_number(b)
        }
        _ => strictly_equal(a, b),
    }
}
