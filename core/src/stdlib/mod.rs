//! Built-in operator library
//!
//! Registered through the same contract as any user operator, so nothing here
//! has privileged access to the interpreter.
//!
//! Value coercions follow the loose rules logic authors expect from JSON
//! logic: strings that look like numbers compare as numbers, `null` counts as
//! zero in arithmetic, and empty strings and arrays are falsy.

pub mod arithmetic;
pub mod comparison;
pub mod data;
pub mod iteration;
pub mod logic;

use serde_json::Value;

use crate::interpreter::{Input, LogicNode, OperatorRegistry};

/* ===================== Registry ===================== */

/// Fresh registry holding every built-in operator
pub fn registry() -> OperatorRegistry {
    let mut registry = OperatorRegistry::new();
    arithmetic::register(&mut registry);
    comparison::register(&mut registry);
    logic::register(&mut registry);
    data::register(&mut registry);
    iteration::register(&mut registry);
    registry
}

/* ===================== Coercions ===================== */

/// Loose numeric conversion. NaN when the value has no numeric reading.
pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse().unwrap_or(f64::NAN)
            }
        }
        Value::Array(items) => match items.as_slice() {
            [] => 0.0,
            [single] => to_number(single),
            _ => f64::NAN,
        },
        Value::Object(_) => f64::NAN,
    }
}

/// JSON number for `n`: integral values stay integers, non-finite become null
pub fn number(n: f64) -> Value {
    const MAX_SAFE: f64 = 9_007_199_254_740_991.0;

    if !n.is_finite() {
        Value::Null
    } else if n.fract() == 0.0 && n.abs() <= MAX_SAFE {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

/// Text form used by `cat` and string comparisons
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 1e21 => format!("{f:.0}"),
            _ => n.to_string(),
        },
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => to_text(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

/* ===================== Argument Helpers ===================== */

/// Argument nodes of a non-traversing operator
///
/// Already evaluated input (an operator re-registered with `traverse = true`)
/// is wrapped back into literals.
pub(crate) fn raw_arguments(input: &Input) -> Vec<LogicNode> {
    match input {
        Input::Raw(node) => node.arguments().to_vec(),
        Input::Evaluated(Value::Array(items)) => items.iter().cloned().map(LogicNode::Literal).collect(),
        Input::Evaluated(other) => vec![LogicNode::Literal(other.clone())],
    }
}

/// `args[idx]`, or null when absent
pub(crate) fn arg(args: &[Value], idx: usize) -> &Value {
    static NULL: Value = Value::Null;
    args.get(idx).unwrap_or(&NULL)
}
