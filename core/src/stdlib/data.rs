//! Data access and string/array helpers

use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::interpreter::{Annotations, Handle, Implementation, Input, OperatorRegistry, Output, Scope};

use super::comparison::strictly_equal;
use super::{arg, to_text};

pub fn register(registry: &mut OperatorRegistry) {
    let pure = Annotations::new().deterministic();

    // Reads the scope, so never inlined
    registry.register("var", Implementation::sync(var), Annotations::new());
    registry.register("missing", Implementation::sync(missing), Annotations::new());

    registry.register(
        "preserve",
        Implementation::descriptor().method(preserve).traverse(false),
        pure.raw_data(),
    );
    registry.register("cat", Implementation::sync(cat), pure);
    registry.register("in", Implementation::sync(contains), pure);
    registry.register("merge", Implementation::sync(merge), pure);
}

fn path_of(operator: &str, value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(path) => Ok(path.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(EngineError::invalid_arguments(
            operator,
            format!("path must be a string or number, got {other}"),
        )),
    }
}

/// `{"var": path}` or `{"var": [path, default]}`
fn var(input: Input, scope: &Scope, _handle: &Handle) -> Result<Output> {
    let args = input.into_args();
    let path = path_of("var", arg(&args, 0))?;

    let value = scope.resolve(&path)?;
    if value.is_null() {
        return Ok(Output::Value(arg(&args, 1).clone()));
    }
    Ok(Output::Value(value))
}

/// Paths (from the arguments, or an array first argument) whose value is
/// null, missing or the empty string
fn missing(input: Input, scope: &Scope, _handle: &Handle) -> Result<Output> {
    let args = match input.into_args().as_slice() {
        [Value::Array(paths), ..] => paths.clone(),
        args => args.to_vec(),
    };

    let mut absent = Vec::new();
    for path in args {
        let value = scope.resolve(&path_of("missing", &path)?)?;
        if value.is_null() || value == Value::String(String::new()) {
            absent.push(path);
        }
    }
    Ok(Output::Value(Value::Array(absent)))
}

/// Returns its raw argument without evaluating it
fn preserve(input: Input, _scope: &Scope, _handle: &Handle) -> Result<Output> {
    Ok(Output::Value(input.into_value()))
}

fn cat(input: Input, _scope: &Scope, _handle: &Handle) -> Result<Output> {
    let text: String = input.into_args().iter().map(to_text).collect();
    Ok(Output::Value(Value::String(text)))
}

/// `[needle, haystack]`: substring test for strings, membership for arrays
fn contains(input: Input, _scope: &Scope, _handle: &Handle) -> Result<Output> {
    let args = input.into_args();
    let needle = arg(&args, 0);
    let found = match arg(&args, 1) {
        Value::String(haystack) => haystack.contains(&to_text(needle)),
        Value::Array(items) => items.iter().any(|item| strictly_equal(item, needle)),
        _ => false,
    };
    Ok(Output::Value(found.into()))
}

/// Flatten one level of arrays into a single array
fn merge(input: Input, _scope: &Scope, _handle: &Handle) -> Result<Output> {
    let mut merged = Vec::new();
    for value in input.into_args() {
        match value {
            Value::Array(items) => merged.extend(items),
            other => merged.push(other),
        }
    }
    Ok(Output::Value(Value::Array(merged)))
}
