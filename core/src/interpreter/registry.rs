//! Operator registry
//!
//! Operators arrive in several shapes: a bare synchronous callable, a bare
//! asynchronous callable, or a descriptor carrying both plus a `traverse` flag.
//! Registration normalizes every shape into one [`Operator`] record, so the
//! interpreter never branches on shape at call time.
//!
//! # Example
//!
//! ```
//! use verdict_core::interpreter::registry::{Annotations, Implementation, Input, Output, OperatorRegistry};
//!
//! let mut registry = OperatorRegistry::new();
//! registry.register(
//!     "double",
//!     Implementation::sync(|input: Input, _scope: &_, _handle: &_| {
//!         let n = input.into_value().as_f64().unwrap_or(0.0);
//!         Ok(Output::Value((n * 2.0).into()))
//!     }),
//!     Annotations::new().deterministic(),
//! );
//! assert!(registry.lookup("double").is_some());
//! ```

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::scope::Scope;
use super::types::{Evaluation, LogicNode};
use super::Handle;
use crate::error::Result;

/* ===================== Operator Contract ===================== */

/// Synchronous operator body
pub type SyncMethod = Arc<dyn Fn(Input, &Scope, &Handle) -> Result<Output> + Send + Sync>;

/// Asynchronous operator body
pub type AsyncMethod = Arc<dyn Fn(Input, Scope, Handle) -> BoxFuture<'static, Result<Output>> + Send + Sync>;

/// What an operator receives
#[derive(Debug, Clone)]
pub enum Input {
    /// Arguments already evaluated (`traverse = true`)
    Evaluated(Value),
    /// The raw argument tree (`traverse = false`)
    Raw(Arc<LogicNode>),
}

impl Input {
    /// Input as a single JSON value; raw trees are converted back to JSON
    pub fn into_value(self) -> Value {
        match self {
            Input::Evaluated(value) => value,
            Input::Raw(node) => node.to_value(),
        }
    }

    /// Input as an argument list; a non-array input is a single argument
    pub fn into_args(self) -> Vec<Value> {
        match self.into_value() {
            Value::Array(items) => items,
            other => vec![other],
        }
    }

    pub fn raw(&self) -> Option<&LogicNode> {
        match self {
            Input::Raw(node) => Some(node),
            Input::Evaluated(_) => None,
        }
    }
}

/// What an operator returns
pub enum Output {
    Value(Value),
    /// Values still being computed; awaited concurrently, results kept in order
    Pending(Vec<BoxFuture<'static, Result<Value>>>),
    /// The operator cannot complete now. The payload says what it waits for.
    Yield(Value),
    /// Result of evaluating a sub-tree, passed through as-is (suspensions included)
    Evaluation(Evaluation),
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Output::Pending(futures) => write!(f, "Pending({} futures)", futures.len()),
            Output::Yield(reason) => f.debug_tuple("Yield").field(reason).finish(),
            Output::Evaluation(evaluation) => f.debug_tuple("Evaluation").field(evaluation).finish(),
        }
    }
}

impl From<Value> for Output {
    fn from(value: Value) -> Self {
        Output::Value(value)
    }
}

impl From<Evaluation> for Output {
    fn from(evaluation: Evaluation) -> Self {
        Output::Evaluation(evaluation)
    }
}

/// Caller-supplied operator shape
#[derive(Clone)]
pub enum Implementation {
    /// Bare callable; arguments are always evaluated first
    Sync(SyncMethod),
    Async(AsyncMethod),
    Descriptor {
        method: Option<SyncMethod>,
        async_method: Option<AsyncMethod>,
        traverse: bool,
    },
}

impl Implementation {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Input, &Scope, &Handle) -> Result<Output> + Send + Sync + 'static,
    {
        Implementation::Sync(Arc::new(f))
    }

    pub fn asynchronous<F>(f: F) -> Self
    where
        F: Fn(Input, Scope, Handle) -> BoxFuture<'static, Result<Output>> + Send + Sync + 'static,
    {
        Implementation::Async(Arc::new(f))
    }

    /// Descriptor form. Defaults to `traverse = true` with no methods.
    pub fn descriptor() -> Self {
        Implementation::Descriptor {
            method: None,
            async_method: None,
            traverse: true,
        }
    }

    pub fn method<F>(self, f: F) -> Self
    where
        F: Fn(Input, &Scope, &Handle) -> Result<Output> + Send + Sync + 'static,
    {
        let (_, async_method, traverse) = self.into_parts();
        Implementation::Descriptor {
            method: Some(Arc::new(f)),
            async_method,
            traverse,
        }
    }

    pub fn async_method<F>(self, f: F) -> Self
    where
        F: Fn(Input, Scope, Handle) -> BoxFuture<'static, Result<Output>> + Send + Sync + 'static,
    {
        let (method, _, traverse) = self.into_parts();
        Implementation::Descriptor {
            method,
            async_method: Some(Arc::new(f)),
            traverse,
        }
    }

    pub fn traverse(self, traverse: bool) -> Self {
        let (method, async_method, _) = self.into_parts();
        Implementation::Descriptor {
            method,
            async_method,
            traverse,
        }
    }

    fn into_parts(self) -> (Option<SyncMethod>, Option<AsyncMethod>, bool) {
        match self {
            Implementation::Sync(method) => (Some(method), None, true),
            Implementation::Async(method) => (None, Some(method), true),
            Implementation::Descriptor {
                method,
                async_method,
                traverse,
            } => (method, async_method, traverse),
        }
    }
}

/// Hints the compiler uses to classify and optimize programs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Annotations {
    pub deterministic: bool,
    /// `Some(true)`: never waits on anything itself. Defaults to "no async method".
    pub sync: Option<bool>,
    pub yields: bool,
    pub use_context: bool,
    /// Raw arguments are data, never evaluated (`preserve`)
    pub raw_data: bool,
}

impl Annotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deterministic(mut self) -> Self {
        self.deterministic = true;
        self
    }

    pub fn sync(mut self) -> Self {
        self.sync = Some(true);
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.sync = Some(false);
        self
    }

    pub fn yields(mut self) -> Self {
        self.yields = true;
        self
    }

    pub fn use_context(mut self) -> Self {
        self.use_context = true;
        self
    }

    pub fn raw_data(mut self) -> Self {
        self.raw_data = true;
        self
    }
}

/* ===================== Operator Descriptor ===================== */

/// Normalized operator record
#[derive(Clone)]
pub struct Operator {
    pub(crate) method: Option<SyncMethod>,
    pub(crate) async_method: Option<AsyncMethod>,
    pub traverse: bool,
    pub deterministic: bool,
    pub yields: bool,
    pub use_context: bool,
    pub raw_data: bool,
    /// Classification used by the compiler
    pub sync: bool,
}

impl Operator {
    /// Returns `None` for a descriptor without any method
    pub fn normalize(implementation: Implementation, annotations: Annotations) -> Option<Operator> {
        let (method, async_method, traverse) = implementation.into_parts();
        if method.is_none() && async_method.is_none() {
            return None;
        }

        let sync = annotations.sync.unwrap_or(async_method.is_none());
        Some(Operator {
            method,
            async_method,
            traverse,
            deterministic: annotations.deterministic,
            yields: annotations.yields,
            use_context: annotations.use_context,
            raw_data: annotations.raw_data,
            sync,
        })
    }

    pub fn has_async_method(&self) -> bool {
        self.async_method.is_some()
    }
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operator")
            .field("method", &self.method.is_some())
            .field("async_method", &self.async_method.is_some())
            .field("traverse", &self.traverse)
            .field("deterministic", &self.deterministic)
            .field("yields", &self.yields)
            .field("use_context", &self.use_context)
            .field("raw_data", &self.raw_data)
            .field("sync", &self.sync)
            .finish()
    }
}

/* ===================== Registry ===================== */

/// Name → operator table, owned by one engine
#[derive(Clone, Default)]
pub struct OperatorRegistry {
    operators: HashMap<String, Arc<Operator>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize and store an operator, replacing any previous one of that name
    ///
    /// Returns false (and stores nothing) for a descriptor without methods.
    pub fn register(&mut self, name: impl Into<String>, implementation: Implementation, annotations: Annotations) -> bool {
        let name = name.into();
        let Some(operator) = Operator::normalize(implementation, annotations) else {
            tracing::warn!(operator = %name, "ignoring operator descriptor without a method");
            return false;
        };

        if self.operators.insert(name.clone(), Arc::new(operator)).is_some() {
            tracing::debug!(operator = %name, "replaced operator");
        }
        true
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<Operator>> {
        self.operators.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<Operator>> {
        self.operators.remove(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

impl fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorRegistry").field("operators", &self.names()).finish()
    }
}
