//! # Interpreter
//!
//! Recursive evaluation of logic trees against a [`Scope`].
//!
//! ## Evaluation rules
//!
//! - **Literal**: returned unchanged
//! - **Sequence**: every element is evaluated concurrently against the same
//!   scope, results are joined in input order
//! - **Operation**: the operator is looked up by name. Traversing operators get
//!   their arguments evaluated first; the others receive the raw argument tree
//!   and decide themselves what to evaluate.
//!
//! Any step may produce a [`Suspension`] instead of a value (when suspension
//! tracking is enabled). It propagates upward immediately and carries enough of
//! the partially evaluated tree for [`Engine::resume`] to continue from the
//! exact point that paused, without re-running completed operators.

pub mod registry;
pub mod scope;
pub mod types;

#[cfg(test)]
mod tests;

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::compiler::{self, BuildOptions, Program, ProgramKind};
use crate::config::EngineOptions;
use crate::error::{EngineError, Result};

pub use registry::{Annotations, Implementation, Input, Operator, OperatorRegistry, Output};
pub use scope::Scope;
pub use types::{Evaluation, LogicNode, Partial, SuspendPoint, Suspension};

/* ===================== Engine ===================== */

/// Logic engine: an operator registry plus options
///
/// Cloning is cheap and clones share the registry. [`Engine::add_operator`]
/// copies the registry on write, so evaluations already running keep the
/// operators they started with.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

#[derive(Clone)]
struct EngineInner {
    registry: OperatorRegistry,
    options: EngineOptions,
}

/// Per-run options
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Enclosing scope data, nearest first, reachable through `../`
    pub above: Vec<Value>,
    pub cancel: Option<CancellationToken>,
}

impl RunOptions {
    pub fn above(mut self, above: Vec<Value>) -> Self {
        self.above = above;
        self
    }

    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

impl Engine {
    pub fn new(registry: OperatorRegistry, options: EngineOptions) -> Self {
        Self {
            inner: Arc::new(EngineInner { registry, options }),
        }
    }

    /// Engine preloaded with the built-in operator library
    pub fn with_builtins(options: EngineOptions) -> Self {
        Self::new(crate::stdlib::registry(), options)
    }

    pub fn options(&self) -> &EngineOptions {
        &self.inner.options
    }

    pub fn registry(&self) -> &OperatorRegistry {
        &self.inner.registry
    }

    /// Register an operator on this engine only
    pub fn add_operator(&mut self, name: impl Into<String>, implementation: Implementation, annotations: Annotations) -> bool {
        Arc::make_mut(&mut self.inner)
            .registry
            .register(name, implementation, annotations)
    }

    pub(crate) fn lookup(&self, name: &str) -> Result<Arc<Operator>> {
        self.inner
            .registry
            .lookup(name)
            .ok_or_else(|| EngineError::UnknownOperator(name.to_string()))
    }

    /// Evaluate a JSON logic tree against `data`
    pub async fn run(&self, logic: &Value, data: Value, options: RunOptions) -> Result<Evaluation> {
        let node = LogicNode::parse_bounded(logic, self.options().max_depth)?;
        self.run_node(&node, data, options).await
    }

    pub async fn run_node(&self, node: &LogicNode, data: Value, options: RunOptions) -> Result<Evaluation> {
        let scope = Scope::with_above(data, options.above);
        let handle = Handle::new(self.clone(), InvocationState::default(), options.cancel.unwrap_or_default());
        handle.evaluate(node, &scope).await
    }

    /// Evaluate without an async runtime
    ///
    /// Logic that can reach an asynchronous or yielding operator is rejected
    /// with [`EngineError::NotSynchronous`] before anything runs. An operator
    /// classified sync that still has to wait fails the same way.
    pub fn run_sync(&self, logic: &Value, data: Value, options: RunOptions) -> Result<Evaluation> {
        let node = LogicNode::parse_bounded(logic, self.options().max_depth)?;
        if compiler::classify(self, &node)? == ProgramKind::Async {
            return Err(EngineError::NotSynchronous);
        }

        let scope = Scope::with_above(data, options.above);
        let handle = Handle::new(self.clone(), InvocationState::default(), options.cancel.unwrap_or_default());
        handle.evaluate_now(&node, &scope)
    }

    /// Continue a suspended evaluation
    ///
    /// `replacements` supplies one value per suspension point id. Completed
    /// results inside the suspension are reused as-is; only the calls that were
    /// waiting on a suspension point run.
    pub async fn resume(
        &self,
        suspension: &Suspension,
        replacements: &HashMap<Uuid, Value>,
        data: Value,
        options: RunOptions,
    ) -> Result<Evaluation> {
        let node = suspension.to_logic(replacements)?;
        tracing::debug!(points = replacements.len(), "resuming suspended evaluation");
        self.run_node(&node, data, options).await
    }

    /// Compile a logic tree into a reusable program
    pub fn build(&self, logic: &Value, options: BuildOptions) -> Result<Program> {
        compiler::build(self, logic, options)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::with_builtins(EngineOptions::default())
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("operators", &self.inner.registry.len())
            .field("options", &self.inner.options)
            .finish()
    }
}

/* ===================== Invocation State ===================== */

/// Mutable key/value bag shared by every operator of one invocation
///
/// Operators annotated `use_context` keep state here. Compiled programs that
/// use it are pooled so concurrent invocations never see each other's bag.
#[derive(Debug, Clone, Default)]
pub struct InvocationState {
    inner: Arc<Mutex<Map<String, Value>>>,
}

impl InvocationState {
    fn lock(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.lock().insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.lock().remove(key)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/* ===================== Handle ===================== */

/// What an operator can reach back into while it runs
#[derive(Clone)]
pub struct Handle {
    engine: Engine,
    state: InvocationState,
    cancel: CancellationToken,
    /// Nesting level of the node this handle evaluates
    depth: usize,
}

impl Handle {
    pub(crate) fn new(engine: Engine, state: InvocationState, cancel: CancellationToken) -> Self {
        Self {
            engine,
            state,
            cancel,
            depth: 0,
        }
    }

    /// Handle for the nodes one level below this one
    fn nested(&self) -> Handle {
        Handle {
            depth: self.depth + 1,
            ..self.clone()
        }
    }

    fn check_depth(&self) -> Result<()> {
        let limit = self.engine.options().max_depth;
        if self.depth > limit {
            return Err(EngineError::NestingTooDeep { limit });
        }
        Ok(())
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn state(&self) -> &InvocationState {
        &self.state
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn yield_supported(&self) -> bool {
        self.engine.options().yield_supported
    }

    /// Evaluate a (raw) node in `scope`
    pub fn evaluate(&self, node: &LogicNode, scope: &Scope) -> BoxFuture<'static, Result<Evaluation>> {
        evaluate(node.clone(), scope.clone(), self.clone())
    }

    /// Evaluate a node that must complete without waiting
    pub fn evaluate_now(&self, node: &LogicNode, scope: &Scope) -> Result<Evaluation> {
        self.evaluate(node, scope)
            .now_or_never()
            .unwrap_or(Err(EngineError::NotSynchronous))
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    /// Race `fut` against cancellation of this invocation
    pub async fn cancellable<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
            result = fut => result,
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("state", &self.state)
            .field("depth", &self.depth)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/* ===================== Evaluation ===================== */

fn evaluate(node: LogicNode, scope: Scope, handle: Handle) -> BoxFuture<'static, Result<Evaluation>> {
    async move {
        handle.check_cancelled()?;
        handle.check_depth()?;

        match node {
            LogicNode::Literal(value) => Ok(Evaluation::Done(value)),

            LogicNode::Sequence(items) => {
                let nested = handle.nested();
                let results = try_join_all(
                    items
                        .iter()
                        .map(|item| evaluate(item.clone(), scope.clone(), nested.clone())),
                )
                .await?;
                Ok(Evaluation::join(results))
            }

            LogicNode::Operation { name, args } => {
                let operator = handle.engine.lookup(&name)?;
                // Raw arguments evaluated by the operator sit one level down too
                let handle = handle.nested();

                let input = if operator.traverse {
                    match evaluate((*args).clone(), scope.clone(), handle.clone()).await? {
                        Evaluation::Done(value) => Input::Evaluated(value),
                        Evaluation::Suspended(suspension) => {
                            return Ok(Evaluation::Suspended(suspension.within_call(&name, args.to_value())));
                        }
                    }
                } else {
                    Input::Raw(args)
                };

                call_operator(&name, &operator, input, scope, handle).await
            }
        }
    }
    .boxed()
}

/// Invoke one operator and interpret what it returned
///
/// Shared by the interpreter and compiled programs.
pub(crate) async fn call_operator(
    name: &str,
    operator: &Operator,
    input: Input,
    scope: Scope,
    handle: Handle,
) -> Result<Evaluation> {
    // Only kept when a yield could turn it into a suspension point
    let recorded = handle.yield_supported().then(|| match &input {
        Input::Evaluated(value) => value.clone(),
        Input::Raw(node) => node.to_value(),
    });

    tracing::trace!(operator = name, traverse = operator.traverse, "invoking operator");

    let output = match (&operator.async_method, &operator.method) {
        (Some(async_method), _) => {
            handle
                .cancellable(async_method(input, scope, handle.clone()))
                .await
        }
        (None, Some(method)) => method(input, &scope, &handle),
        (None, None) => Err(EngineError::UnknownOperator(name.to_string())),
    }
    .map_err(|err| err.within(name))?;

    match output {
        Output::Value(value) => Ok(Evaluation::Done(value)),
        Output::Evaluation(evaluation) => Ok(evaluation),
        Output::Pending(pending) => {
            let values = handle
                .cancellable(try_join_all(pending))
                .await
                .map_err(|err| err.within(name))?;
            Ok(Evaluation::Done(Value::Array(values)))
        }
        Output::Yield(reason) => match recorded {
            Some(input) => {
                tracing::debug!(operator = name, "operator suspended");
                Ok(Evaluation::Suspended(Suspension::point(name, input, reason)))
            }
            None => Err(EngineError::SuspensionDisabled {
                operator: name.to_string(),
            }),
        },
    }
}
