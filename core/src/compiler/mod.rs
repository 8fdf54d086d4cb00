//! # Compiler
//!
//! Turns a logic tree into a [`Program`] that can be called many times against
//! different data without re-resolving operator names.
//!
//! Compilation:
//! 1. resolves every operator that can be evaluated, including inside the raw
//!    arguments of operators like `if` or `map` (unknown names fail here)
//! 2. classifies the program: `Async` if any reachable operator is asynchronous
//!    or may yield, `Sync` otherwise
//! 3. records whether any reachable operator keeps per-invocation state
//! 4. evaluates constant, deterministic sub-trees once and inlines the result
//!
//! A top-level program that is both asynchronous and stateful is wrapped in a
//! [`Pool`] of instances; everything else is returned directly and may be
//! called concurrently.

#[cfg(test)]
mod tests;

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};
use crate::interpreter::{
    call_operator, Engine, Evaluation, Handle, Input, InvocationState, LogicNode, Operator, Scope,
};
use crate::pool::{Pool, PoolConfig};

/* ===================== Compiled Tree ===================== */

/// Logic tree with operators resolved
#[derive(Clone)]
pub enum CompiledNode {
    Literal(Value),
    Sequence(Arc<[CompiledNode]>),
    /// Traversing operator; `args` is evaluated before the call
    Call {
        name: Arc<str>,
        operator: Arc<Operator>,
        args: Arc<CompiledNode>,
        raw: Arc<LogicNode>,
    },
    /// Non-traversing operator; receives `raw` untouched
    Opaque {
        name: Arc<str>,
        operator: Arc<Operator>,
        raw: Arc<LogicNode>,
    },
}

impl CompiledNode {
    pub fn is_constant(&self) -> bool {
        matches!(self, CompiledNode::Literal(_))
    }
}

impl fmt::Debug for CompiledNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompiledNode::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            CompiledNode::Sequence(items) => f.debug_list().entries(items.iter()).finish(),
            CompiledNode::Call { name, args, .. } => f.debug_struct("Call").field("name", name).field("args", args).finish(),
            CompiledNode::Opaque { name, raw, .. } => f.debug_struct("Opaque").field("name", name).field("raw", raw).finish(),
        }
    }
}

/// Whether a program can finish without waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgramKind {
    Sync,
    Async,
}

impl fmt::Display for ProgramKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramKind::Sync => write!(f, "sync"),
            ProgramKind::Async => write!(f, "async"),
        }
    }
}

/* ===================== Build ===================== */

#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Wrap async stateful programs in a pool
    pub top: bool,
    /// Enclosing scope data, nearest first
    pub above: Vec<Value>,
    /// Pool bound; defaults to the engine's `pool_max`
    pub max: Option<usize>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            top: true,
            above: Vec::new(),
            max: None,
        }
    }
}

pub(crate) fn build(engine: &Engine, logic: &Value, options: BuildOptions) -> Result<Program> {
    let node = LogicNode::parse_bounded(logic, engine.options().max_depth)?;
    let mut compiler = Compiler::new(engine);
    let root = compiler.compile(&node, 0)?;
    let kind = compiler.kind();

    let program = Arc::new(CompiledProgram {
        root,
        kind,
        stateful: compiler.stateful,
        fingerprint: fingerprint(logic),
        engine: engine.clone(),
        above: options.above,
    });

    tracing::debug!(
        fingerprint = %program.fingerprint,
        kind = %kind,
        stateful = program.stateful,
        inlined = compiler.inlined,
        "compiled program"
    );

    if options.top && kind == ProgramKind::Async && program.stateful {
        let max = options.max.unwrap_or(engine.options().pool_max);
        let factory = program.clone();
        let pool = Pool::new(PoolConfig {
            initial_free: vec![Instance::new(program.clone())],
            max,
            create: Box::new(move || Instance::new(factory.clone())),
        });
        return Ok(Program::Pooled { program, pool });
    }

    Ok(Program::Direct(program))
}

/// Sync/async classification of a parsed tree, without compiling it
///
/// Unknown names are skipped; evaluation reports them if it ever reaches them.
pub(crate) fn classify(engine: &Engine, node: &LogicNode) -> Result<ProgramKind> {
    let mut compiler = Compiler::new(engine);
    compiler.scan_raw(node, 0, false)?;
    Ok(compiler.kind())
}

/// Hex SHA-256 of the logic tree's JSON text
pub fn fingerprint(logic: &Value) -> String {
    let digest = Sha256::digest(logic.to_string().as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

struct Compiler<'a> {
    engine: &'a Engine,
    limit: usize,
    inline: bool,
    asynchronous: bool,
    stateful: bool,
    inlined: usize,
}

impl<'a> Compiler<'a> {
    fn new(engine: &'a Engine) -> Self {
        Self {
            engine,
            limit: engine.options().max_depth,
            inline: !engine.options().disable_inline,
            asynchronous: false,
            stateful: false,
            inlined: 0,
        }
    }

    fn guard(&self, depth: usize) -> Result<()> {
        if depth > self.limit {
            return Err(EngineError::NestingTooDeep { limit: self.limit });
        }
        Ok(())
    }

    fn kind(&self) -> ProgramKind {
        if self.asynchronous {
            ProgramKind::Async
        } else {
            ProgramKind::Sync
        }
    }

    fn observe(&mut self, operator: &Operator) {
        if !operator.sync || operator.yields {
            self.asynchronous = true;
        }
        if operator.use_context {
            self.stateful = true;
        }
    }

    fn compile(&mut self, node: &LogicNode, depth: usize) -> Result<CompiledNode> {
        self.guard(depth)?;

        match node {
            LogicNode::Literal(value) => Ok(CompiledNode::Literal(value.clone())),

            LogicNode::Sequence(items) => {
                let compiled = items
                    .iter()
                    .map(|item| self.compile(item, depth + 1))
                    .collect::<Result<Vec<_>>>()?;

                if compiled.iter().all(CompiledNode::is_constant) {
                    let values = compiled
                        .into_iter()
                        .filter_map(|item| match item {
                            CompiledNode::Literal(value) => Some(value),
                            _ => None,
                        })
                        .collect();
                    return Ok(CompiledNode::Literal(Value::Array(values)));
                }
                Ok(CompiledNode::Sequence(compiled.into()))
            }

            LogicNode::Operation { name, args } => {
                let operator = self.engine.lookup(name)?;
                self.observe(&operator);

                if !operator.traverse {
                    self.scan_raw(args, depth + 1, !operator.raw_data)?;
                    return Ok(CompiledNode::Opaque {
                        name: name.clone(),
                        operator,
                        raw: args.clone(),
                    });
                }

                let compiled = self.compile(args, depth + 1)?;
                if let Some(value) = self.try_inline(name, &operator, &compiled) {
                    self.inlined += 1;
                    return Ok(CompiledNode::Literal(value));
                }

                Ok(CompiledNode::Call {
                    name: name.clone(),
                    operator,
                    args: Arc::new(compiled),
                    raw: args.clone(),
                })
            }
        }
    }

    /// Classify operators inside a raw argument tree
    ///
    /// With `strict`, the tree is logic the operator will evaluate and unknown
    /// names are rejected. Below a `raw_data` operator (`preserve`) the tree is
    /// data: unknown names are skipped, known ones still count.
    fn scan_raw(&mut self, node: &LogicNode, depth: usize, strict: bool) -> Result<()> {
        self.guard(depth)?;

        match node {
            LogicNode::Literal(_) => Ok(()),
            LogicNode::Sequence(items) => items
                .iter()
                .try_for_each(|item| self.scan_raw(item, depth + 1, strict)),
            LogicNode::Operation { name, args } => {
                let strict = match self.engine.registry().lookup(name) {
                    Some(operator) => {
                        self.observe(&operator);
                        strict && !operator.raw_data
                    }
                    None if strict => return Err(EngineError::UnknownOperator(name.to_string())),
                    None => false,
                };
                self.scan_raw(args, depth + 1, strict)
            }
        }
    }

    /// Evaluate a constant deterministic call at compile time
    fn try_inline(&self, name: &str, operator: &Operator, args: &CompiledNode) -> Option<Value> {
        let inlinable = self.inline
            && operator.deterministic
            && operator.sync
            && !operator.yields
            && !operator.use_context;
        let CompiledNode::Literal(input) = args else {
            return None;
        };
        if !inlinable {
            return None;
        }

        let handle = Handle::new(self.engine.clone(), InvocationState::default(), CancellationToken::new());
        let call = call_operator(name, operator, Input::Evaluated(input.clone()), Scope::new(Value::Null), handle);
        match call.now_or_never() {
            Some(Ok(Evaluation::Done(value))) => Some(value),
            Some(Err(err)) => {
                // Left in place so the failure surfaces when the program runs
                tracing::trace!(operator = name, error = %err, "skipping inline of failing call");
                None
            }
            _ => None,
        }
    }
}

/* ===================== Execution ===================== */

fn execute(node: CompiledNode, scope: Scope, handle: Handle) -> BoxFuture<'static, Result<Evaluation>> {
    async move {
        handle.check_cancelled()?;

        match node {
            CompiledNode::Literal(value) => Ok(Evaluation::Done(value)),

            CompiledNode::Sequence(items) => {
                let results = try_join_all(
                    items
                        .iter()
                        .map(|item| execute(item.clone(), scope.clone(), handle.clone())),
                )
                .await?;
                Ok(Evaluation::join(results))
            }

            CompiledNode::Call {
                name,
                operator,
                args,
                raw,
            } => {
                let input = match execute((*args).clone(), scope.clone(), handle.clone()).await? {
                    Evaluation::Done(value) => Input::Evaluated(value),
                    Evaluation::Suspended(suspension) => {
                        return Ok(Evaluation::Suspended(suspension.within_call(&name, raw.to_value())));
                    }
                };
                call_operator(&name, &operator, input, scope, handle).await
            }

            CompiledNode::Opaque { name, operator, raw } => {
                call_operator(&name, &operator, Input::Raw(raw), scope, handle).await
            }
        }
    }
    .boxed()
}

/* ===================== Programs ===================== */

/// A compiled logic tree bound to its engine
pub struct CompiledProgram {
    root: CompiledNode,
    kind: ProgramKind,
    stateful: bool,
    fingerprint: String,
    engine: Engine,
    above: Vec<Value>,
}

impl CompiledProgram {
    pub fn kind(&self) -> ProgramKind {
        self.kind
    }

    /// True when some operator keeps per-invocation state
    pub fn is_stateful(&self) -> bool {
        self.stateful
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn root(&self) -> &CompiledNode {
        &self.root
    }

    /// Call with a fresh invocation state
    pub async fn call(&self, data: Value) -> Result<Evaluation> {
        self.call_in(data, InvocationState::default(), CancellationToken::new())
            .await
    }

    pub(crate) async fn call_in(&self, data: Value, state: InvocationState, cancel: CancellationToken) -> Result<Evaluation> {
        let scope = Scope::with_above(data, self.above.clone());
        let handle = Handle::new(self.engine.clone(), state, cancel);
        execute(self.root.clone(), scope, handle).await
    }

    /// Run a sync program to completion on the current thread
    pub fn call_sync(&self, data: Value) -> Result<Evaluation> {
        if self.kind == ProgramKind::Async {
            return Err(EngineError::NotSynchronous);
        }
        self.call_in(data, InvocationState::default(), CancellationToken::new())
            .now_or_never()
            .unwrap_or(Err(EngineError::NotSynchronous))
    }
}

impl fmt::Debug for CompiledProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledProgram")
            .field("kind", &self.kind)
            .field("stateful", &self.stateful)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// One poolable copy of a program with its own state bag
pub struct Instance {
    program: Arc<CompiledProgram>,
    state: InvocationState,
}

impl Instance {
    pub fn new(program: Arc<CompiledProgram>) -> Self {
        Self {
            program,
            state: InvocationState::default(),
        }
    }

    pub fn state(&self) -> &InvocationState {
        &self.state
    }

    /// Invoke with this instance's state, emptied first
    pub async fn call(&mut self, data: Value, cancel: CancellationToken) -> Result<Evaluation> {
        self.state.clear();
        self.program.call_in(data, self.state.clone(), cancel).await
    }
}

/// What [`Engine::build`] hands back
pub enum Program {
    /// Safe to call concurrently
    Direct(Arc<CompiledProgram>),
    /// Every call checks out its own instance
    Pooled {
        program: Arc<CompiledProgram>,
        pool: Pool<Instance>,
    },
}

impl Program {
    pub fn program(&self) -> &Arc<CompiledProgram> {
        match self {
            Program::Direct(program) => program,
            Program::Pooled { program, .. } => program,
        }
    }

    pub fn kind(&self) -> ProgramKind {
        self.program().kind()
    }

    pub fn fingerprint(&self) -> &str {
        self.program().fingerprint()
    }

    pub fn is_pooled(&self) -> bool {
        matches!(self, Program::Pooled { .. })
    }

    pub fn pool(&self) -> Option<&Pool<Instance>> {
        match self {
            Program::Direct(_) => None,
            Program::Pooled { pool, .. } => Some(pool),
        }
    }

    pub async fn call(&self, data: Value) -> Result<Evaluation> {
        self.call_with(data, None).await
    }

    pub async fn call_with(&self, data: Value, cancel: Option<CancellationToken>) -> Result<Evaluation> {
        let cancel = cancel.unwrap_or_default();
        match self {
            Program::Direct(program) => program.call_in(data, InvocationState::default(), cancel).await,
            Program::Pooled { pool, .. } => pool.invoke(data, cancel).await,
        }
    }

    pub fn call_sync(&self, data: Value) -> Result<Evaluation> {
        self.program().call_sync(data)
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Program::Direct(program) => f.debug_tuple("Direct").field(program).finish(),
            Program::Pooled { program, pool } => f
                .debug_struct("Pooled")
                .field("program", program)
                .field("checked_out", &pool.checked_out())
                .field("idle", &pool.idle())
                .finish(),
        }
    }
}
