//! Asynchronous declarative-logic engine
//!
//! Evaluates `{"operator": [args...]}` trees against JSON data, with
//! pluggable sync and async operators, suspend/resume for operators that
//! cannot finish yet, and ahead-of-time compilation into reusable programs.
//!
//! ```
//! use serde_json::json;
//! use verdict_core::{Engine, EngineOptions, RunOptions};
//!
//! # tokio_test::block_on(async {
//! let engine = Engine::with_builtins(EngineOptions::default());
//! let result = engine
//!     .run(&json!({"+": [1, {"var": "a"}]}), json!({"a": 2}), RunOptions::default())
//!     .await?;
//! assert_eq!(result.into_value(), Some(json!(3)));
//! # Ok::<(), verdict_core::EngineError>(())
//! # })?;
//! # Ok::<(), verdict_core::EngineError>(())
//! ```

pub mod cli;
pub mod compiler;
pub mod config;
pub mod error;
pub mod interpreter;
pub mod pool;
pub mod stdlib;

pub use compiler::{BuildOptions, CompiledProgram, Program, ProgramKind};
pub use config::EngineOptions;
pub use error::{EngineError, Result};
pub use interpreter::{
    Annotations, Engine, Evaluation, Handle, Implementation, Input, LogicNode, OperatorRegistry, Output, RunOptions,
    Scope, Suspension,
};
