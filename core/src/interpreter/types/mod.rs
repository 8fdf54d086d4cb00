//! Type definitions for the interpreter
//!
//! - Logic tree nodes (`LogicNode`)
//! - Evaluation results and suspension state (`Evaluation`, `Suspension`)

pub mod control;
pub mod node;

pub use control::{Evaluation, Partial, SuspendPoint, Suspension};
pub use node::LogicNode;
