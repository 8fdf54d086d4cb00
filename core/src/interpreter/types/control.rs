//! Evaluation results and suspension state

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::node::LogicNode;
use crate::error::{EngineError, Result};

/* ===================== Evaluation ===================== */

/// Outcome of evaluating a node
///
/// Every evaluation step returns one of these. Callers pattern-match instead of
/// probing values for a sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Evaluation {
    Done(Value),
    Suspended(Suspension),
}

impl Evaluation {
    pub fn is_suspended(&self) -> bool {
        matches!(self, Evaluation::Suspended(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Evaluation::Done(value) => Some(value),
            Evaluation::Suspended(_) => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Evaluation::Done(value) => Some(value),
            Evaluation::Suspended(_) => None,
        }
    }

    pub fn suspension(&self) -> Option<&Suspension> {
        match self {
            Evaluation::Done(_) => None,
            Evaluation::Suspended(suspension) => Some(suspension),
        }
    }

    /// Fan-in join of a sequence, in input order
    ///
    /// If any slot suspended, the whole sequence becomes one aggregate
    /// suspension that keeps the completed slots as frozen values.
    pub fn join(results: Vec<Evaluation>) -> Evaluation {
        if !results.iter().any(Evaluation::is_suspended) {
            return Evaluation::Done(Value::Array(
                results.into_iter().filter_map(Evaluation::into_value).collect(),
            ));
        }

        let items = results
            .into_iter()
            .map(Partial::from)
            .collect();

        Evaluation::Suspended(Suspension {
            root: Partial::Sequence { items },
        })
    }
}

impl From<Value> for Evaluation {
    fn from(value: Value) -> Self {
        Evaluation::Done(value)
    }
}

/* ===================== Suspension ===================== */

/// A paused evaluation
///
/// Holds the partially evaluated tree: completed results, the points where an
/// operator yielded, and the calls waiting on them. Serializable so a caller can
/// store it and resume later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suspension {
    root: Partial,
}

/// Partially evaluated node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Partial {
    /// Completed result, never re-evaluated
    Done { value: Value },

    /// Where an operator yielded
    Point(SuspendPoint),

    /// Sequence with at least one suspended slot
    Sequence { items: Vec<Partial> },

    /// Logic not evaluated yet
    Pending { logic: Value },

    /// Operator whose arguments suspended. It has not run yet.
    Call {
        operator: String,
        /// Raw, unevaluated argument tree
        input: Value,
        args: Box<Partial>,
    },
}

impl Partial {
    pub(crate) fn pending(node: &LogicNode) -> Partial {
        Partial::Pending {
            logic: node.to_value(),
        }
    }
}

impl From<Evaluation> for Partial {
    fn from(evaluation: Evaluation) -> Self {
        match evaluation {
            Evaluation::Done(value) => Partial::Done { value },
            Evaluation::Suspended(suspension) => suspension.root,
        }
    }
}

/// One suspended operator invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspendPoint {
    pub id: Uuid,
    pub operator: String,
    /// Input the operator received (evaluated, or raw for non-traversing operators)
    pub input: Value,
    /// Value the operator yielded to explain what it is waiting for
    pub reason: Value,
}

impl Suspension {
    pub(crate) fn point(operator: &str, input: Value, reason: Value) -> Self {
        Self {
            root: Partial::Point(SuspendPoint {
                id: Uuid::new_v4(),
                operator: operator.to_string(),
                input,
                reason,
            }),
        }
    }

    /// Record that `operator` was waiting on this suspension for its arguments
    pub(crate) fn within_call(self, operator: &str, input: Value) -> Self {
        Self {
            root: Partial::Call {
                operator: operator.to_string(),
                input,
                args: Box::new(self.root),
            },
        }
    }

    /// Suspension of a non-traversing `operator` while it evaluated its own
    /// arguments; `args` is the argument list to hand it again on resume
    pub(crate) fn call(operator: &str, input: Value, args: Vec<Partial>) -> Self {
        Self {
            root: Partial::Call {
                operator: operator.to_string(),
                input,
                args: Box::new(Partial::Sequence { items: args }),
            },
        }
    }

    /// Collapse into a single point standing for the whole `operator` node
    ///
    /// Used by folds, which cannot restart halfway. The first inner point's id
    /// and reason are kept so the caller still sees what is awaited.
    pub(crate) fn collapse(self, operator: &str, input: Value) -> Self {
        let (id, reason) = match self.first_point() {
            Some(point) => (point.id, point.reason.clone()),
            None => (Uuid::new_v4(), Value::Null),
        };
        Self {
            root: Partial::Point(SuspendPoint {
                id,
                operator: operator.to_string(),
                input,
                reason,
            }),
        }
    }

    pub fn root(&self) -> &Partial {
        &self.root
    }

    /// All suspension points, depth first, left to right
    pub fn points(&self) -> Vec<&SuspendPoint> {
        fn collect<'a>(partial: &'a Partial, out: &mut Vec<&'a SuspendPoint>) {
            match partial {
                Partial::Done { .. } | Partial::Pending { .. } => {}
                Partial::Point(point) => out.push(point),
                Partial::Sequence { items } => items.iter().for_each(|item| collect(item, out)),
                Partial::Call { args, .. } => collect(args, out),
            }
        }

        let mut points = Vec::new();
        collect(&self.root, &mut points);
        points
    }

    pub fn first_point(&self) -> Option<&SuspendPoint> {
        self.points().into_iter().next()
    }

    /// Name of the operator active at the (first) suspension point
    pub fn operator(&self) -> Option<&str> {
        self.first_point().map(|point| point.operator.as_str())
    }

    /// Partial results of an aggregate sequence suspension
    ///
    /// Completed slots are `Some`, suspended slots are `None`. Returns `None`
    /// when the suspension is not rooted at a sequence.
    pub fn partial_results(&self) -> Option<Vec<Option<Value>>> {
        match &self.root {
            Partial::Sequence { items } => Some(
                items
                    .iter()
                    .map(|item| match item {
                        Partial::Done { value } => Some(value.clone()),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Build the logic that continues this evaluation
    ///
    /// Each suspension point is replaced by the value supplied for its id, and
    /// completed results become literals. Operators that already ran never
    /// appear in the result, so resuming cannot execute them twice.
    pub fn to_logic(&self, replacements: &HashMap<Uuid, Value>) -> Result<LogicNode> {
        let mut used = 0;
        let node = rebuild(&self.root, replacements, &mut used)?;
        if used != replacements.len() {
            return Err(EngineError::Resume(format!(
                "{} replacement(s) do not match any suspension point",
                replacements.len() - used
            )));
        }
        Ok(node)
    }
}

fn rebuild(partial: &Partial, replacements: &HashMap<Uuid, Value>, used: &mut usize) -> Result<LogicNode> {
    match partial {
        Partial::Done { value } => Ok(LogicNode::Literal(value.clone())),
        Partial::Pending { logic } => Ok(LogicNode::parse(logic)),
        Partial::Point(point) => {
            let value = replacements.get(&point.id).ok_or_else(|| {
                EngineError::Resume(format!(
                    "no value supplied for suspension point {} ({})",
                    point.id, point.operator
                ))
            })?;
            *used += 1;
            Ok(LogicNode::Literal(value.clone()))
        }
        Partial::Sequence { items } => Ok(LogicNode::Sequence(
            items
                .iter()
                .map(|item| rebuild(item, replacements, used))
                .collect::<Result<Vec<_>>>()?
                .into(),
        )),
        Partial::Call { operator, args, .. } => Ok(LogicNode::Operation {
            name: Arc::from(operator.as_str()),
            args: Arc::new(rebuild(args, replacements, used)?),
        }),
    }
}
