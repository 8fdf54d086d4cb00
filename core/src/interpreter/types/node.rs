//! Logic tree node types
//!
//! A logic tree arrives as plain JSON. It is normalized once, at parse time, into
//! a [`LogicNode`] so operator dispatch never has to re-read mapping keys.

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::{EngineError, Result};

/// Parsed logic tree node
///
/// Children are reference counted so raw argument trees can be handed to
/// operators without copying them.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicNode {
    /// Any value that is neither a sequence nor a single-key mapping.
    /// Returned unchanged by evaluation, even if it contains operation-shaped data.
    Literal(Value),

    /// Elements evaluated concurrently, joined in order
    Sequence(Arc<[LogicNode]>),

    /// `{name: args}`
    Operation { name: Arc<str>, args: Arc<LogicNode> },
}

impl LogicNode {
    /// Normalize a JSON logic tree
    ///
    /// Only mappings with exactly one key are operations. Empty and multi-key
    /// mappings are literals.
    pub fn parse(value: &Value) -> LogicNode {
        match value {
            Value::Array(items) => LogicNode::Sequence(items.iter().map(LogicNode::parse).collect()),
            Value::Object(map) => match (map.len(), map.iter().next()) {
                (1, Some((name, args))) => LogicNode::Operation {
                    name: Arc::from(name.as_str()),
                    args: Arc::new(LogicNode::parse(args)),
                },
                _ => LogicNode::Literal(value.clone()),
            },
            other => LogicNode::Literal(other.clone()),
        }
    }

    /// Like [`LogicNode::parse`], but fails with [`EngineError::NestingTooDeep`]
    /// once a node sits deeper than `limit`
    ///
    /// Depth counts the same way the compiler does: an operation's argument
    /// node and each sequence element are one level below their parent.
    pub fn parse_bounded(value: &Value, limit: usize) -> Result<LogicNode> {
        parse_at(value, 0, limit)
    }

    pub fn literal(value: impl Into<Value>) -> LogicNode {
        LogicNode::Literal(value.into())
    }

    /// Rebuild the JSON form of this node
    ///
    /// Lossless for parsed trees: `LogicNode::parse(v).to_value() == v`.
    pub fn to_value(&self) -> Value {
        match self {
            LogicNode::Literal(value) => value.clone(),
            LogicNode::Sequence(items) => Value::Array(items.iter().map(LogicNode::to_value).collect()),
            LogicNode::Operation { name, args } => {
                let mut map = Map::with_capacity(1);
                map.insert(name.to_string(), args.to_value());
                Value::Object(map)
            }
        }
    }

    /// Argument list view of an operator's raw argument node
    ///
    /// `{"if": [a, b, c]}` has three arguments, `{"!": x}` has one.
    pub fn arguments(&self) -> &[LogicNode] {
        match self {
            LogicNode::Sequence(items) => &items[..],
            other => std::slice::from_ref(other),
        }
    }

    pub fn operator_name(&self) -> Option<&str> {
        match self {
            LogicNode::Operation { name, .. } => Some(&**name),
            _ => None,
        }
    }

    /// True when evaluating this node cannot run any operator
    pub fn is_constant(&self) -> bool {
        match self {
            LogicNode::Literal(_) => true,
            LogicNode::Sequence(items) => items.iter().all(LogicNode::is_constant),
            LogicNode::Operation { .. } => false,
        }
    }
}

fn parse_at(value: &Value, depth: usize, limit: usize) -> Result<LogicNode> {
    if depth > limit {
        return Err(EngineError::NestingTooDeep { limit });
    }

    match value {
        Value::Array(items) => {
            let items = items
                .iter()
                .map(|item| parse_at(item, depth + 1, limit))
                .collect::<Result<Vec<_>>>()?;
            Ok(LogicNode::Sequence(items.into()))
        }
        Value::Object(map) => match (map.len(), map.iter().next()) {
            (1, Some((name, args))) => Ok(LogicNode::Operation {
                name: Arc::from(name.as_str()),
                args: Arc::new(parse_at(args, depth + 1, limit)?),
            }),
            _ => Ok(LogicNode::Literal(value.clone())),
        },
        other => Ok(LogicNode::Literal(other.clone())),
    }
}

impl From<&Value> for LogicNode {
    fn from(value: &Value) -> Self {
        LogicNode::parse(value)
    }
}

impl From<Value> for LogicNode {
    fn from(value: Value) -> Self {
        LogicNode::parse(&value)
    }
}
