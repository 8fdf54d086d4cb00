//! Scoped context resolution
//!
//! A [`Scope`] is a read-only view of some data plus an optional enclosing
//! scope. Variable paths are resolved against it:
//!
//! - `""` is the whole scope data
//! - each leading `../` walks one parent link (stopping at the outermost scope)
//! - the remainder is a dotted list of object keys / array indices
//!
//! Child scopes for visited sub-structures are created lazily while walking a
//! path and share the root allocation, so resolution costs O(path depth).

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::error::{EngineError, Result};

/// Field no path may ever traverse
pub const META_FIELD: &str = "__proto__";

/// Prefix that walks one scope up
pub const PARENT_PREFIX: &str = "../";

static NULL: Value = Value::Null;

#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    /// Shared by every scope created by descending into this data
    root: Arc<Value>,
    /// Last key on the way from `root` to this scope's data
    key: Option<Arc<KeyPath>>,
    parent: Option<Scope>,
}

/// Keys from a root to a sub-structure, last key first
///
/// Descending shares the prefix instead of copying it.
struct KeyPath {
    key: String,
    prev: Option<Arc<KeyPath>>,
}

impl Scope {
    pub fn new(data: Value) -> Scope {
        Scope::build(Arc::new(data), None, None)
    }

    /// Scope for `data` enclosed by `above`, nearest enclosing data first
    pub fn with_above(data: Value, above: Vec<Value>) -> Scope {
        let parent = above
            .into_iter()
            .rev()
            .fold(None, |parent, value| Some(Scope::build(Arc::new(value), None, parent)));
        Scope::build(Arc::new(data), None, parent)
    }

    /// New scope for unrelated data whose parent is this scope
    pub fn child(&self, data: Value) -> Scope {
        Scope::build(Arc::new(data), None, Some(self.clone()))
    }

    fn build(root: Arc<Value>, key: Option<Arc<KeyPath>>, parent: Option<Scope>) -> Scope {
        Scope {
            inner: Arc::new(ScopeInner { root, key, parent }),
        }
    }

    /// Wrap the sub-structure under `key` without copying it
    fn descend(&self, key: &str) -> Scope {
        let path = KeyPath {
            key: key.to_string(),
            prev: self.inner.key.clone(),
        };
        Scope::build(self.inner.root.clone(), Some(Arc::new(path)), Some(self.clone()))
    }

    pub fn data(&self) -> &Value {
        let mut keys = Vec::new();
        let mut link = self.inner.key.as_deref();
        while let Some(path) = link {
            keys.push(path.key.as_str());
            link = path.prev.as_deref();
        }

        let mut current: &Value = &self.inner.root;
        for key in keys.into_iter().rev() {
            match step(current, key) {
                Some(next) => current = next,
                None => return &NULL,
            }
        }
        current
    }

    pub fn parent(&self) -> Option<&Scope> {
        self.inner.parent.as_ref()
    }

    /// Number of enclosing scopes
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.parent();
        while let Some(scope) = current {
            depth += 1;
            current = scope.parent();
        }
        depth
    }

    /// Resolve `path` to the scope wrapping the value it names
    ///
    /// Returns `Ok(None)` when a field along the path is missing. Fails with
    /// [`EngineError::PathSecurity`] if any segment names [`META_FIELD`],
    /// whether or not the data actually contains it.
    pub fn lookup(&self, path: &str) -> Result<Option<Scope>> {
        let mut current = self.clone();
        let mut rest = path;
        while let Some(stripped) = rest.strip_prefix(PARENT_PREFIX) {
            if let Some(parent) = current.parent() {
                current = parent.clone();
            }
            rest = stripped;
        }

        if rest.is_empty() {
            return Ok(Some(current));
        }

        if rest.split('.').any(|segment| segment == META_FIELD) {
            tracing::warn!(path, "blocked path reaching reserved field");
            return Err(EngineError::PathSecurity {
                path: path.to_string(),
                field: META_FIELD.to_string(),
            });
        }

        // Walk values by reference alongside the scopes; `anchor` keeps the
        // shared root borrowed while `current` moves down
        let anchor = current.clone();
        let mut value = anchor.data();
        for segment in rest.split('.') {
            match step(value, segment) {
                Some(next) => value = next,
                None => return Ok(None),
            }
            current = current.descend(segment);
        }

        Ok(Some(current))
    }

    /// Resolve `path` to an owned value, `null` when missing
    pub fn resolve(&self, path: &str) -> Result<Value> {
        Ok(self
            .lookup(path)?
            .map(|scope| scope.data().clone())
            .unwrap_or(Value::Null))
    }

    /// Scopes are read-only; every write is rejected
    pub fn set(&self, path: &str, _value: Value) -> Result<()> {
        Err(EngineError::Mutation {
            path: path.to_string(),
        })
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("data", self.data())
            .field("depth", &self.depth())
            .finish()
    }
}

fn step<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|idx| items.get(idx)),
        _ => None,
    }
}
