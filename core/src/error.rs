//! Error types for the logic engine
//!
//! Every failure raised while parsing, compiling, resolving or evaluating logic
//! surfaces as an [`EngineError`]. The kind is always preserved on the way up to
//! the caller of `run`, `build` or a pooled invocation.

use thiserror::Error;

/// Boxed cause carried by [`EngineError::OperatorExecution`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("unknown operator: {0}")]
    UnknownOperator(String),

    #[error("path {path:?} attempts to reach reserved field {field:?}")]
    PathSecurity { path: String, field: String },

    #[error("scope is read-only: cannot write {path:?}")]
    Mutation { path: String },

    #[error("operator {operator} failed: {source}")]
    OperatorExecution {
        operator: String,
        #[source]
        source: BoxError,
    },

    #[error("invalid arguments for {operator}: {message}")]
    InvalidArguments { operator: String, message: String },

    #[error("operator {operator} suspended but suspension tracking is disabled")]
    SuspensionDisabled { operator: String },

    #[error("cannot resume: {0}")]
    Resume(String),

    #[error("evaluation awaited an asynchronous operator in a synchronous context")]
    NotSynchronous,

    #[error("logic nested deeper than {limit} levels")]
    NestingTooDeep { limit: usize },

    #[error("evaluation cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn invalid_arguments(operator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            operator: operator.into(),
            message: message.into(),
        }
    }

    pub fn operator_failed(operator: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::OperatorExecution {
            operator: operator.into(),
            source: source.into(),
        }
    }

    /// Attribute an anonymous operator failure to the operator that raised it
    ///
    /// Failures converted from `anyhow::Error` inside an operator body do not
    /// know which name the operator was registered under; the interpreter fills
    /// it in on the way out. Every other kind passes through untouched.
    pub(crate) fn within(self, name: &str) -> Self {
        match self {
            Self::OperatorExecution { operator, source } if operator.is_empty() => {
                Self::OperatorExecution {
                    operator: name.to_string(),
                    source,
                }
            }
            other => other,
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        Self::OperatorExecution {
            operator: String::new(),
            source: err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_names_anonymous_failures() {
        let err: EngineError = anyhow::anyhow!("disk on fire").into();
        match err.within("fetch") {
            EngineError::OperatorExecution { operator, source } => {
                assert_eq!(operator, "fetch");
                assert_eq!(source.to_string(), "disk on fire");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_within_keeps_other_kinds() {
        let err = EngineError::UnknownOperator("nope".into()).within("fetch");
        assert!(matches!(err, EngineError::UnknownOperator(name) if name == "nope"));

        let err = EngineError::operator_failed("inner", anyhow::anyhow!("boom")).within("outer");
        assert!(matches!(err, EngineError::OperatorExecution { operator, .. } if operator == "inner"));
    }
}
