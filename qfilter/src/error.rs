//! Error types for filter query operations.

use crate::query::Operator;

/// A syntax error in an RSQL query.
///
/// `position` is the 0-based character offset of the first offending
/// character, or the query length when input ended too early.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("syntax error at position {position}: {message}")]
pub struct ParseError {
    pub position: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

/// Failure to resolve a query selector against a field schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("unknown entity type '{0}'")]
    UnknownEntity(String),

    #[error("unknown field '{segment}', expected one of: {}", .allowed.join(", "))]
    UnknownField { segment: String, allowed: Vec<String> },

    #[error("field '{path}' needs a sub-field, expected one of: {}", .allowed.join(", "))]
    MissingSubField { path: String, allowed: Vec<String> },

    #[error("field '{segment}' has no sub-fields")]
    NotNavigable { segment: String },
}

/// Failure to turn a parsed query into a predicate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Field(#[from] FieldError),

    #[error("invalid value '{value}' for field '{field}'{}", allowed_suffix(.allowed))]
    InvalidValue {
        field: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("operator '{operator}' cannot be applied to field '{field}'")]
    UnsupportedOperator { field: String, operator: Operator },

    #[error("operator '{operator}' takes exactly one argument, got {count}")]
    Arity { operator: Operator, count: usize },
}

fn allowed_suffix(allowed: &[String]) -> String {
    if allowed.is_empty() {
        String::new()
    } else {
        format!(", expected one of: {}", allowed.join(", "))
    }
}

/// Failure to parse a polling interval specification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntervalError {
    #[error("empty polling specification")]
    Empty,

    #[error("invalid duration '{0}', expected HH:mm:ss or ISO-8601")]
    InvalidDuration(String),

    #[error("invalid deviation in '{0}', expected ~N% with N between 0 and 99")]
    InvalidDeviation(String),

    #[error("invalid polling override '{0}', expected '<query> -> <interval>'")]
    InvalidOverride(String),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Interval(#[from] IntervalError),
}

pub type Result<T> = std::result::Result<T, Error>;
