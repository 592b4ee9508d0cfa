//! Backend-neutral predicates produced by compiling a query.
//!
//! Text and enum values compare ignoring case. Like-patterns use `%` for
//! any run of characters, `_` for one character, and `\` to escape either.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;

/// Wildcard a backend like-pattern uses for "any run of characters".
pub const LIKE_WILDCARD: char = '%';

/// A typed comparison value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Text(String),
    Number(f64),
    Boolean(bool),
    /// Canonical enum constant
    Enum(String),
}

impl Value {
    /// String form used for text comparison and like-matching.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Value::Text(s) | Value::Enum(s) => Cow::Borrowed(s),
            Value::Number(n) => Cow::Owned(n.to_string()),
            Value::Boolean(b) => Cow::Owned(b.to_string()),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Number(n) => write!(f, "{}", n),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Enum(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    pub fn name(self) -> &'static str {
        match self {
            CompareOp::Eq => "EQ",
            CompareOp::Ne => "NE",
            CompareOp::Gt => "GT",
            CompareOp::Ge => "GE",
            CompareOp::Lt => "LT",
            CompareOp::Le => "LE",
        }
    }
}

/// A compiled, backend-neutral filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Matches everything
    True,
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Compare {
        path: String,
        op: CompareOp,
        value: Value,
    },
    /// Case-insensitive like-match
    Like {
        path: String,
        pattern: String,
        negated: bool,
    },
    In {
        path: String,
        values: Vec<Value>,
        negated: bool,
    },
    /// The record holds a value at `path`
    Exists(String),
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::True => write!(f, "TRUE"),
            Predicate::And(children) => write_list(f, "AND", children),
            Predicate::Or(children) => write_list(f, "OR", children),
            Predicate::Compare { path, op, value } => write!(f, "{}({}, {})", op.name(), path, value),
            Predicate::Exists(path) => write!(f, "EXISTS({})", path),
            Predicate::Like {
                path,
                pattern,
                negated,
            } => {
                let name = if *negated { "NOT_LIKE" } else { "LIKE" };
                write!(f, "{}({}, {:?})", name, path, pattern)
            }
            Predicate::In {
                path,
                values,
                negated,
            } => {
                let name = if *negated { "NOT_IN" } else { "IN" };
                write!(f, "{}({}, [", name, path)?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "])")
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, name: &str, children: &[Predicate]) -> fmt::Result {
    write!(f, "{}(", name)?;
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", child)?;
    }
    write!(f, ")")
}

/// An entity whose fields a predicate can be evaluated against.
pub trait Record {
    /// Value at a resolved backend path.
    fn value(&self, path: &str) -> Option<Value>;
}

impl Record for HashMap<String, Value> {
    fn value(&self, path: &str) -> Option<Value> {
        self.get(path).cloned()
    }
}

impl Record for BTreeMap<String, Value> {
    fn value(&self, path: &str) -> Option<Value> {
        self.get(path).cloned()
    }
}

impl Predicate {
    /// Evaluate against one record.
    ///
    /// A missing field fails every positive comparison and passes every
    /// negated one (`NE`, `NOT_LIKE`, `NOT_IN`), like a SQL `IS NULL OR ...`.
    /// Map keys are guarded with [`Predicate::Exists`] by the compiler.
    pub fn matches<R: Record + ?Sized>(&self, record: &R) -> bool {
        match self {
            Predicate::True => true,
            Predicate::And(children) => children.iter().all(|p| p.matches(record)),
            Predicate::Or(children) => children.is_empty() || children.iter().any(|p| p.matches(record)),
            Predicate::Compare { path, op, value } => {
                let Some(actual) = record.value(path) else {
                    return *op == CompareOp::Ne;
                };
                match op {
                    CompareOp::Eq => values_equal(&actual, value),
                    CompareOp::Ne => !values_equal(&actual, value),
                    CompareOp::Gt => compare(&actual, value) == Some(Ordering::Greater),
                    CompareOp::Ge => matches!(compare(&actual, value), Some(Ordering::Greater | Ordering::Equal)),
                    CompareOp::Lt => compare(&actual, value) == Some(Ordering::Less),
                    CompareOp::Le => matches!(compare(&actual, value), Some(Ordering::Less | Ordering::Equal)),
                }
            }
            Predicate::Like {
                path,
                pattern,
                negated,
            } => match record.value(path) {
                Some(actual) => like_matches(pattern, &actual.as_text()) != *negated,
                None => *negated,
            },
            Predicate::In {
                path,
                values,
                negated,
            } => match record.value(path) {
                Some(actual) => values.iter().any(|v| values_equal(&actual, v)) != *negated,
                None => *negated,
            },
            Predicate::Exists(path) => record.value(path).is_some(),
        }
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::Boolean(a), Value::Boolean(b)) => a == b,
        (Value::Boolean(_), _) | (_, Value::Boolean(_)) => {
            actual.as_text().eq_ignore_ascii_case(&expected.as_text())
        }
        _ => match (actual.as_number(), expected.as_number()) {
            (Some(a), Some(b)) if matches!(actual, Value::Number(_)) || matches!(expected, Value::Number(_)) => a == b,
            _ => actual.as_text().to_lowercase() == expected.as_text().to_lowercase(),
        },
    }
}

/// Numeric when both sides read as numbers, lexical otherwise.
fn compare(actual: &Value, expected: &Value) -> Option<Ordering> {
    match (actual.as_number(), expected.as_number()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => Some(actual.as_text().as_ref().cmp(expected.as_text().as_ref())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PatternPart {
    Literal(char),
    AnyOne,
    AnyRun,
}

fn compile_like(pattern: &str) -> Vec<PatternPart> {
    let mut parts = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        let part = match c {
            '\\' => PatternPart::Literal(chars.next().unwrap_or('\\')),
            LIKE_WILDCARD => PatternPart::AnyRun,
            '_' => PatternPart::AnyOne,
            c => PatternPart::Literal(c),
        };
        parts.push(part);
    }
    parts
}

/// Case-insensitive like-match of `text` against a backend pattern.
pub fn like_matches(pattern: &str, text: &str) -> bool {
    let parts = compile_like(&pattern.to_lowercase());
    let text: Vec<char> = text.to_lowercase().chars().collect();

    let (mut p, mut t) = (0, 0);
    // Position after the last AnyRun and the text index it resumed from
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match parts.get(p) {
            Some(PatternPart::AnyRun) => {
                p += 1;
                backtrack = Some((p, t));
            }
            Some(PatternPart::AnyOne) => {
                p += 1;
                t += 1;
            }
            Some(PatternPart::Literal(c)) if *c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((bp, bt)) => {
                    p = bp;
                    t = bt + 1;
                    backtrack = Some((bp, bt + 1));
                }
                None => return false,
            },
        }
    }
    parts[p..].iter().all(|part| *part == PatternPart::AnyRun)
}
