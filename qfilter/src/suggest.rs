//! Validation and completion for partially typed queries.
//!
//! A cursor of `-1` asks for strict validation only. Any other cursor asks
//! what could be typed at that position: field names, operators that apply
//! to the field, enum or boolean values, or `and`/`or` after a complete
//! comparison.

use serde::Serialize;

use crate::compile::compile;
use crate::macros::{expand, placeholder_stand_in};
use crate::query::{parse, parse_tolerant, Operator, Parsed, Role, TokenKind};
use crate::schema::{FieldSchema, ValueKind};

/// One completion: replace `[start, end)` (holding `typed`) with `suggestion`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuggestToken {
    pub start: usize,
    pub end: usize,
    pub typed: String,
    pub suggestion: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Valid,
    /// `position` is `-1` when the problem is not tied to a location
    SyntaxError { position: i64, message: String },
    Suggestions {
        query: String,
        cursor: i64,
        tokens: Vec<SuggestToken>,
    },
}

/// The surface a query editor talks to.
pub trait ValidationOracle {
    fn suggest(&self, query: &str, cursor: i64) -> ValidationOutcome;
}

/// Oracle backed by a field schema for one entity type.
#[derive(Debug, Clone)]
pub struct SchemaOracle<'a> {
    schema: &'a FieldSchema,
    entity_type: String,
}

/// What is being typed at the cursor.
#[derive(Debug)]
struct Context {
    start: usize,
    end: usize,
    typed: String,
    role: Role,
}

impl<'a> SchemaOracle<'a> {
    pub fn new(schema: &'a FieldSchema, entity_type: impl Into<String>) -> Self {
        Self {
            schema,
            entity_type: entity_type.into(),
        }
    }

    /// Strict validation: syntax, then fields and values.
    ///
    /// Builtin placeholders in arguments validate as numeric timestamps.
    pub fn validate(&self, query: &str) -> ValidationOutcome {
        let node = match parse(query) {
            Ok(node) => node,
            Err(e) => {
                return ValidationOutcome::SyntaxError {
                    position: e.position as i64,
                    message: e.message,
                }
            }
        };
        let node = node.map_arguments(&|arg: &str| {
            if arg.contains('$') {
                expand(arg, placeholder_stand_in)
            } else {
                arg.to_string()
            }
        });
        match compile(&node, self.schema, &self.entity_type) {
            Ok(_) => ValidationOutcome::Valid,
            Err(e) => ValidationOutcome::SyntaxError {
                position: -1,
                message: e.to_string(),
            },
        }
    }

    fn context_at(&self, parsed: &Parsed, cursor: usize) -> Option<Context> {
        let touching = parsed
            .tokens
            .iter()
            .enumerate()
            .find(|(_, t)| t.start < cursor && cursor <= t.end);

        if let Some((index, token)) = touching {
            if let Some(text) = token.kind.text() {
                return Some(Context {
                    start: token.start,
                    end: token.end,
                    typed: text.to_string(),
                    role: parsed.role_at(index)?.clone(),
                });
            }
            // Operators and punctuation only complete what follows them
            if cursor < token.end || matches!(token.kind, TokenKind::RParen) {
                return None;
            }
        }

        let next = parsed
            .tokens
            .iter()
            .position(|t| t.start >= cursor)
            .unwrap_or(parsed.tokens.len());
        Some(Context {
            start: cursor,
            end: cursor,
            typed: String::new(),
            role: parsed.role_at(next)?.clone(),
        })
    }

    fn candidates(&self, context: &Context) -> Vec<String> {
        let typed = context.typed.to_ascii_lowercase();
        let matching = |candidates: Vec<String>| -> Vec<String> {
            candidates
                .into_iter()
                .filter(|c| c.to_ascii_lowercase().starts_with(&typed))
                .collect()
        };

        match &context.role {
            Role::Selector => {
                let mut out = matching(self.schema.selectors(&self.entity_type));
                out.sort_by_key(|s| (!s.eq_ignore_ascii_case(&typed), s.to_ascii_lowercase()));
                out.dedup();
                out
            }
            Role::Operator { selector } => match self.schema.resolve(&self.entity_type, selector) {
                Ok(field) => matching(
                    Operator::ALL
                        .into_iter()
                        .filter(|op| operator_applies(&field.value_kind, *op))
                        .map(|op| op.symbol().to_string())
                        .collect(),
                ),
                Err(_) => Vec::new(),
            },
            Role::Argument { selector, .. } => match self.schema.resolve(&self.entity_type, selector) {
                Ok(field) => match field.value_kind {
                    ValueKind::Enum(values) => matching(values),
                    ValueKind::Boolean => matching(vec!["true".to_string(), "false".to_string()]),
                    _ => Vec::new(),
                },
                Err(_) => Vec::new(),
            },
            Role::Connective => matching(vec!["and".to_string(), "or".to_string()]),
        }
    }
}

/// Operators worth offering for a field kind.
fn operator_applies(kind: &ValueKind, op: Operator) -> bool {
    match kind {
        ValueKind::Text | ValueKind::Map => true,
        ValueKind::Boolean => matches!(op, Operator::Eq | Operator::Neq | Operator::In | Operator::Out),
        _ => op != Operator::LikeCi,
    }
}

impl ValidationOracle for SchemaOracle<'_> {
    fn suggest(&self, query: &str, cursor: i64) -> ValidationOutcome {
        if cursor < 0 {
            return self.validate(query);
        }
        let cursor_pos = usize::try_from(cursor)
            .unwrap_or(usize::MAX)
            .min(query.chars().count());

        let parsed = parse_tolerant(query);
        let context = self.context_at(&parsed, cursor_pos);
        let tokens: Vec<SuggestToken> = match &context {
            Some(ctx) => self
                .candidates(ctx)
                .into_iter()
                .map(|suggestion| SuggestToken {
                    start: ctx.start,
                    end: ctx.end,
                    typed: ctx.typed.clone(),
                    suggestion,
                })
                .collect(),
            None => Vec::new(),
        };

        if let Some(err) = &parsed.error {
            // An error inside the token being typed is what completion fixes
            let before_context = context.as_ref().map_or(true, |ctx| err.position < ctx.start);
            if before_context || tokens.is_empty() {
                return ValidationOutcome::SyntaxError {
                    position: err.position as i64,
                    message: err.message.clone(),
                };
            }
        }

        if tokens.is_empty() {
            self.validate(query)
        } else {
            ValidationOutcome::Suggestions {
                query: query.to_string(),
                cursor,
                tokens,
            }
        }
    }
}
