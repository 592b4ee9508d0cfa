//! Compile a parsed query into a backend-neutral predicate.
//!
//! Value handling per operator:
//!
//! - `==`/`!=` on text: a `*` wildcard turns the comparison into a
//!   case-insensitive like-match (`\*` is a literal star); otherwise a
//!   case-insensitive equality.
//! - `==`/`!=`/`=in=`/`=out=` coerce arguments to the field's kind (enum
//!   constants, numbers, booleans), then apply the field's converter.
//! - Ordering operators compare against the raw argument: parsed as a
//!   number for numeric fields, the literal text for everything else.
//!   Enum fields are not coerced and converters are not applied.
//! - `=li=` is a case-insensitive like-match on any field kind; without a
//!   wildcard the argument matches as a substring.
//!
//! Negated comparisons match entities where the field is unset, except on
//! map keys: `attribute.hw!=x` requires the `hw` key to be present.

use tracing::debug;

use crate::error::CompileError;
use crate::predicate::{CompareOp, Predicate, Value, LIKE_WILDCARD};
use crate::query::{Comparison, Node, Operator};
use crate::schema::{FieldDescriptor, FieldSchema, ValueKind};

/// Compile `node` against the fields of `entity_type`.
///
/// Empty conjunctions and disjunctions compile to [`Predicate::True`].
pub fn compile(node: &Node, schema: &FieldSchema, entity_type: &str) -> Result<Predicate, CompileError> {
    match node {
        Node::And(children) | Node::Or(children) if children.is_empty() => Ok(Predicate::True),
        Node::And(children) => Ok(Predicate::And(compile_all(children, schema, entity_type)?)),
        Node::Or(children) => Ok(Predicate::Or(compile_all(children, schema, entity_type)?)),
        Node::Comparison(c) => compile_comparison(c, schema, entity_type),
    }
}

fn compile_all(nodes: &[Node], schema: &FieldSchema, entity_type: &str) -> Result<Vec<Predicate>, CompileError> {
    nodes.iter().map(|n| compile(n, schema, entity_type)).collect()
}

fn compile_comparison(c: &Comparison, schema: &FieldSchema, entity_type: &str) -> Result<Predicate, CompileError> {
    let field = schema.resolve(entity_type, &c.selector)?;
    debug!(selector = %c.selector, path = %field.path, operator = %c.operator, "compiling comparison");

    let predicate = lower_comparison(c, &field)?;
    if field.map_entry && is_negation(&predicate) {
        return Ok(Predicate::And(vec![Predicate::Exists(field.path.clone()), predicate]));
    }
    Ok(predicate)
}

fn is_negation(predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Compare { op, .. } => *op == CompareOp::Ne,
        Predicate::Like { negated, .. } | Predicate::In { negated, .. } => *negated,
        _ => false,
    }
}

fn lower_comparison(c: &Comparison, field: &FieldDescriptor) -> Result<Predicate, CompileError> {
    if !c.operator.is_multi_valued() && c.arguments.len() != 1 {
        return Err(CompileError::Arity {
            operator: c.operator,
            count: c.arguments.len(),
        });
    }
    let path = field.path.clone();

    match c.operator {
        Operator::LikeCi => Ok(Predicate::Like {
            path,
            pattern: substring_pattern(&c.arguments[0]),
            negated: false,
        }),
        Operator::Gt | Operator::Ge | Operator::Lt | Operator::Le => {
            if field.value_kind == ValueKind::Boolean {
                return Err(CompileError::UnsupportedOperator {
                    field: c.selector.clone(),
                    operator: c.operator,
                });
            }
            let value = raw_ordering_value(field, &c.selector, &c.arguments[0])?;
            Ok(Predicate::Compare {
                path,
                op: ordering_op(c.operator),
                value,
            })
        }
        Operator::Eq | Operator::Neq => {
            let raw = &c.arguments[0];
            let negated = c.operator == Operator::Neq;
            if field.value_kind == ValueKind::Text && has_wildcard(raw) {
                return Ok(Predicate::Like {
                    path,
                    pattern: wildcard_to_like(raw),
                    negated,
                });
            }
            let value = coerce(field, &c.selector, raw)?;
            let op = if negated { CompareOp::Ne } else { CompareOp::Eq };
            Ok(Predicate::Compare { path, op, value })
        }
        Operator::In | Operator::Out => {
            let values = c
                .arguments
                .iter()
                .map(|raw| coerce(field, &c.selector, raw))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Predicate::In {
                path,
                values,
                negated: c.operator == Operator::Out,
            })
        }
    }
}

fn ordering_op(operator: Operator) -> CompareOp {
    match operator {
        Operator::Gt => CompareOp::Gt,
        Operator::Ge => CompareOp::Ge,
        Operator::Lt => CompareOp::Lt,
        _ => CompareOp::Le,
    }
}

/// Coerce a raw argument to the field's kind, then apply its converter.
fn coerce(field: &FieldDescriptor, selector: &str, raw: &str) -> Result<Value, CompileError> {
    let invalid = |allowed: Vec<String>| CompileError::InvalidValue {
        field: selector.to_string(),
        value: raw.to_string(),
        allowed,
    };

    let value = match &field.value_kind {
        ValueKind::Number => Value::Number(parse_number(raw).ok_or_else(|| invalid(Vec::new()))?),
        ValueKind::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
            "true" => Value::Boolean(true),
            "false" => Value::Boolean(false),
            _ => return Err(invalid(vec!["true".to_string(), "false".to_string()])),
        },
        ValueKind::Enum(allowed) => match allowed.iter().find(|v| v.eq_ignore_ascii_case(raw)) {
            Some(canonical) => Value::Enum(canonical.clone()),
            None => {
                debug!(selector, value = raw, "value is not an enum constant");
                return Err(invalid(allowed.clone()));
            }
        },
        _ => Value::Text(unescape_star(raw)),
    };

    match &field.converter {
        Some(converter) => converter
            .convert(&value)
            .ok_or_else(|| invalid(converter.possible_values())),
        None => Ok(value),
    }
}

fn raw_ordering_value(field: &FieldDescriptor, selector: &str, raw: &str) -> Result<Value, CompileError> {
    match field.value_kind {
        ValueKind::Number => parse_number(raw)
            .map(Value::Number)
            .ok_or_else(|| CompileError::InvalidValue {
                field: selector.to_string(),
                value: raw.to_string(),
                allowed: Vec::new(),
            }),
        _ => Ok(Value::Text(raw.to_string())),
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Whether `raw` holds a `*` not preceded by a backslash.
fn has_wildcard(raw: &str) -> bool {
    let mut escaped = false;
    for c in raw.chars() {
        match c {
            '*' if !escaped => return true,
            '\\' if !escaped => escaped = true,
            _ => escaped = false,
        }
    }
    false
}

fn unescape_star(raw: &str) -> String {
    raw.replace("\\*", "*")
}

/// Translate a `*`-wildcard argument to a like-pattern, escaping the
/// backend's own metacharacters.
fn wildcard_to_like(raw: &str) -> String {
    let mut result = String::with_capacity(raw.len() + 8);
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'*') => {
                chars.next();
                result.push('*');
            }
            '*' => result.push(LIKE_WILDCARD),
            '%' => result.push_str("\\%"),
            '_' => result.push_str("\\_"),
            '\\' => result.push_str("\\\\"),
            _ => result.push(c),
        }
    }
    result
}

fn substring_pattern(raw: &str) -> String {
    if has_wildcard(raw) {
        wildcard_to_like(raw)
    } else {
        format!("{}{}{}", LIKE_WILDCARD, wildcard_to_like(raw), LIKE_WILDCARD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse;
    use crate::schema::ValueConverter;

    #[derive(Debug)]
    struct PercentConverter;

    impl ValueConverter for PercentConverter {
        fn convert(&self, value: &Value) -> Option<Value> {
            match value.as_text().to_ascii_lowercase().as_str() {
                "low" => Some(Value::Number(10.0)),
                "high" => Some(Value::Number(90.0)),
                _ => None,
            }
        }

        fn possible_values(&self) -> Vec<String> {
            vec!["low".to_string(), "high".to_string()]
        }
    }

    fn schema() -> FieldSchema {
        let mut schema = FieldSchema::new();
        schema
            .register_field("target", "name", FieldDescriptor::text("name"))
            .register_field(
                "target",
                "type",
                FieldDescriptor::enumeration("type", ["application", "os", "runtime"]),
            )
            .register_field("target", "requestedat", FieldDescriptor::number("lastTargetQuery"))
            .register_field("target", "valid", FieldDescriptor::boolean("valid"))
            .register_field(
                "target",
                "load",
                FieldDescriptor::text("load").with_converter(PercentConverter),
            )
            .register_field("target", "attribute", FieldDescriptor::map("controllerAttributes"));
        schema
    }

    fn compile_str(rsql: &str) -> Result<Predicate, CompileError> {
        compile(&parse(rsql).unwrap(), &schema(), "target")
    }

    fn cmp(path: &str, op: CompareOp, value: Value) -> Predicate {
        Predicate::Compare {
            path: path.to_string(),
            op,
            value,
        }
    }

    #[test]
    fn test_and_of_text_and_enum() {
        let p = compile_str("name==targetId1;type==APPLICATION").unwrap();
        assert_eq!(
            p,
            Predicate::And(vec![
                cmp("name", CompareOp::Eq, Value::Text("targetId1".to_string())),
                cmp("type", CompareOp::Eq, Value::Enum("application".to_string())),
            ])
        );
        assert_eq!(p.to_string(), r#"AND(EQ(name, "targetId1"), EQ(type, application))"#);
    }

    #[test]
    fn test_empty_query_is_true() {
        assert_eq!(compile_str("").unwrap(), Predicate::True);
    }

    #[test]
    fn test_enum_mismatch_lists_allowed() {
        let err = compile_str("type==bogus").unwrap_err();
        assert_eq!(
            err,
            CompileError::InvalidValue {
                field: "type".to_string(),
                value: "bogus".to_string(),
                allowed: vec!["application".to_string(), "os".to_string(), "runtime".to_string()],
            }
        );
    }

    #[test]
    fn test_ordering_uses_raw_value_not_enum() {
        // Ordering operators skip enum coercion: the argument stays raw text
        // and need not be a known constant.
        assert_eq!(
            compile_str("type=gt=APPLICATION").unwrap(),
            cmp("type", CompareOp::Gt, Value::Text("APPLICATION".to_string()))
        );
        assert_eq!(
            compile_str("type<bogus").unwrap(),
            cmp("type", CompareOp::Lt, Value::Text("bogus".to_string()))
        );
    }

    #[test]
    fn test_ordering_skips_converter() {
        assert_eq!(
            compile_str("load=ge=low").unwrap(),
            cmp("load", CompareOp::Ge, Value::Text("low".to_string()))
        );
    }

    #[test]
    fn test_number_fields() {
        assert_eq!(
            compile_str("requestedat=le=1700000000000").unwrap(),
            cmp("lastTargetQuery", CompareOp::Le, Value::Number(1_700_000_000_000.0))
        );
        assert!(matches!(
            compile_str("requestedat==soon"),
            Err(CompileError::InvalidValue { .. })
        ));
        assert!(matches!(
            compile_str("requestedat>soon"),
            Err(CompileError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_boolean_fields() {
        assert_eq!(
            compile_str("valid==TRUE").unwrap(),
            cmp("valid", CompareOp::Eq, Value::Boolean(true))
        );
        assert!(matches!(
            compile_str("valid=gt=true"),
            Err(CompileError::UnsupportedOperator { .. })
        ));
    }

    #[test]
    fn test_wildcard_becomes_like() {
        assert_eq!(
            compile_str("name==*foo*").unwrap(),
            Predicate::Like {
                path: "name".to_string(),
                pattern: "%foo%".to_string(),
                negated: false,
            }
        );
        assert_eq!(
            compile_str("name!=a_b*").unwrap(),
            Predicate::Like {
                path: "name".to_string(),
                pattern: "a\\_b%".to_string(),
                negated: true,
            }
        );
    }

    #[test]
    fn test_escaped_star_is_literal() {
        assert_eq!(
            compile_str(r"name==a\*b").unwrap(),
            cmp("name", CompareOp::Eq, Value::Text("a*b".to_string()))
        );
        assert_eq!(
            compile_str(r"name==a\**").unwrap(),
            Predicate::Like {
                path: "name".to_string(),
                pattern: "a*%".to_string(),
                negated: false,
            }
        );
    }

    #[test]
    fn test_like_ci_on_any_kind() {
        assert_eq!(
            compile_str("type=li=APP").unwrap(),
            Predicate::Like {
                path: "type".to_string(),
                pattern: "%APP%".to_string(),
                negated: false,
            }
        );
        assert_eq!(
            compile_str("name=li=ab*").unwrap(),
            Predicate::Like {
                path: "name".to_string(),
                pattern: "ab%".to_string(),
                negated: false,
            }
        );
    }

    #[test]
    fn test_in_and_out() {
        assert_eq!(
            compile_str("type=in=(OS,Runtime)").unwrap(),
            Predicate::In {
                path: "type".to_string(),
                values: vec![Value::Enum("os".to_string()), Value::Enum("runtime".to_string())],
                negated: false,
            }
        );
        assert!(matches!(
            compile_str("type=out=(os,bogus)"),
            Err(CompileError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_converter_applies_after_coercion() {
        assert_eq!(
            compile_str("load==HIGH").unwrap(),
            cmp("load", CompareOp::Eq, Value::Number(90.0))
        );
        assert_eq!(
            compile_str("load==medium").unwrap_err(),
            CompileError::InvalidValue {
                field: "load".to_string(),
                value: "medium".to_string(),
                allowed: vec!["low".to_string(), "high".to_string()],
            }
        );
    }

    #[test]
    fn test_single_valued_operator_rejects_lists() {
        assert_eq!(
            compile_str("name==(a,b)").unwrap_err(),
            CompileError::Arity {
                operator: Operator::Eq,
                count: 2,
            }
        );
    }

    #[test]
    fn test_map_field() {
        assert_eq!(
            compile_str("attribute.device_type==dev_test").unwrap(),
            cmp(
                "controllerAttributes.device_type",
                CompareOp::Eq,
                Value::Text("dev_test".to_string())
            )
        );
    }

    #[test]
    fn test_negated_map_key_requires_presence() {
        let path = "controllerAttributes.hw";
        let guard = |p: Predicate| Predicate::And(vec![Predicate::Exists(path.to_string()), p]);
        assert_eq!(
            compile_str("attribute.hw!=x").unwrap(),
            guard(cmp(path, CompareOp::Ne, Value::Text("x".to_string())))
        );
        assert_eq!(
            compile_str("attribute.hw=out=(x)").unwrap(),
            guard(Predicate::In {
                path: path.to_string(),
                values: vec![Value::Text("x".to_string())],
                negated: true,
            })
        );
        assert_eq!(
            compile_str("attribute.hw!=x*").unwrap(),
            guard(Predicate::Like {
                path: path.to_string(),
                pattern: "x%".to_string(),
                negated: true,
            })
        );
    }

    #[test]
    fn test_negations_match_unset_fields() {
        let empty: std::collections::HashMap<String, Value> = std::collections::HashMap::new();
        for query in ["name!=lab", "name=out=(lab,x)", "name!=lab*"] {
            assert!(compile_str(query).unwrap().matches(&empty), "{}", query);
        }
        for query in ["name==lab", "name=in=(lab,x)", "name==lab*", "attribute.hw!=x"] {
            assert!(!compile_str(query).unwrap().matches(&empty), "{}", query);
        }
    }

    #[test]
    fn test_unknown_field() {
        assert!(matches!(
            compile_str("bogus==1"),
            Err(CompileError::Field(crate::error::FieldError::UnknownField { .. }))
        ));
    }
}
