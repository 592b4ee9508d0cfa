//! Syntax tree for parsed RSQL queries.

use std::fmt;

use serde::Serialize;

/// A parsed query node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    /// `selector op arguments`
    Comparison(Comparison),
    /// Children joined by `;` or `and`. Empty means "match everything".
    And(Vec<Node>),
    /// Children joined by `,` or `or`. Empty means "match everything".
    Or(Vec<Node>),
}

/// A single `selector op arguments` constraint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    /// Dotted field path as written in the query
    pub selector: String,
    /// Comparison operator
    pub operator: Operator,
    /// Raw argument strings, quotes removed
    pub arguments: Vec<String>,
}

impl Node {
    /// The node matching every entity.
    pub fn match_all() -> Self {
        Node::And(Vec::new())
    }

    pub fn is_match_all(&self) -> bool {
        matches!(self, Node::And(c) | Node::Or(c) if c.is_empty())
    }

    /// Rebuild the tree with every argument passed through `f`.
    pub fn map_arguments<F>(&self, f: &F) -> Node
    where
        F: Fn(&str) -> String,
    {
        match self {
            Node::Comparison(c) => Node::Comparison(Comparison {
                selector: c.selector.clone(),
                operator: c.operator,
                arguments: c.arguments.iter().map(|a| f(a)).collect(),
            }),
            Node::And(children) => Node::And(children.iter().map(|n| n.map_arguments(f)).collect()),
            Node::Or(children) => Node::Or(children.iter().map(|n| n.map_arguments(f)).collect()),
        }
    }

    /// All comparisons in the tree, left to right.
    pub fn comparisons(&self) -> Vec<&Comparison> {
        let mut out = Vec::new();
        self.collect_comparisons(&mut out);
        out
    }

    fn collect_comparisons<'a>(&'a self, out: &mut Vec<&'a Comparison>) {
        match self {
            Node::Comparison(c) => out.push(c),
            Node::And(children) | Node::Or(children) => {
                for child in children {
                    child.collect_comparisons(out);
                }
            }
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Comparison(c) => {
                write!(f, "{}{}", c.selector, c.operator)?;
                if c.operator.is_multi_valued() || c.arguments.len() > 1 {
                    write!(f, "(")?;
                    for (i, arg) in c.arguments.iter().enumerate() {
                        if i > 0 {
                            write!(f, ",")?;
                        }
                        write_argument(f, arg)?;
                    }
                    write!(f, ")")
                } else {
                    c.arguments
                        .first()
                        .map_or(Ok(()), |arg| write_argument(f, arg))
                }
            }
            Node::And(children) => write_group(f, children, ";"),
            Node::Or(children) => write_group(f, children, ","),
        }
    }
}

fn write_group(f: &mut fmt::Formatter<'_>, children: &[Node], sep: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", sep)?;
        }
        write!(f, "{}", child)?;
    }
    write!(f, ")")
}

fn write_argument(f: &mut fmt::Formatter<'_>, arg: &str) -> fmt::Result {
    let needs_quotes = arg.is_empty()
        || arg
            .chars()
            .any(|c| c.is_whitespace() || super::lexer::is_reserved(c));
    if needs_quotes {
        write!(f, "\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        write!(f, "{}", arg)
    }
}

/// RSQL comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// `==`
    Eq,
    /// `!=`
    Neq,
    /// `=gt=` or `>`
    Gt,
    /// `=ge=` or `>=`
    Ge,
    /// `=lt=` or `<`
    Lt,
    /// `=le=` or `<=`
    Le,
    /// `=in=`
    In,
    /// `=out=`
    Out,
    /// `=li=`, case-insensitive like
    LikeCi,
}

impl Operator {
    pub const ALL: [Operator; 9] = [
        Operator::Eq,
        Operator::Neq,
        Operator::Gt,
        Operator::Ge,
        Operator::Lt,
        Operator::Le,
        Operator::In,
        Operator::Out,
        Operator::LikeCi,
    ];

    /// Canonical spelling, as offered in suggestions.
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Neq => "!=",
            Operator::Gt => "=gt=",
            Operator::Ge => "=ge=",
            Operator::Lt => "=lt=",
            Operator::Le => "=le=",
            Operator::In => "=in=",
            Operator::Out => "=out=",
            Operator::LikeCi => "=li=",
        }
    }

    /// Every accepted spelling of this operator.
    pub fn spellings(self) -> &'static [&'static str] {
        match self {
            Operator::Eq => &["=="],
            Operator::Neq => &["!="],
            Operator::Gt => &["=gt=", ">"],
            Operator::Ge => &["=ge=", ">="],
            Operator::Lt => &["=lt=", "<"],
            Operator::Le => &["=le=", "<="],
            Operator::In => &["=in="],
            Operator::Out => &["=out="],
            Operator::LikeCi => &["=li="],
        }
    }

    /// Look up an operator by spelling. Alphabetic forms ignore case.
    pub fn from_symbol(symbol: &str) -> Option<Operator> {
        let lower = symbol.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|op| op.spellings().contains(&lower.as_str()))
    }

    /// `=in=` and `=out=` take a parenthesized argument list.
    pub fn is_multi_valued(self) -> bool {
        matches!(self, Operator::In | Operator::Out)
    }

    pub fn is_ordering(self) -> bool {
        matches!(self, Operator::Gt | Operator::Ge | Operator::Lt | Operator::Le)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}
