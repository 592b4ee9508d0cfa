//! Recursive-descent RSQL parser.
//!
//! A single parser serves both strict parsing and tolerant parsing for
//! suggestions. Tolerant parsing keeps everything learned before the first
//! error: the tokens, the grammatical role the parser expected at each token
//! it looked at, and the part of the tree that parsed completely, with its
//! connectives and grouping intact.

use tracing::trace;

use crate::error::ParseError;

use super::ast::{Comparison, Node, Operator};
use super::lexer::{tokenize, Token, TokenKind};

/// What the parser expected at a token position.
#[derive(Debug, Clone, PartialEq)]
pub enum Role {
    /// A selector or an opening parenthesis
    Selector,
    /// A comparison operator following `selector`
    Operator { selector: String },
    /// An argument (or list punctuation) for `selector operator`
    Argument { selector: String, operator: Operator },
    /// A connective (`;`, `,`, `and`, `or`), a closing parenthesis or the end
    Connective,
}

/// Result of a tolerant parse.
#[derive(Debug, Clone)]
pub struct Parsed {
    /// Full tree on success; best-effort partial tree on error
    pub node: Option<Node>,
    /// First error in text order
    pub error: Option<ParseError>,
    pub tokens: Vec<Token>,
    /// Role per token index; the extra final slot is the end of input
    roles: Vec<Option<Role>>,
}

impl Parsed {
    /// Role the parser expected at `index`. `index == tokens.len()` is the
    /// end-of-input slot. `None` if parsing stopped before reaching it.
    pub fn role_at(&self, index: usize) -> Option<&Role> {
        self.roles.get(index).and_then(Option::as_ref)
    }

    pub fn into_result(self) -> Result<Node, ParseError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.node.unwrap_or_else(Node::match_all)),
        }
    }
}

/// Parse an RSQL query.
///
/// Blank input parses to the match-all node.
pub fn parse(rsql: &str) -> Result<Node, ParseError> {
    parse_tolerant(rsql).into_result()
}

/// Parse an RSQL query, keeping partial results on error.
pub fn parse_tolerant(rsql: &str) -> Parsed {
    trace!(query = rsql, "parsing rsql");
    let lexed = tokenize(rsql);
    let end = lexed.error.as_ref().map_or(lexed.len, |e| e.position);

    let mut parser = Parser {
        tokens: &lexed.tokens,
        pos: 0,
        end,
        lex_error: lexed.error.clone(),
        roles: vec![None; lexed.tokens.len() + 1],
        partial: None,
    };

    let result = if lexed.tokens.is_empty() && lexed.error.is_none() {
        parser.roles[0] = Some(Role::Selector);
        Ok(Node::match_all())
    } else {
        parser.parse_query()
    };

    let (node, error) = match result {
        Ok(node) => (Some(node), None),
        Err(e) => (parser.partial.take(), Some(e)),
    };
    let roles = parser.roles;

    Parsed {
        node,
        error,
        tokens: lexed.tokens,
        roles,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Connective {
    And,
    Or,
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    /// Where input effectively ends: its length, or the lexical error
    end: usize,
    lex_error: Option<ParseError>,
    roles: Vec<Option<Role>>,
    /// Tree built before the error, assembled while unwinding
    partial: Option<Node>,
}

impl<'a> Parser<'a> {
    /// Look at the current token, recording what was expected there.
    fn peek(&mut self, role: Role) -> Option<&'a Token> {
        if let Some(slot) = self.roles.get_mut(self.pos) {
            *slot = Some(role);
        }
        self.tokens.get(self.pos)
    }

    fn error_at(&self, token: &Token, message: impl Into<String>) -> ParseError {
        ParseError::new(token.start, message)
    }

    /// Error for running out of tokens.
    fn error_at_end(&self, message: impl Into<String>) -> ParseError {
        self.lex_error
            .clone()
            .unwrap_or_else(|| ParseError::new(self.end, message))
    }

    fn parse_query(&mut self) -> Result<Node, ParseError> {
        let node = self.parse_or()?;
        let error = match self.tokens.get(self.pos) {
            None => match &self.lex_error {
                Some(e) => e.clone(),
                None => return Ok(node),
            },
            Some(token) if token.kind == TokenKind::RParen => self.error_at(token, "unbalanced ')'"),
            Some(token) => self.error_at(token, "expected ';', ',', 'and' or 'or'"),
        };
        self.partial = Some(node);
        Err(error)
    }

    /// Fold the children parsed so far, plus whatever the failed child
    /// left behind, into the partial tree.
    fn unwind(&mut self, mut children: Vec<Node>, wrap: fn(Vec<Node>) -> Node, error: ParseError) -> ParseError {
        children.extend(self.partial.take());
        if !children.is_empty() {
            self.partial = Some(collapse(children, wrap));
        }
        error
    }

    fn peek_connective(&mut self) -> Option<Connective> {
        match &self.peek(Role::Connective)?.kind {
            TokenKind::Semicolon => Some(Connective::And),
            TokenKind::Comma => Some(Connective::Or),
            TokenKind::Word(w) if w.eq_ignore_ascii_case("and") => Some(Connective::And),
            TokenKind::Word(w) if w.eq_ignore_ascii_case("or") => Some(Connective::Or),
            _ => None,
        }
    }

    fn parse_or(&mut self) -> Result<Node, ParseError> {
        let mut children = Vec::new();
        loop {
            match self.parse_and() {
                Ok(child) => children.push(child),
                Err(e) => return Err(self.unwind(children, Node::Or, e)),
            }
            if self.peek_connective() != Some(Connective::Or) {
                return Ok(collapse(children, Node::Or));
            }
            self.pos += 1;
        }
    }

    fn parse_and(&mut self) -> Result<Node, ParseError> {
        let mut children = Vec::new();
        loop {
            match self.parse_primary() {
                Ok(child) => children.push(child),
                Err(e) => return Err(self.unwind(children, Node::And, e)),
            }
            if self.peek_connective() != Some(Connective::And) {
                return Ok(collapse(children, Node::And));
            }
            self.pos += 1;
        }
    }

    fn parse_primary(&mut self) -> Result<Node, ParseError> {
        let Some(token) = self.peek(Role::Selector) else {
            return Err(self.error_at_end("expected a selector"));
        };
        match &token.kind {
            TokenKind::LParen => {
                self.pos += 1;
                let inner = self.parse_or()?;
                match self.peek(Role::Connective) {
                    Some(t) if t.kind == TokenKind::RParen => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    Some(t) => Err(self.error_at(t, "expected ')'")),
                    None => Err(self.error_at_end("expected ')'")),
                }
            }
            TokenKind::Word(selector) => {
                if !is_valid_selector(selector) {
                    return Err(self.error_at(token, format!("invalid selector '{}'", selector)));
                }
                self.pos += 1;
                self.parse_comparison(selector)
            }
            _ => Err(self.error_at(token, "expected a selector")),
        }
    }

    fn parse_comparison(&mut self, selector: &str) -> Result<Node, ParseError> {
        let role = Role::Operator {
            selector: selector.to_string(),
        };
        let Some(token) = self.peek(role) else {
            return Err(self.error_at_end("expected a comparison operator"));
        };
        let operator = match &token.kind {
            TokenKind::Op(op) => *op,
            TokenKind::PartialOp(text) => {
                return Err(self.error_at(token, format!("incomplete operator '{}'", text)));
            }
            _ => return Err(self.error_at(token, "expected a comparison operator")),
        };
        self.pos += 1;

        let arguments = self.parse_arguments(selector, operator)?;
        Ok(Node::Comparison(Comparison {
            selector: selector.to_string(),
            operator,
            arguments,
        }))
    }

    fn parse_arguments(&mut self, selector: &str, operator: Operator) -> Result<Vec<String>, ParseError> {
        let role = Role::Argument {
            selector: selector.to_string(),
            operator,
        };
        let Some(token) = self.peek(role.clone()) else {
            return Err(self.error_at_end("expected an argument"));
        };

        match &token.kind {
            TokenKind::LParen => {
                self.pos += 1;
                let mut arguments = Vec::new();
                loop {
                    arguments.push(self.parse_value(role.clone())?);
                    match self.peek(role.clone()) {
                        Some(t) if t.kind == TokenKind::Comma => self.pos += 1,
                        Some(t) if t.kind == TokenKind::RParen => {
                            self.pos += 1;
                            return Ok(arguments);
                        }
                        Some(t) => return Err(self.error_at(t, "expected ',' or ')'")),
                        None => return Err(self.error_at_end("expected ',' or ')'")),
                    }
                }
            }
            TokenKind::Word(_) | TokenKind::Quoted(_) if operator.is_multi_valued() => Err(self.error_at(
                token,
                format!("operator '{}' needs a parenthesized argument list", operator),
            )),
            _ => Ok(vec![self.parse_value(role)?]),
        }
    }

    fn parse_value(&mut self, role: Role) -> Result<String, ParseError> {
        let Some(token) = self.peek(role) else {
            return Err(self.error_at_end("expected an argument"));
        };
        match &token.kind {
            TokenKind::Word(v) | TokenKind::Quoted(v) => {
                self.pos += 1;
                Ok(v.clone())
            }
            _ => Err(self.error_at(token, "expected an argument")),
        }
    }
}

fn collapse(mut children: Vec<Node>, wrap: fn(Vec<Node>) -> Node) -> Node {
    if children.len() == 1 {
        children.remove(0)
    } else {
        wrap(children)
    }
}

/// Selectors match `[A-Za-z_][A-Za-z0-9_.]*`.
pub fn is_valid_selector(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}
