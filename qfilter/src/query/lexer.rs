//! Tokenizer for RSQL queries.
//!
//! Offsets are character positions into the input, so they line up with
//! what a user sees in a text field.

use crate::error::ParseError;

use super::ast::Operator;

/// A lexical token with its `[start, end)` character span.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Unquoted run of unreserved characters (selector, argument, `and`/`or`)
    Word(String),
    /// Quoted argument, quotes removed and escapes resolved
    Quoted(String),
    /// Complete comparison operator
    Op(Operator),
    /// Operator text cut short by the end of input (`=`, `=g`, `!`)
    PartialOp(String),
    LParen,
    RParen,
    /// `,`: OR, or argument separator inside parentheses
    Comma,
    /// `;`: AND
    Semicolon,
}

impl TokenKind {
    /// The text a user typed for word-like tokens.
    pub fn text(&self) -> Option<&str> {
        match self {
            TokenKind::Word(s) | TokenKind::Quoted(s) | TokenKind::PartialOp(s) => Some(s),
            _ => None,
        }
    }
}

/// Characters that never appear in an unquoted word.
pub fn is_reserved(c: char) -> bool {
    matches!(c, '"' | '\'' | '(' | ')' | ';' | ',' | '=' | '!' | '~' | '<' | '>')
}

/// Streaming tokenizer. Yields tokens until input ends or a lexical error
/// is hit; after an error it yields nothing further.
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    failed: bool,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            failed: false,
        }
    }

    /// Input length in characters.
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    fn peek_char(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn token(&mut self, kind: TokenKind, start: usize) -> Option<Result<Token, ParseError>> {
        Some(Ok(Token {
            kind,
            start,
            end: self.pos,
        }))
    }

    fn fail(&mut self, position: usize, message: String) -> Option<Result<Token, ParseError>> {
        self.failed = true;
        Some(Err(ParseError::new(position, message)))
    }

    fn read_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.peek_char(0) {
            if c.is_whitespace() || is_reserved(c) {
                break;
            }
            word.push(c);
            self.pos += 1;
        }
        word
    }

    fn read_quoted(&mut self, quote: char) -> Option<Result<Token, ParseError>> {
        let start = self.pos;
        self.pos += 1;
        let mut value = String::new();
        loop {
            match self.peek_char(0) {
                None => {
                    return self.fail(start, "unterminated quoted argument".to_string());
                }
                Some('\\') => match self.peek_char(1) {
                    // Keep the escape so wildcard handling can tell a literal star
                    Some('*') => {
                        value.push_str("\\*");
                        self.pos += 2;
                    }
                    Some(next) => {
                        value.push(next);
                        self.pos += 2;
                    }
                    None => {
                        return self.fail(start, "unterminated quoted argument".to_string());
                    }
                },
                Some(c) if c == quote => {
                    self.pos += 1;
                    return self.token(TokenKind::Quoted(value), start);
                }
                Some(c) => {
                    value.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    /// `==`, `=xx=`, or an incomplete prefix of one at end of input.
    fn read_equals_operator(&mut self) -> Option<Result<Token, ParseError>> {
        let start = self.pos;
        self.pos += 1;
        if self.peek_char(0) == Some('=') {
            self.pos += 1;
            return self.token(TokenKind::Op(Operator::Eq), start);
        }

        let mut text = String::from("=");
        while let Some(c) = self.peek_char(0).filter(|c| c.is_ascii_alphabetic()) {
            text.push(c);
            self.pos += 1;
        }

        match self.peek_char(0) {
            None => self.token(TokenKind::PartialOp(text), start),
            Some('=') => {
                self.pos += 1;
                text.push('=');
                match Operator::from_symbol(&text) {
                    Some(op) => self.token(TokenKind::Op(op), start),
                    None => self.fail(start, format!("unknown operator '{}'", text)),
                }
            }
            Some(_) => self.fail(start, format!("invalid operator '{}'", text)),
        }
    }
}

impl Iterator for Lexer {
    type Item = Result<Token, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        while self.peek_char(0).is_some_and(char::is_whitespace) {
            self.pos += 1;
        }

        let start = self.pos;
        let c = self.peek_char(0)?;
        match c {
            '(' => {
                self.pos += 1;
                self.token(TokenKind::LParen, start)
            }
            ')' => {
                self.pos += 1;
                self.token(TokenKind::RParen, start)
            }
            ',' => {
                self.pos += 1;
                self.token(TokenKind::Comma, start)
            }
            ';' => {
                self.pos += 1;
                self.token(TokenKind::Semicolon, start)
            }
            '"' | '\'' => self.read_quoted(c),
            '=' => self.read_equals_operator(),
            '!' => match self.peek_char(1) {
                Some('=') => {
                    self.pos += 2;
                    self.token(TokenKind::Op(Operator::Neq), start)
                }
                None => {
                    self.pos += 1;
                    self.token(TokenKind::PartialOp("!".to_string()), start)
                }
                Some(_) => self.fail(start, "expected '!='".to_string()),
            },
            '<' | '>' => {
                let (plain, or_equal) = if c == '<' {
                    (Operator::Lt, Operator::Le)
                } else {
                    (Operator::Gt, Operator::Ge)
                };
                if self.peek_char(1) == Some('=') {
                    self.pos += 2;
                    self.token(TokenKind::Op(or_equal), start)
                } else {
                    self.pos += 1;
                    self.token(TokenKind::Op(plain), start)
                }
            }
            '~' => self.fail(start, "unexpected character '~'".to_string()),
            _ => {
                let word = self.read_word();
                self.token(TokenKind::Word(word), start)
            }
        }
    }
}

/// Tokens of an input, plus the lexical error that stopped tokenizing.
#[derive(Debug, Clone, PartialEq)]
pub struct Lexed {
    pub tokens: Vec<Token>,
    pub error: Option<ParseError>,
    /// Input length in characters
    pub len: usize,
}

pub fn tokenize(input: &str) -> Lexed {
    let mut lexer = Lexer::new(input);
    let len = lexer.len();
    let mut tokens = Vec::new();
    let mut error = None;
    for item in lexer.by_ref() {
        match item {
            Ok(token) => tokens.push(token),
            Err(e) => {
                error = Some(e);
                break;
            }
        }
    }
    Lexed { tokens, error, len }
}
