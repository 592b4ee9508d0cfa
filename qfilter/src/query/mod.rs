//! RSQL query language.
//!
//! # Syntax Overview
//!
//! - **Comparison**: `selector op argument` or `selector op (arg1,arg2,...)`
//! - **Selector**: `[A-Za-z_][A-Za-z0-9_.]*`, dots walk into sub-fields
//! - **Operators**: `==`, `!=`, `=gt=`/`>`, `=ge=`/`>=`, `=lt=`/`<`,
//!   `=le=`/`<=`, `=in=`, `=out=`, `=li=` (alphabetic forms ignore case)
//! - **Arguments**: bare words or `'single'`/`"double"` quoted strings;
//!   `*` is a wildcard in `==`/`!=` text arguments, `\*` a literal star
//! - **AND**: `;` or `and`, binds tighter than **OR**: `,` or `or`
//! - **Grouping**: `(a==1,b==2);c==3`

mod ast;
mod lexer;
mod parser;

pub use ast::{Comparison, Node, Operator};
pub use lexer::{is_reserved, tokenize, Lexed, Lexer, Token, TokenKind};
pub use parser::{is_valid_selector, parse, parse_tolerant, Parsed, Role};
