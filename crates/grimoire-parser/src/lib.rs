//! Expression parsing for grimoire.
//!
//! Two front ends produce the same [`grimoire_ast::Expr`] trees and are
//! interchangeable inputs to the query builder:
//!
//! - a hand-written lexer and Pratt precedence-climbing parser for the
//!   restricted SQL expression grammar (`title = ? AND word_count > 1000`),
//! - an object-condition translator for MongoDB-style condition trees
//!   (`{"wordCount": {"$gt": 1000}}`).

pub mod expr;
pub mod lexer;
pub mod object;
pub mod token;

pub use expr::{parse_expr, parse_expr_list, ParseError};
pub use object::{conditions_from_json, parse_object, Conditions, Operand};
pub use token::{Token, TokenKind};
