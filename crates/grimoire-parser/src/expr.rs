//! Pratt expression parser for the restricted SQL expression grammar.
//!
//! Precedence (loosest to tightest): `OR`; `XOR`; `AND`; `NOT`; comparisons
//! and `LIKE`/`IN`/`BETWEEN`; `+ -`; `* / DIV % MOD`; `^`; unary prefix.
//! `?` placeholders are consumed against the supplied value list in order;
//! both exhausting and underusing the list are parse errors.

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt;

use grimoire_ast::{Expr, FuncCall, Ident, Modifier, Op, ReturningType};
use grimoire_types::Value;

use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Expression parse failure with source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub line: u32,
    pub col: u32,
}

impl ParseError {
    #[must_use]
    pub(crate) fn at(message: impl Into<String>, token: Option<&Token>) -> Self {
        let message = message.into();
        let (line, col) = token.map_or((0, 0), |t| (t.line, t.col));
        Self { message, line, col }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.col, self.message)
    }
}

impl StdError for ParseError {}

impl From<ParseError> for grimoire_error::Error {
    fn from(err: ParseError) -> Self {
        Self::Parse {
            message: err.message,
            line: err.line,
            col: err.col,
        }
    }
}

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// Parse a single expression, substituting `?` placeholders from `values`.
pub fn parse_expr(text: &str, values: Vec<Value>) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(text, values);
    let expr = parser.parse_item()?;
    parser.finish()?;
    Ok(expr)
}

/// Parse comma-separated top-level expressions.
pub fn parse_expr_list(text: &str, values: Vec<Value>) -> Result<Vec<Expr>, ParseError> {
    let mut parser = Parser::new(text, values);
    let mut exprs = vec![parser.parse_item()?];
    while parser.eat(&TokenKind::Comma) {
        exprs.push(parser.parse_item()?);
    }
    parser.finish()?;
    Ok(exprs)
}

// Binding powers: higher = tighter binding.
// Left BP is checked against min_bp; right BP is passed to the recursive call.
mod bp {
    pub const OR: (u8, u8) = (1, 2);
    pub const XOR: (u8, u8) = (3, 4);
    pub const AND: (u8, u8) = (5, 6);
    // Prefix NOT right BP:
    pub const NOT_PREFIX: u8 = 7;
    // Comparison / pattern / membership:
    pub const COMPARISON: (u8, u8) = (9, 10);
    pub const ADD: (u8, u8) = (11, 12);
    pub const MUL: (u8, u8) = (13, 14);
    pub const BITXOR: (u8, u8) = (15, 16);
    // Unary prefix (- ~ !) right BP:
    pub const UNARY: u8 = 17;
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    values: VecDeque<Value>,
}

impl Parser {
    fn new(text: &str, values: Vec<Value>) -> Self {
        Self {
            tokens: Lexer::tokenize(text),
            pos: 0,
            values: values.into(),
        }
    }

    // ── Token helpers ───────────────────────────────────────────────────

    fn peek_kind(&self) -> &TokenKind {
        self.tokens
            .get(self.pos)
            .map_or(&TokenKind::Eof, |t| &t.kind)
    }

    fn peek_token(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if tok.kind != TokenKind::Eof {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(kind)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &TokenKind) -> Result<(), ParseError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.err_here(format!(
                "expected {expected:?}, got {:?}",
                self.peek_kind()
            )))
        }
    }

    fn err_here(&self, message: impl Into<String>) -> ParseError {
        ParseError::at(message, self.peek_token())
    }

    /// Check terminal conditions: clean end of input and a drained value list.
    fn finish(&mut self) -> Result<(), ParseError> {
        match self.peek_kind() {
            TokenKind::Eof => {}
            TokenKind::Error(msg) => return Err(self.err_here(msg.clone())),
            other => {
                return Err(self.err_here(format!("unexpected token {other:?} after expression")));
            }
        }
        if !self.values.is_empty() {
            return Err(self.err_here(format!(
                "placeholder mismatch: {} unconsumed value(s)",
                self.values.len()
            )));
        }
        Ok(())
    }

    // ── Entry: expression with optional alias ───────────────────────────

    fn parse_item(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_expr_bp(0)?;
        if self.eat(&TokenKind::KwAs) {
            let tok = self.advance();
            let alias = match tok.kind {
                TokenKind::Id(name) | TokenKind::QuotedId(name) => name,
                ref other => {
                    return Err(ParseError::at(
                        format!("expected alias name after AS, got {other:?}"),
                        Some(&tok),
                    ));
                }
            };
            return Ok(Expr::alias(expr, alias));
        }
        Ok(expr)
    }

    // ── Pratt core ──────────────────────────────────────────────────────

    fn parse_expr_bp(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_prefix()?;

        loop {
            let Some((l_bp, r_bp)) = self.infix_bp() else {
                break;
            };
            if l_bp < min_bp {
                break;
            }
            lhs = self.parse_infix(lhs, r_bp)?;
        }

        Ok(lhs)
    }

    // ── Prefix (nud) ────────────────────────────────────────────────────

    fn parse_prefix(&mut self) -> Result<Expr, ParseError> {
        let tok = self.advance();
        match &tok.kind {
            TokenKind::Integer(i) => Ok(Expr::Literal(Value::Integer(*i))),
            TokenKind::Float(f) => Ok(Expr::Literal(Value::Float(*f))),
            TokenKind::String(s) => Ok(Expr::Literal(Value::Text(s.clone()))),
            TokenKind::KwNull => Ok(Expr::Literal(Value::Null)),
            TokenKind::KwTrue => Ok(Expr::Literal(Value::Bool(true))),
            TokenKind::KwFalse => Ok(Expr::Literal(Value::Bool(false))),

            TokenKind::Placeholder => match self.values.pop_front() {
                Some(value) => Ok(Expr::Literal(value)),
                None => Err(ParseError::at(
                    "placeholder mismatch: value list exhausted",
                    Some(&tok),
                )),
            },

            TokenKind::Star => Ok(Expr::Wildcard),

            // Unary minus over a numeric literal folds into the literal.
            TokenKind::Minus => match self.peek_kind() {
                TokenKind::Integer(i) => {
                    let i = *i;
                    self.advance();
                    Ok(Expr::Literal(Value::Integer(-i)))
                }
                TokenKind::Float(f) => {
                    let f = *f;
                    self.advance();
                    Ok(Expr::Literal(Value::Float(-f)))
                }
                _ => {
                    let inner = self.parse_expr_bp(bp::UNARY)?;
                    Ok(Expr::op(Op::Neg, vec![inner]))
                }
            },
            TokenKind::Tilde => {
                let inner = self.parse_expr_bp(bp::UNARY)?;
                Ok(Expr::op(Op::BitNot, vec![inner]))
            }
            TokenKind::Bang => {
                let inner = self.parse_expr_bp(bp::UNARY)?;
                Ok(Expr::op(Op::Not, vec![inner]))
            }
            TokenKind::KwNot => {
                let inner = self.parse_expr_bp(bp::NOT_PREFIX)?;
                Ok(Expr::op(Op::Not, vec![inner]))
            }

            TokenKind::KwDistinct => {
                let inner = self.parse_expr_bp(0)?;
                Ok(Expr::Modifier {
                    modifier: Modifier::Distinct,
                    expr: Box::new(inner),
                })
            }

            // Grouping parens or an array literal.
            TokenKind::LeftParen => {
                let first = self.parse_expr_bp(0)?;
                if self.eat(&TokenKind::Comma) {
                    let mut items = vec![first];
                    loop {
                        items.push(self.parse_expr_bp(0)?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(&TokenKind::RightParen)?;
                    let values = literal_values(&items)
                        .ok_or_else(|| self.err_here("array literal may only hold values"))?;
                    Ok(Expr::Literal(Value::List(values)))
                } else {
                    self.expect(&TokenKind::RightParen)?;
                    Ok(first)
                }
            }

            TokenKind::Id(name) | TokenKind::QuotedId(name) => {
                let name = name.clone();
                self.parse_ident_expr(name)
            }

            TokenKind::Eof => Err(ParseError::at("unexpected end of expression", Some(&tok))),
            TokenKind::Error(msg) => Err(ParseError::at(msg.clone(), Some(&tok))),
            other => Err(ParseError::at(
                format!("unexpected token in expression: {other:?}"),
                Some(&tok),
            )),
        }
    }

    /// Parse `name`, a dotted path, or `name(args)`.
    fn parse_ident_expr(&mut self, name: String) -> Result<Expr, ParseError> {
        if self.at(&TokenKind::LeftParen) {
            return self.parse_function_call(name);
        }

        let mut parts = vec![name];
        while self.eat(&TokenKind::Dot) {
            let tok = self.advance();
            match tok.kind {
                TokenKind::Id(part) | TokenKind::QuotedId(part) => parts.push(part),
                ref other => {
                    return Err(ParseError::at(
                        format!("expected identifier after '.', got {other:?}"),
                        Some(&tok),
                    ));
                }
            }
        }
        let ident_name = parts.pop().unwrap_or_default();
        Ok(Expr::Id(Ident {
            qualifiers: parts,
            name: ident_name,
        }))
    }

    fn parse_function_call(&mut self, name: String) -> Result<Expr, ParseError> {
        let name = name.to_ascii_lowercase();
        self.expect(&TokenKind::LeftParen)?;

        let mut args = Vec::new();
        if self.eat(&TokenKind::Star) {
            args.push(Expr::Wildcard);
        } else if !self.at(&TokenKind::RightParen) {
            args.push(self.parse_expr_bp(0)?);
            while self.eat(&TokenKind::Comma) {
                args.push(self.parse_expr_bp(0)?);
            }
        }

        // `JSON_VALUE(doc, path RETURNING type)` captures the return type.
        let mut returning = None;
        if self.at(&TokenKind::KwReturning) {
            if name != "json_value" {
                return Err(self.err_here("RETURNING is only valid in json_value()"));
            }
            self.advance();
            let tok = self.advance();
            let type_name = match tok.kind {
                TokenKind::Id(ref n) | TokenKind::QuotedId(ref n) => n,
                ref other => {
                    return Err(ParseError::at(
                        format!("expected type name after RETURNING, got {other:?}"),
                        Some(&tok),
                    ));
                }
            };
            returning = Some(ReturningType::from_name(type_name).ok_or_else(|| {
                ParseError::at(
                    format!("unknown returning type {type_name}"),
                    Some(&tok),
                )
            })?);
        }

        self.expect(&TokenKind::RightParen)?;
        Ok(Expr::Func(FuncCall {
            name,
            args,
            returning,
        }))
    }

    // ── Infix ───────────────────────────────────────────────────────────

    fn infix_bp(&self) -> Option<(u8, u8)> {
        match self.peek_kind() {
            TokenKind::KwOr => Some(bp::OR),
            TokenKind::KwXor => Some(bp::XOR),
            TokenKind::KwAnd => Some(bp::AND),

            TokenKind::Eq
            | TokenKind::Ne
            | TokenKind::Lt
            | TokenKind::Le
            | TokenKind::Gt
            | TokenKind::Ge
            | TokenKind::KwLike
            | TokenKind::KwIn
            | TokenKind::KwBetween
            | TokenKind::KwIs => Some(bp::COMPARISON),

            // NOT LIKE / NOT IN / NOT BETWEEN
            TokenKind::KwNot => match self.tokens.get(self.pos + 1).map(|t| &t.kind) {
                Some(TokenKind::KwLike | TokenKind::KwIn | TokenKind::KwBetween) => {
                    Some(bp::COMPARISON)
                }
                _ => None,
            },

            TokenKind::Plus | TokenKind::Minus => Some(bp::ADD),
            TokenKind::Star
            | TokenKind::Slash
            | TokenKind::Percent
            | TokenKind::KwDiv
            | TokenKind::KwMod => Some(bp::MUL),
            TokenKind::Caret => Some(bp::BITXOR),

            _ => None,
        }
    }

    fn parse_infix(&mut self, lhs: Expr, r_bp: u8) -> Result<Expr, ParseError> {
        let tok = self.advance();
        match &tok.kind {
            TokenKind::KwOr => self.make_binop(lhs, Op::Or, r_bp),
            TokenKind::KwXor => self.make_binop(lhs, Op::Xor, r_bp),
            TokenKind::KwAnd => self.make_binop(lhs, Op::And, r_bp),
            TokenKind::Eq => self.make_binop(lhs, Op::Eq, r_bp),
            TokenKind::Ne => self.make_binop(lhs, Op::Ne, r_bp),
            TokenKind::Lt => self.make_binop(lhs, Op::Lt, r_bp),
            TokenKind::Le => self.make_binop(lhs, Op::Le, r_bp),
            TokenKind::Gt => self.make_binop(lhs, Op::Gt, r_bp),
            TokenKind::Ge => self.make_binop(lhs, Op::Ge, r_bp),
            TokenKind::KwLike => self.make_binop(lhs, Op::Like, r_bp),
            TokenKind::Plus => self.make_binop(lhs, Op::Add, r_bp),
            TokenKind::Minus => self.make_binop(lhs, Op::Sub, r_bp),
            TokenKind::Star => self.make_binop(lhs, Op::Mul, r_bp),
            TokenKind::Slash | TokenKind::KwDiv => self.make_binop(lhs, Op::Div, r_bp),
            TokenKind::Percent | TokenKind::KwMod => self.make_binop(lhs, Op::Mod, r_bp),
            TokenKind::Caret => self.make_binop(lhs, Op::BitXor, r_bp),

            // IS [NOT] NULL; equality against NULL re-renders as IS NULL.
            TokenKind::KwIs => {
                let not = self.eat(&TokenKind::KwNot);
                self.expect(&TokenKind::KwNull)?;
                let op = if not { Op::Ne } else { Op::Eq };
                Ok(Expr::binop(op, lhs, Expr::Literal(Value::Null)))
            }

            TokenKind::KwIn => self.parse_in(lhs, false),
            TokenKind::KwBetween => self.parse_between(lhs, false),

            TokenKind::KwNot => {
                let next = self.advance();
                match next.kind {
                    TokenKind::KwLike => self.make_binop(lhs, Op::NotLike, r_bp),
                    TokenKind::KwIn => self.parse_in(lhs, true),
                    TokenKind::KwBetween => self.parse_between(lhs, true),
                    ref other => Err(ParseError::at(
                        format!("expected LIKE/IN/BETWEEN after NOT, got {other:?}"),
                        Some(&next),
                    )),
                }
            }

            other => Err(ParseError::at(
                format!("unexpected infix token: {other:?}"),
                Some(&tok),
            )),
        }
    }

    fn make_binop(&mut self, lhs: Expr, op: Op, r_bp: u8) -> Result<Expr, ParseError> {
        let rhs = self.parse_expr_bp(r_bp)?;
        Ok(Expr::binop(op, lhs, rhs))
    }

    fn parse_in(&mut self, lhs: Expr, not: bool) -> Result<Expr, ParseError> {
        self.expect(&TokenKind::LeftParen)?;
        let mut items = vec![self.parse_expr_bp(0)?];
        while self.eat(&TokenKind::Comma) {
            items.push(self.parse_expr_bp(0)?);
        }
        self.expect(&TokenKind::RightParen)?;

        let op = if not { Op::NotIn } else { Op::In };
        // A pure value list collapses into one array literal.
        if let Some(values) = literal_values(&items) {
            return Ok(Expr::binop(op, lhs, Expr::Literal(Value::List(values))));
        }
        let mut args = vec![lhs];
        args.extend(items);
        Ok(Expr::op(op, args))
    }

    fn parse_between(&mut self, lhs: Expr, not: bool) -> Result<Expr, ParseError> {
        // Bounds parse above AND level so the AND conjunction token survives.
        let low = self.parse_expr_bp(bp::COMPARISON.0)?;
        if !self.eat(&TokenKind::KwAnd) {
            return Err(self.err_here("expected AND in BETWEEN expression"));
        }
        let high = self.parse_expr_bp(bp::COMPARISON.0)?;
        let op = if not { Op::NotBetween } else { Op::Between };
        Ok(Expr::op(op, vec![lhs, low, high]))
    }
}

/// Collapse a slice of literal expressions into their values, or `None` if
/// any element is not a literal.
fn literal_values(items: &[Expr]) -> Option<Vec<Value>> {
    items
        .iter()
        .map(|item| match item {
            Expr::Literal(v) => Some(v.clone()),
            _ => None,
        })
        .collect()
}
