//! Expression and query AST node types for grimoire.
//!
//! The expression parser and the query-object translator both produce trees
//! of [`Expr`]; the query builder assembles them into a [`Query`]; the
//! dialect spellbooks render both back into parameterized SQL. Keeping the
//! query AST here, next to the expressions that embed it, is what lets a
//! subquery be an ordinary node instead of a circular reference between the
//! builder and the translator.

mod hint;
mod op;
mod query;

pub use hint::{CommentHint, Hint, IndexHint, IndexHintKind, IndexHintScope};
pub use op::{precedes, Op};
pub use query::{Command, Join, Query, Sets, SortDirection};

use std::fmt;

use grimoire_types::Value;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// A possibly-qualified identifier like `posts.title` or just `title`.
#[derive(Clone, Debug, PartialEq)]
pub struct Ident {
    /// Leading qualifiers, outermost first (`a.b.c` → `["a", "b"]`).
    pub qualifiers: Vec<String>,
    /// The identifier itself.
    pub name: String,
}

impl Ident {
    /// Create an unqualified identifier.
    #[must_use]
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            qualifiers: Vec::new(),
            name: name.into(),
        }
    }

    /// Create a qualified identifier.
    #[must_use]
    pub fn qualified(qualifier: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            qualifiers: vec![qualifier.into()],
            name: name.into(),
        }
    }

    /// The innermost qualifier, if any.
    #[must_use]
    pub fn qualifier(&self) -> Option<&str> {
        self.qualifiers.last().map(String::as_str)
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for q in &self.qualifiers {
            write!(f, "{q}.")?;
        }
        f.write_str(&self.name)
    }
}

// ---------------------------------------------------------------------------
// Function calls
// ---------------------------------------------------------------------------

/// Return types accepted by `JSON_VALUE(doc, path RETURNING type)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturningType {
    Char,
    Decimal,
    Double,
    Float,
    SignedInteger,
    UnsignedInteger,
}

impl ReturningType {
    /// Parse a RETURNING type name, case-insensitively.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "CHAR" => Some(Self::Char),
            "DECIMAL" => Some(Self::Decimal),
            "DOUBLE" => Some(Self::Double),
            "FLOAT" => Some(Self::Float),
            "SIGNED" => Some(Self::SignedInteger),
            "UNSIGNED" => Some(Self::UnsignedInteger),
            _ => None,
        }
    }

    /// SQL spelling.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Char => "CHAR",
            Self::Decimal => "DECIMAL",
            Self::Double => "DOUBLE",
            Self::Float => "FLOAT",
            Self::SignedInteger => "SIGNED",
            Self::UnsignedInteger => "UNSIGNED",
        }
    }
}

/// A function invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct FuncCall {
    /// Function name, lowercased by the parser.
    pub name: String,
    pub args: Vec<Expr>,
    /// Optional `RETURNING type` clause (`JSON_VALUE` only).
    pub returning: Option<ReturningType>,
}

// ---------------------------------------------------------------------------
// Modifiers
// ---------------------------------------------------------------------------

/// Selection modifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Modifier {
    Distinct,
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Distinct => f.write_str("DISTINCT"),
        }
    }
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

/// An expression node.
///
/// Invariants the formatter relies on: every non-leaf node's `args` are
/// themselves valid expressions; a `Literal` holding a [`Value::List`] is an
/// `IN (...)` candidate; a `Literal(Null)` compared with `=`/`!=` renders as
/// `IS [NOT] NULL`.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Identifier, optionally table-qualified.
    Id(Ident),
    /// Literal scalar or array value.
    Literal(Value),
    /// Function call.
    Func(FuncCall),
    /// Operator application; `args` has 1–3 entries depending on arity.
    Op { op: Op, args: Vec<Expr> },
    /// Aliased sub-expression (`expr AS alias`).
    Alias { expr: Box<Expr>, alias: String },
    /// Modifier such as `DISTINCT` over a sub-expression.
    Modifier { modifier: Modifier, expr: Box<Expr> },
    /// `*`.
    Wildcard,
    /// A nested query, rendered parenthesized.
    Subquery(Box<Query>),
    /// Opaque pass-through SQL text.
    Raw(String),
}

impl Expr {
    /// Unqualified identifier.
    #[must_use]
    pub fn id(name: impl Into<String>) -> Self {
        Self::Id(Ident::bare(name))
    }

    /// Qualified identifier.
    #[must_use]
    pub fn qualified(qualifier: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Id(Ident::qualified(qualifier, name))
    }

    /// Literal value.
    #[must_use]
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// Operator application. The arity is the caller's responsibility; the
    /// formatter checks it when rendering.
    #[must_use]
    pub fn op(op: Op, args: Vec<Expr>) -> Self {
        Self::Op { op, args }
    }

    /// Binary operator application.
    #[must_use]
    pub fn binop(op: Op, left: Expr, right: Expr) -> Self {
        Self::Op {
            op,
            args: vec![left, right],
        }
    }

    /// Function call without a RETURNING clause.
    #[must_use]
    pub fn func(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::Func(FuncCall {
            name: name.into(),
            args,
            returning: None,
        })
    }

    /// Aliased expression.
    #[must_use]
    pub fn alias(expr: Expr, alias: impl Into<String>) -> Self {
        Self::Alias {
            expr: Box::new(expr),
            alias: alias.into(),
        }
    }

    /// Raw SQL text.
    #[must_use]
    pub fn raw(text: impl Into<String>) -> Self {
        Self::Raw(text.into())
    }

    /// The operator of an `Op` node.
    #[must_use]
    pub fn operator(&self) -> Option<Op> {
        match self {
            Self::Op { op, .. } => Some(*op),
            _ => None,
        }
    }

    /// Whether this node is a logical conjunction/disjunction/negation.
    #[must_use]
    pub fn is_logical(&self) -> bool {
        matches!(
            self.operator(),
            Some(Op::And | Op::Or | Op::Xor | Op::Not)
        )
    }
}

// ---------------------------------------------------------------------------
// Traversal
// ---------------------------------------------------------------------------

/// Pre-order traversal visiting every node, including nested `args`.
/// Subqueries are visited as single nodes; their inner query is opaque here.
pub fn walk_expr(expr: &Expr, visitor: &mut impl FnMut(&Expr)) {
    visitor(expr);
    match expr {
        Expr::Func(FuncCall { args, .. }) | Expr::Op { args, .. } => {
            for arg in args {
                walk_expr(arg, visitor);
            }
        }
        Expr::Alias { expr, .. } | Expr::Modifier { expr, .. } => walk_expr(expr, visitor),
        Expr::Id(_) | Expr::Literal(_) | Expr::Wildcard | Expr::Subquery(_) | Expr::Raw(_) => {}
    }
}

/// Structural copy with optional node substitution.
///
/// `transform` is consulted for every node before it is copied; returning
/// `Some` replaces that node wholesale (the replacement is not descended
/// into), returning `None` copies it structurally.
pub fn copy_expr(expr: &Expr, transform: &mut impl FnMut(&Expr) -> Option<Expr>) -> Expr {
    if let Some(replacement) = transform(expr) {
        return replacement;
    }
    match expr {
        Expr::Func(FuncCall {
            name,
            args,
            returning,
        }) => Expr::Func(FuncCall {
            name: name.clone(),
            args: args.iter().map(|a| copy_expr(a, transform)).collect(),
            returning: *returning,
        }),
        Expr::Op { op, args } => Expr::Op {
            op: *op,
            args: args.iter().map(|a| copy_expr(a, transform)).collect(),
        },
        Expr::Alias { expr, alias } => Expr::Alias {
            expr: Box::new(copy_expr(expr, transform)),
            alias: alias.clone(),
        },
        Expr::Modifier { modifier, expr } => Expr::Modifier {
            modifier: *modifier,
            expr: Box::new(copy_expr(expr, transform)),
        },
        other => other.clone(),
    }
}
