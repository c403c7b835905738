//! Input conversions for the builder surface.
//!
//! `where_`/`having` accept a SQL template with positional values, a JSON
//! condition object, pre-parsed condition entries, or expression AST;
//! `order` accepts strings, JSON maps, pair lists, or expressions; write
//! commands accept attribute→value maps in several shapes. Every conversion
//! lands in the same AST the formatters consume.

use indexmap::IndexMap;

use grimoire_ast::{Expr, SortDirection};
use grimoire_error::Result;
use grimoire_parser::{conditions_from_json, parse_expr, parse_object, Conditions};
use grimoire_types::Value;

/// Anything that converts into WHERE/HAVING condition expressions.
pub trait IntoConditions {
    fn into_conditions(self) -> Result<Vec<Expr>>;
}

impl IntoConditions for &str {
    fn into_conditions(self) -> Result<Vec<Expr>> {
        Ok(vec![parse_expr(self, Vec::new())?])
    }
}

impl IntoConditions for (&str, Vec<Value>) {
    fn into_conditions(self) -> Result<Vec<Expr>> {
        Ok(vec![parse_expr(self.0, self.1)?])
    }
}

impl IntoConditions for (&str, Value) {
    fn into_conditions(self) -> Result<Vec<Expr>> {
        Ok(vec![parse_expr(self.0, vec![self.1])?])
    }
}

impl IntoConditions for serde_json::Value {
    fn into_conditions(self) -> Result<Vec<Expr>> {
        parse_object(&conditions_from_json(&self)?)
    }
}

impl IntoConditions for Conditions {
    fn into_conditions(self) -> Result<Vec<Expr>> {
        parse_object(&self)
    }
}

impl IntoConditions for Expr {
    fn into_conditions(self) -> Result<Vec<Expr>> {
        Ok(vec![self])
    }
}

impl IntoConditions for Vec<Expr> {
    fn into_conditions(self) -> Result<Vec<Expr>> {
        Ok(self)
    }
}

/// Anything that converts into ORDER BY entries.
///
/// Malformed direction tokens are tolerated: anything that is not `desc`
/// orders ascending on the literal column token.
pub trait IntoOrder {
    fn into_order(self) -> Result<Vec<(Expr, SortDirection)>>;
}

fn parse_order_token(token: &str) -> (Expr, SortDirection) {
    let mut parts = token.split_whitespace();
    let column = parts.next().unwrap_or_default();
    let direction = match parts.next() {
        Some(dir) if dir.eq_ignore_ascii_case("desc") => SortDirection::Desc,
        _ => SortDirection::Asc,
    };
    // Expression entries (function calls etc.) parse fully; anything that
    // does not parse falls back to the literal column token, ascending.
    let expr = parse_expr(column, Vec::new()).unwrap_or_else(|_| Expr::id(column));
    (expr, direction)
}

impl IntoOrder for &str {
    fn into_order(self) -> Result<Vec<(Expr, SortDirection)>> {
        Ok(self
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(parse_order_token)
            .collect())
    }
}

impl IntoOrder for serde_json::Value {
    fn into_order(self) -> Result<Vec<(Expr, SortDirection)>> {
        match self {
            serde_json::Value::Object(map) => Ok(map
                .iter()
                .map(|(column, dir)| {
                    let direction = match dir.as_str() {
                        Some(d) if d.eq_ignore_ascii_case("desc") => SortDirection::Desc,
                        _ => SortDirection::Asc,
                    };
                    (Expr::id(column.clone()), direction)
                })
                .collect()),
            serde_json::Value::String(s) => s.as_str().into_order(),
            other => Err(grimoire_error::Error::MalformedConditions {
                detail: other.to_string(),
            }),
        }
    }
}

impl IntoOrder for Vec<(&str, &str)> {
    fn into_order(self) -> Result<Vec<(Expr, SortDirection)>> {
        Ok(self
            .into_iter()
            .map(|(column, dir)| {
                let direction = if dir.eq_ignore_ascii_case("desc") {
                    SortDirection::Desc
                } else {
                    SortDirection::Asc
                };
                (Expr::id(column), direction)
            })
            .collect())
    }
}

impl IntoOrder for Expr {
    fn into_order(self) -> Result<Vec<(Expr, SortDirection)>> {
        Ok(vec![(self, SortDirection::Asc)])
    }
}

impl IntoOrder for (Expr, SortDirection) {
    fn into_order(self) -> Result<Vec<(Expr, SortDirection)>> {
        Ok(vec![self])
    }
}

/// Attribute→value data for write commands, keyed by attribute name.
/// `Expr`-valued entries (raw SQL fragments) bypass uncasting downstream.
pub trait IntoSets {
    fn into_sets(self) -> Result<IndexMap<String, SetValue>>;
}

/// One SET operand: a plain value (uncast through the column type) or a
/// pre-built expression passed through as-is.
#[derive(Debug, Clone)]
pub enum SetValue {
    Value(Value),
    Expr(Expr),
}

impl From<Value> for SetValue {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Expr> for SetValue {
    fn from(expr: Expr) -> Self {
        Self::Expr(expr)
    }
}

impl IntoSets for serde_json::Value {
    fn into_sets(self) -> Result<IndexMap<String, SetValue>> {
        match self {
            serde_json::Value::Object(map) => Ok(map
                .iter()
                .map(|(key, value)| {
                    (key.clone(), SetValue::Value(Value::from_json(value)))
                })
                .collect()),
            other => Err(grimoire_error::Error::MalformedConditions {
                detail: other.to_string(),
            }),
        }
    }
}

impl<S: Into<String>, V: Into<SetValue>> IntoSets for Vec<(S, V)> {
    fn into_sets(self) -> Result<IndexMap<String, SetValue>> {
        Ok(self
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect())
    }
}

impl IntoSets for IndexMap<String, Value> {
    fn into_sets(self) -> Result<IndexMap<String, SetValue>> {
        Ok(self
            .into_iter()
            .map(|(key, value)| (key, SetValue::Value(value)))
            .collect())
    }
}
