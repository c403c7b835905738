//! Query-object translator: MongoDB-style condition trees to expression AST.
//!
//! Produces the same [`Expr`] shapes as the text parser, so both syntaxes are
//! interchangeable inputs to the query builder. Conditions arrive as ordered
//! `(key, operand)` pairs; [`conditions_from_json`] bridges from a
//! `serde_json` object so callers can use the `json!` macro.

use grimoire_ast::{Expr, Ident, Op, Query};
use grimoire_error::{Error, Result};
use grimoire_types::Value;

use serde_json::Value as Json;

/// The right-hand side of one condition entry.
#[derive(Debug, Clone)]
pub enum Operand {
    /// A JSON tree: operator objects, logical branches, or a plain value.
    Json(Json),
    /// A plain value compared for equality (arrays become `IN`).
    Value(Value),
    /// A nested query; renders as `field IN (subquery)`.
    Subquery(Box<Query>),
    /// A pre-built expression compared for equality.
    Expr(Expr),
}

impl From<Json> for Operand {
    fn from(json: Json) -> Self {
        Self::Json(json)
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Query> for Operand {
    fn from(query: Query) -> Self {
        Self::Subquery(Box::new(query))
    }
}

impl From<Expr> for Operand {
    fn from(expr: Expr) -> Self {
        Self::Expr(expr)
    }
}

/// Ordered condition entries, one per object key.
pub type Conditions = Vec<(String, Operand)>;

/// Convert a `serde_json` object into ordered condition entries.
pub fn conditions_from_json(json: &Json) -> Result<Conditions> {
    match json {
        Json::Object(map) => Ok(map
            .iter()
            .map(|(key, value)| (key.clone(), Operand::Json(value.clone())))
            .collect()),
        other => Err(Error::MalformedConditions {
            detail: other.to_string(),
        }),
    }
}

/// Translate condition entries into expression AST, one expression per
/// top-level entry (implicitly AND-joined by the builder).
pub fn parse_object(conditions: &Conditions) -> Result<Vec<Expr>> {
    conditions
        .iter()
        .map(|(key, operand)| parse_entry(key, operand))
        .collect()
}

fn parse_entry(key: &str, operand: &Operand) -> Result<Expr> {
    if let Some(op) = logical_op(key) {
        let Operand::Json(json) = operand else {
            return Err(Error::MalformedConditions {
                detail: format!("{key} expects object or array operands"),
            });
        };
        return parse_logical(None, op, json);
    }

    match operand {
        Operand::Json(json) => parse_field_value(key, json),
        Operand::Value(value) => Ok(eq_expr(key, value.clone())),
        Operand::Subquery(query) => Ok(Expr::binop(
            Op::In,
            field_expr(key),
            Expr::Subquery(query.clone()),
        )),
        Operand::Expr(expr) => Ok(Expr::binop(Op::Eq, field_expr(key), expr.clone())),
    }
}

/// A field identifier; dotted keys carry their qualifiers.
fn field_expr(key: &str) -> Expr {
    let mut parts: Vec<String> = key.split('.').map(str::to_owned).collect();
    let name = parts.pop().unwrap_or_default();
    Expr::Id(Ident {
        qualifiers: parts,
        name,
    })
}

fn eq_expr(key: &str, value: Value) -> Expr {
    Expr::binop(Op::Eq, field_expr(key), Expr::Literal(value))
}

fn logical_op(key: &str) -> Option<Op> {
    match key {
        "$and" => Some(Op::And),
        "$or" => Some(Op::Or),
        "$not" => Some(Op::Not),
        _ => None,
    }
}

fn comparison_op(key: &str) -> Option<Op> {
    match key {
        "$eq" => Some(Op::Eq),
        "$ne" => Some(Op::Ne),
        "$gt" => Some(Op::Gt),
        "$gte" => Some(Op::Ge),
        "$lt" => Some(Op::Lt),
        "$lte" => Some(Op::Le),
        "$like" => Some(Op::Like),
        "$notLike" => Some(Op::NotLike),
        "$in" => Some(Op::In),
        "$nin" | "$notIn" => Some(Op::NotIn),
        "$between" => Some(Op::Between),
        "$notBetween" => Some(Op::NotBetween),
        _ => None,
    }
}

/// Interpret the value side of a `field: value` entry.
fn parse_field_value(field: &str, json: &Json) -> Result<Expr> {
    match json {
        Json::Object(map) if map.keys().any(|k| k.starts_with('$')) => {
            // Operator object: one comparison per key, AND-combined.
            let mut exprs = Vec::with_capacity(map.len());
            for (key, sub) in map {
                if let Some(op) = logical_op(key) {
                    // Nested logical under a field lifts the field into
                    // each branch.
                    exprs.push(parse_logical(Some(field), op, sub)?);
                } else if let Some(op) = comparison_op(key) {
                    exprs.push(comparison_expr(field, op, sub)?);
                } else {
                    return Err(Error::UnknownOperator { op: key.clone() });
                }
            }
            Ok(fold(Op::And, exprs))
        }
        // Plain values, arrays included: equality, with the formatter
        // rewriting array operands into IN.
        other => Ok(eq_expr(field, Value::from_json(other))),
    }
}

fn comparison_expr(field: &str, op: Op, json: &Json) -> Result<Expr> {
    match op {
        Op::In | Op::NotIn => match json {
            Json::Array(_) => Ok(Expr::binop(
                op,
                field_expr(field),
                Expr::Literal(Value::from_json(json)),
            )),
            other => Err(Error::MalformedConditions {
                detail: format!("{} expects an array, got {other}", op_key(op)),
            }),
        },
        Op::Between | Op::NotBetween => match json {
            Json::Array(bounds) if bounds.len() == 2 => Ok(Expr::op(
                op,
                vec![
                    field_expr(field),
                    Expr::Literal(Value::from_json(&bounds[0])),
                    Expr::Literal(Value::from_json(&bounds[1])),
                ],
            )),
            other => Err(Error::MalformedBetween {
                op: op_key(op).to_owned(),
                got: other.to_string(),
            }),
        },
        _ => Ok(Expr::binop(
            op,
            field_expr(field),
            Expr::Literal(Value::from_json(json)),
        )),
    }
}

/// Combine the branches of a logical operator.
///
/// `field` is present when the operator was nested under a field key, in
/// which case scalar branches compare that field and `$not` over a flat
/// scalar array degrades to `NOT IN`.
fn parse_logical(field: Option<&str>, op: Op, json: &Json) -> Result<Expr> {
    if op == Op::Not {
        if let (Some(field), Json::Array(items)) = (field, json) {
            if items.iter().all(is_scalar) {
                return Ok(Expr::binop(
                    Op::NotIn,
                    field_expr(field),
                    Expr::Literal(Value::from_json(json)),
                ));
            }
        }
    }

    let branches = branch_exprs(field, json)?;
    if branches.is_empty() {
        return Err(Error::MalformedConditions {
            detail: format!("{} with no operands", op_key(op)),
        });
    }
    match op {
        Op::Not => Ok(Expr::op(Op::Not, vec![fold(Op::And, branches)])),
        _ => Ok(fold(op, branches)),
    }
}

/// One expression per branch of a logical operand.
fn branch_exprs(field: Option<&str>, json: &Json) -> Result<Vec<Expr>> {
    match json {
        Json::Array(items) => items.iter().map(|item| branch_expr(field, item)).collect(),
        Json::Object(map) => map
            .iter()
            .map(|(key, sub)| match field {
                Some(field) if key.starts_with('$') => {
                    if let Some(op) = logical_op(key) {
                        parse_logical(Some(field), op, sub)
                    } else if let Some(op) = comparison_op(key) {
                        comparison_expr(field, op, sub)
                    } else {
                        Err(Error::UnknownOperator { op: key.clone() })
                    }
                }
                _ => parse_entry(key, &Operand::Json(sub.clone())),
            })
            .collect(),
        other => match field {
            Some(field) => Ok(vec![eq_expr(field, Value::from_json(other))]),
            None => Err(Error::MalformedConditions {
                detail: other.to_string(),
            }),
        },
    }
}

fn branch_expr(field: Option<&str>, json: &Json) -> Result<Expr> {
    match json {
        Json::Object(_) => match field {
            Some(field) => parse_field_value(field, json),
            None => {
                let exprs = parse_object(&conditions_from_json(json)?)?;
                if exprs.is_empty() {
                    return Err(Error::MalformedConditions {
                        detail: json.to_string(),
                    });
                }
                Ok(fold(Op::And, exprs))
            }
        },
        other => match field {
            Some(field) => Ok(eq_expr(field, Value::from_json(other))),
            None => Err(Error::MalformedConditions {
                detail: other.to_string(),
            }),
        },
    }
}

fn is_scalar(json: &Json) -> bool {
    !matches!(json, Json::Object(_) | Json::Array(_))
}

/// Left-associative fold into a binary operator tree.
fn fold(op: Op, mut exprs: Vec<Expr>) -> Expr {
    let mut acc = exprs.remove(0);
    for next in exprs {
        acc = Expr::binop(op, acc, next);
    }
    acc
}

fn op_key(op: Op) -> &'static str {
    match op {
        Op::Not => "$not",
        Op::In => "$in",
        Op::NotIn => "$notIn",
        Op::Between => "$between",
        Op::NotBetween => "$notBetween",
        Op::And => "$and",
        Op::Or => "$or",
        _ => "$op",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(json: Json) -> Vec<Expr> {
        parse_object(&conditions_from_json(&json).unwrap()).unwrap()
    }

    #[test]
    fn test_plain_equality() {
        let exprs = parse(json!({"title": "New Post"}));
        assert_eq!(
            exprs,
            vec![Expr::binop(
                Op::Eq,
                Expr::id("title"),
                Expr::literal("New Post")
            )]
        );
    }

    #[test]
    fn test_operator_object() {
        let exprs = parse(json!({"wordCount": {"$gt": 1000}}));
        assert_eq!(
            exprs,
            vec![Expr::binop(
                Op::Gt,
                Expr::id("wordCount"),
                Expr::literal(1000)
            )]
        );
    }

    #[test]
    fn test_multiple_operator_keys_and_combined() {
        let exprs = parse(json!({"wordCount": {"$gte": 100, "$lt": 1000}}));
        assert_eq!(exprs.len(), 1);
        let Expr::Op { op: Op::And, args } = &exprs[0] else {
            panic!("expected AND");
        };
        assert_eq!(args[0].operator(), Some(Op::Ge));
        assert_eq!(args[1].operator(), Some(Op::Lt));
    }

    #[test]
    fn test_array_value_is_plain_equality_for_in_rewrite() {
        let exprs = parse(json!({"id": [1, 2, 3]}));
        assert_eq!(
            exprs,
            vec![Expr::binop(
                Op::Eq,
                Expr::id("id"),
                Expr::Literal(Value::List(vec![
                    Value::Integer(1),
                    Value::Integer(2),
                    Value::Integer(3),
                ]))
            )]
        );
    }

    #[test]
    fn test_top_level_or_over_condition_objects() {
        let exprs = parse(json!({"$or": [{"title": "a"}, {"wordCount": {"$gt": 1}}]}));
        assert_eq!(exprs.len(), 1);
        let Expr::Op { op: Op::Or, args } = &exprs[0] else {
            panic!("expected OR");
        };
        assert_eq!(args[0].operator(), Some(Op::Eq));
        assert_eq!(args[1].operator(), Some(Op::Gt));
    }

    #[test]
    fn test_field_lifted_or() {
        // { title: { $or: ["a", "b"] } } → title = 'a' OR title = 'b'
        let exprs = parse(json!({"title": {"$or": ["a", "b"]}}));
        let Expr::Op { op: Op::Or, args } = &exprs[0] else {
            panic!("expected OR");
        };
        assert_eq!(
            args[0],
            Expr::binop(Op::Eq, Expr::id("title"), Expr::literal("a"))
        );
        assert_eq!(
            args[1],
            Expr::binop(Op::Eq, Expr::id("title"), Expr::literal("b"))
        );
    }

    #[test]
    fn test_not_over_scalar_array_degrades_to_not_in() {
        let exprs = parse(json!({"id": {"$not": [1, 2, 3]}}));
        assert_eq!(
            exprs,
            vec![Expr::binop(
                Op::NotIn,
                Expr::id("id"),
                Expr::Literal(Value::List(vec![
                    Value::Integer(1),
                    Value::Integer(2),
                    Value::Integer(3),
                ]))
            )]
        );
    }

    #[test]
    fn test_not_over_conditions() {
        let exprs = parse(json!({"$not": {"title": "a", "wordCount": 1}}));
        let Expr::Op { op: Op::Not, args } = &exprs[0] else {
            panic!("expected NOT");
        };
        assert_eq!(args[0].operator(), Some(Op::And));
    }

    #[test]
    fn test_between_requires_two_bounds() {
        let exprs = parse(json!({"id": {"$between": [1, 10]}}));
        assert_eq!(
            exprs,
            vec![Expr::op(
                Op::Between,
                vec![Expr::id("id"), Expr::literal(1), Expr::literal(10)],
            )]
        );

        let conditions = conditions_from_json(&json!({"id": {"$between": [1]}})).unwrap();
        let err = parse_object(&conditions).unwrap_err();
        assert!(err.to_string().contains("two bounds"));
    }

    #[test]
    fn test_unknown_operator_is_error() {
        let conditions = conditions_from_json(&json!({"id": {"$near": 1}})).unwrap();
        let err = parse_object(&conditions).unwrap_err();
        assert!(err.to_string().contains("$near"));
    }

    #[test]
    fn test_null_equality() {
        let exprs = parse(json!({"deletedAt": null}));
        assert_eq!(
            exprs,
            vec![Expr::binop(
                Op::Eq,
                Expr::id("deletedAt"),
                Expr::Literal(Value::Null)
            )]
        );
    }

    #[test]
    fn test_subquery_operand_renders_in() {
        let query = Query::select_from("Comment", "comments");
        let conditions: Conditions =
            vec![("id".to_owned(), Operand::from(query.clone()))];
        let exprs = parse_object(&conditions).unwrap();
        assert_eq!(
            exprs,
            vec![Expr::binop(
                Op::In,
                Expr::id("id"),
                Expr::Subquery(Box::new(query))
            )]
        );
    }

    #[test]
    fn test_dotted_key_carries_qualifier() {
        let exprs = parse(json!({"posts.title": "a"}));
        let Expr::Op { args, .. } = &exprs[0] else {
            panic!("expected op");
        };
        assert_eq!(args[0], Expr::qualified("posts", "title"));
    }
}
