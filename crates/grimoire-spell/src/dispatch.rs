//! Result dispatch: nested driver rows back into object graphs.
//!
//! A single non-grouped aggregate unwraps to a bare scalar. Otherwise each
//! row's fields partition by table qualifier: base fields merge into one
//! record, joined qualifiers attach as singleton related objects or
//! per-parent collections keyed by the join's one-to-many flag, with the
//! JOIN fan-out de-duplicated by primary key. Records instantiate under
//! attribute names only when every selected column belongs to the model's
//! declared attributes and no GROUP BY is present; otherwise rows stay
//! plain keyed records.

use std::sync::Arc;

use indexmap::IndexMap;

use grimoire_ast::{Expr, FuncCall, Query};
use grimoire_error::Result;
use grimoire_spellbook::NestedRow;
use grimoire_types::{ModelDef, Schema, Value};

/// One reconstructed record: column (or attribute) values plus related
/// records keyed by association qualifier.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    pub values: IndexMap<String, Value>,
    pub related: IndexMap<String, Related>,
}

impl Record {
    /// Value accessor.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// Related records attached through a join.
#[derive(Clone, Debug, PartialEq)]
pub enum Related {
    One(Option<Record>),
    Many(Vec<Record>),
}

/// What a spell execution produces.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Records(Vec<Record>),
    Scalar(Value),
    Write {
        insert_id: Option<i64>,
        affected_rows: u64,
    },
}

/// Reconstruct records (or a scalar) from re-nested rows.
pub fn dispatch(schema: &Schema, query: &Query, rows: Vec<NestedRow>) -> Result<Payload> {
    let model = schema.require_model(&query.model)?;

    if let Some(alias) = single_aggregate_alias(query) {
        return Ok(Payload::Scalar(scalar_value(&rows, alias)));
    }

    let instantiable = is_instantiable(schema, query, &model);
    let base_qualifier = model.table_alias.as_str();
    let pk_column = model.primary_column().to_owned();

    let mut records: Vec<Record> = Vec::new();
    for row in rows {
        let mut base_values: IndexMap<String, Value> = IndexMap::new();
        let mut related: Vec<(String, Record, bool)> = Vec::new();

        for (qualifier, columns) in row {
            if qualifier == base_qualifier || qualifier == model.table {
                base_values.extend(columns);
            } else if let Some(join) = query.joins.get(&qualifier) {
                let child_model = schema.require_model(&join.model)?;
                // A LEFT JOIN with no match reports all-NULL fields.
                if columns.values().all(Value::is_null) {
                    if join.has_many {
                        continue;
                    }
                    related.push((qualifier, Record::default(), false));
                    continue;
                }
                let child = Record {
                    values: name_values(&child_model, columns, instantiable),
                    related: IndexMap::new(),
                };
                related.push((qualifier, child, join.has_many));
            } else {
                // Unknown qualifier: keep the fields on the base record
                // rather than dropping data.
                base_values.extend(columns);
            }
        }

        let pk = base_values.get(&pk_column).cloned();
        let values = name_values(&model, base_values, instantiable);
        let pk_key = if instantiable {
            model.primary_key.clone()
        } else {
            pk_column.clone()
        };

        // The JOIN fan-out repeats parent rows; fold repeats into the
        // existing record, matching on primary key.
        let existing = match (&pk, query.joins.is_empty()) {
            (Some(pk_value), false) if !pk_value.is_null() => records
                .iter()
                .position(|r| r.values.get(&pk_key) == Some(pk_value)),
            _ => None,
        };

        let index = match existing {
            Some(index) => index,
            None => {
                records.push(Record {
                    values,
                    related: IndexMap::new(),
                });
                records.len() - 1
            }
        };
        let target = &mut records[index];

        for (qualifier, child, has_many) in related {
            if has_many {
                let slot = target
                    .related
                    .entry(qualifier)
                    .or_insert_with(|| Related::Many(Vec::new()));
                if let Related::Many(children) = slot {
                    if !children.contains(&child) {
                        children.push(child);
                    }
                }
            } else {
                let child = if child.values.is_empty() {
                    None
                } else {
                    Some(child)
                };
                target
                    .related
                    .entry(qualifier)
                    .or_insert(Related::One(child));
            }
        }
    }

    // Joined one-to-many qualifiers with zero matches still expose an empty
    // collection.
    for record in &mut records {
        for (qualifier, join) in &query.joins {
            if join.has_many && !record.related.contains_key(qualifier) {
                record
                    .related
                    .insert(qualifier.clone(), Related::Many(Vec::new()));
            }
        }
    }

    Ok(Payload::Records(records))
}

/// Column-name keys become attribute-name keys when the record is a full
/// model instance.
fn name_values(
    model: &Arc<ModelDef>,
    columns: IndexMap<String, Value>,
    instantiable: bool,
) -> IndexMap<String, Value> {
    if !instantiable {
        return columns;
    }
    columns
        .into_iter()
        .map(|(column, value)| {
            let key = model
                .attributes
                .values()
                .find(|a| a.column_name == column)
                .map_or(column, |a| a.name.clone());
            (key, value)
        })
        .collect()
}

/// The alias of the single selected aggregate, when the query selected
/// exactly one aggregate expression and no grouping.
fn single_aggregate_alias(query: &Query) -> Option<&str> {
    if !query.groups.is_empty() || query.columns.len() != 1 {
        return None;
    }
    match &query.columns[0] {
        Expr::Alias { expr, alias } if is_aggregate(expr) => Some(alias.as_str()),
        Expr::Func(call) if is_aggregate_call(call) => Some(call.name.as_str()),
        _ => None,
    }
}

fn is_aggregate(expr: &Expr) -> bool {
    matches!(expr, Expr::Func(call) if is_aggregate_call(call))
}

fn is_aggregate_call(call: &FuncCall) -> bool {
    matches!(
        call.name.as_str(),
        "count" | "avg" | "min" | "max" | "sum" | "average" | "minimum" | "maximum"
    )
}

/// Unwrap the aggregate cell. COUNT over zero rows is 0, never NULL or an
/// empty collection.
fn scalar_value(rows: &[NestedRow], alias: &str) -> Value {
    let found = rows.first().and_then(|row| {
        row.values()
            .find_map(|columns| columns.get(alias))
            .or_else(|| row.values().next().and_then(|columns| columns.values().next()))
    });
    match found {
        Some(value) => coerce_numeric(value),
        None if alias == "count" => Value::Integer(0),
        None => Value::Null,
    }
}

/// Drivers frequently hand aggregates back as text; bring numbers home.
fn coerce_numeric(value: &Value) -> Value {
    if let Value::Text(s) = value {
        if let Ok(i) = s.trim().parse::<i64>() {
            return Value::Integer(i);
        }
        if let Ok(f) = s.trim().parse::<f64>() {
            return Value::Float(f);
        }
    }
    value.clone()
}

/// A record instantiates as a full model object only if every selected
/// column belongs to its qualifier's declared attribute set and no GROUP BY
/// is present.
fn is_instantiable(schema: &Schema, query: &Query, model: &Arc<ModelDef>) -> bool {
    if !query.groups.is_empty() {
        return false;
    }
    if query.columns.is_empty() {
        return true;
    }
    query.columns.iter().all(|column| match column {
        Expr::Id(ident) => {
            let target = match ident.qualifier() {
                None => Some(Arc::clone(model)),
                Some(q) if q == model.table_alias || q == model.table => {
                    Some(Arc::clone(model))
                }
                Some(q) => query
                    .joins
                    .get(q)
                    .and_then(|join| schema.model(&join.model)),
            };
            target.is_some_and(|m| {
                m.attribute(&ident.name).is_some()
                    || m.attributes.values().any(|a| a.column_name == ident.name)
            })
        }
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use grimoire_ast::{Join, Op};
    use grimoire_types::{AttributeDef, ColumnType, ModelDef};

    fn schema() -> Schema {
        let mut schema = Schema::new();
        schema.define(
            ModelDef::new("Post", "articles")
                .with_attribute(AttributeDef::new("id", ColumnType::BigInt).primary())
                .with_attribute(AttributeDef::new("title", ColumnType::Varchar(255))),
        );
        schema.define(
            ModelDef::new("Comment", "comments")
                .with_attribute(AttributeDef::new("id", ColumnType::BigInt).primary())
                .with_attribute(
                    AttributeDef::new("articleId", ColumnType::BigInt).column("article_id"),
                )
                .with_attribute(AttributeDef::new("content", ColumnType::Text)),
        );
        schema.connect().unwrap();
        schema
    }

    fn nested(entries: &[(&str, &[(&str, Value)])]) -> NestedRow {
        entries
            .iter()
            .map(|(qualifier, columns)| {
                (
                    (*qualifier).to_owned(),
                    columns
                        .iter()
                        .map(|(name, value)| ((*name).to_owned(), value.clone()))
                        .collect(),
                )
            })
            .collect()
    }

    fn joined_query() -> Query {
        let mut query = Query::select_from("Post", "articles");
        query.joins.insert(
            "comments".to_owned(),
            Join {
                model: "Comment".to_owned(),
                on: Expr::binop(
                    Op::Eq,
                    Expr::qualified("articles", "id"),
                    Expr::qualified("comments", "articleId"),
                ),
                has_many: true,
            },
        );
        query
    }

    #[test]
    fn test_fan_out_dedup_by_primary_key() {
        let schema = schema();
        let query = joined_query();
        let rows = vec![
            nested(&[
                ("articles", &[("id", Value::Integer(1)), ("title", Value::from("a"))]),
                ("comments", &[
                    ("id", Value::Integer(10)),
                    ("article_id", Value::Integer(1)),
                    ("content", Value::from("one")),
                ]),
            ]),
            nested(&[
                ("articles", &[("id", Value::Integer(1)), ("title", Value::from("a"))]),
                ("comments", &[
                    ("id", Value::Integer(11)),
                    ("article_id", Value::Integer(1)),
                    ("content", Value::from("two")),
                ]),
            ]),
            nested(&[
                ("articles", &[("id", Value::Integer(2)), ("title", Value::from("b"))]),
                ("comments", &[
                    ("id", Value::Null),
                    ("article_id", Value::Null),
                    ("content", Value::Null),
                ]),
            ]),
        ];
        let Payload::Records(records) = dispatch(&schema, &query, rows).unwrap() else {
            panic!("expected records");
        };
        assert_eq!(records.len(), 2);
        let Related::Many(children) = &records[0].related["comments"] else {
            panic!("expected many");
        };
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].values["content"], Value::from("one"));
        let Related::Many(children) = &records[1].related["comments"] else {
            panic!("expected many");
        };
        assert!(children.is_empty());
    }

    #[test]
    fn test_instantiable_records_use_attribute_names() {
        let schema = schema();
        let query = joined_query();
        let rows = vec![nested(&[
            ("articles", &[("id", Value::Integer(1)), ("title", Value::from("a"))]),
            ("comments", &[
                ("id", Value::Integer(10)),
                ("article_id", Value::Integer(1)),
                ("content", Value::from("one")),
            ]),
        ])];
        let Payload::Records(records) = dispatch(&schema, &query, rows).unwrap() else {
            panic!("expected records");
        };
        let Related::Many(children) = &records[0].related["comments"] else {
            panic!("expected many");
        };
        // article_id names back to the attribute articleId.
        assert_eq!(children[0].values["articleId"], Value::Integer(1));
    }

    #[test]
    fn test_grouped_rows_stay_plain() {
        let schema = schema();
        let mut query = Query::select_from("Post", "articles");
        query.groups.push(Expr::id("title"));
        query.columns.push(Expr::id("title"));
        query.columns.push(Expr::alias(
            Expr::func("count", vec![Expr::Wildcard]),
            "count",
        ));
        let rows = vec![nested(&[(
            "articles",
            &[("title", Value::from("a")), ("count", Value::Integer(2))],
        )])];
        let Payload::Records(records) = dispatch(&schema, &query, rows).unwrap() else {
            panic!("expected records");
        };
        assert_eq!(records[0].values["count"], Value::Integer(2));
    }

    #[test]
    fn test_single_aggregate_unwraps_to_scalar() {
        let schema = schema();
        let mut query = Query::select_from("Post", "articles");
        query.columns.push(Expr::alias(
            Expr::func("count", vec![Expr::Wildcard]),
            "count",
        ));
        let rows = vec![nested(&[("articles", &[("count", Value::Integer(42))])])];
        assert_eq!(
            dispatch(&schema, &query, rows).unwrap(),
            Payload::Scalar(Value::Integer(42))
        );
    }

    #[test]
    fn test_count_on_zero_rows_is_zero() {
        let schema = schema();
        let mut query = Query::select_from("Post", "articles");
        query.columns.push(Expr::alias(
            Expr::func("count", vec![Expr::Wildcard]),
            "count",
        ));
        assert_eq!(
            dispatch(&schema, &query, Vec::new()).unwrap(),
            Payload::Scalar(Value::Integer(0))
        );
    }

    #[test]
    fn test_aggregate_text_coerces_to_number() {
        let schema = schema();
        let mut query = Query::select_from("Post", "articles");
        query.columns.push(Expr::alias(
            Expr::func("count", vec![Expr::Wildcard]),
            "count",
        ));
        let rows = vec![nested(&[("articles", &[("count", Value::from("17"))])])];
        assert_eq!(
            dispatch(&schema, &query, rows).unwrap(),
            Payload::Scalar(Value::Integer(17))
        );
    }
}
