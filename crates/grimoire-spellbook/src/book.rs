//! The `Spellbook` trait: per-dialect formatting of full statements and
//! post-processing of driver result shapes.
//!
//! The default method bodies are the MySQL-flavored base behavior; the
//! PostgreSQL and SQLite books override the forms that diverge (placeholder
//! syntax, upsert clause, insert-id recovery, row re-nesting).

use std::sync::Arc;

use indexmap::IndexMap;

use grimoire_ast::{Command, Expr, Query, Sets};
use grimoire_error::{Error, Result};
use grimoire_types::{ModelDef, Schema, Value};

use crate::driver::{NestedRow, QueryOutcome, Rows, SqlStatement, StatementKind};
use crate::format::{
    comment_hints_sql, format_conditions, format_expr, format_orders, format_select, limit_sql,
    FormatContext,
};
use crate::Dialect;

/// Dialect-specific statement formatter and result shaper.
pub trait Spellbook: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Format a query into one parameterized statement, dispatching on its
    /// command.
    fn format(&self, schema: &Schema, query: &Query) -> Result<SqlStatement> {
        let ctx = FormatContext::new(schema, query, self.dialect())?;
        let mut values = Vec::new();
        let sql = match query.command {
            Command::Select => format_select(&ctx, &mut values)?,
            Command::Insert | Command::BulkInsert => self.format_insert(&ctx, &mut values)?,
            Command::Update => self.format_update(&ctx, &mut values)?,
            Command::Delete => self.format_delete(&ctx, &mut values)?,
            Command::Upsert => self.format_upsert(&ctx, &mut values)?,
        };
        let statement = SqlStatement {
            sql,
            values,
            kind: if query.command.is_read() {
                StatementKind::Read
            } else {
                StatementKind::Write
            },
            nest_tables: query.command.is_read() && !query.joins.is_empty(),
        };
        Ok(self.finalize(statement))
    }

    /// Last-pass statement rewriting (placeholder numbering on PostgreSQL).
    fn finalize(&self, statement: SqlStatement) -> SqlStatement {
        statement
    }

    /// `INSERT INTO t (cols) VALUES (...)[, (...)]`.
    fn format_insert(&self, ctx: &FormatContext, values: &mut Vec<Value>) -> Result<String> {
        let (columns, rows) = insert_rows(ctx)?;
        let mut sql = insert_prefix(ctx, &columns, &rows, values)?;
        if let Some(clause) = self.returning_clause(ctx) {
            sql.push(' ');
            sql.push_str(&clause);
        }
        Ok(sql)
    }

    /// Clause appended to INSERT to recover the generated key, where the
    /// dialect needs one.
    fn returning_clause(&self, _ctx: &FormatContext) -> Option<String> {
        None
    }

    /// `UPDATE t SET ... [WHERE ...] [ORDER BY ...] [LIMIT n]`.
    fn format_update(&self, ctx: &FormatContext, values: &mut Vec<Value>) -> Result<String> {
        let Some(Sets::One(sets)) = ctx.query.sets.as_ref() else {
            return Err(Error::EmptySets {
                command: "UPDATE".to_owned(),
            });
        };
        if sets.is_empty() {
            return Err(Error::EmptySets {
                command: "UPDATE".to_owned(),
            });
        }

        let mut sql = String::from("UPDATE ");
        let hints = comment_hints_sql(ctx.query);
        if !hints.is_empty() {
            sql.push_str(&hints);
            sql.push(' ');
        }
        sql.push_str(&ctx.quote(&ctx.model.table));
        sql.push_str(" SET ");
        sql.push_str(&set_clause(ctx, sets, values)?);
        if !ctx.query.wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&format_conditions(ctx, &ctx.query.wheres, values)?);
        }
        if !ctx.query.orders.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&format_orders(ctx, values)?);
        }
        sql.push_str(&limit_sql(ctx));
        Ok(sql)
    }

    /// `DELETE FROM t [WHERE ...]`.
    fn format_delete(&self, ctx: &FormatContext, values: &mut Vec<Value>) -> Result<String> {
        let mut sql = String::from("DELETE ");
        let hints = comment_hints_sql(ctx.query);
        if !hints.is_empty() {
            sql.push_str(&hints);
            sql.push(' ');
        }
        sql.push_str("FROM ");
        sql.push_str(&ctx.quote(&ctx.model.table));
        if !ctx.query.wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&format_conditions(ctx, &ctx.query.wheres, values)?);
        }
        Ok(sql)
    }

    /// Upsert in the MySQL form: `... ON DUPLICATE KEY UPDATE c = VALUES(c)`.
    fn format_upsert(&self, ctx: &FormatContext, values: &mut Vec<Value>) -> Result<String> {
        let (columns, rows) = insert_rows(ctx)?;
        let mut sql = insert_prefix(ctx, &columns, &rows, values)?;
        sql.push_str(" ON DUPLICATE KEY UPDATE ");
        let pk = ctx.model.primary_column();
        let updates: Vec<String> = columns
            .iter()
            .filter(|col| col.as_str() != pk)
            .map(|col| format!("{0} = VALUES({0})", ctx.quote(col)))
            .collect();
        if updates.is_empty() {
            // Every column is the key; degrade to a no-op assignment.
            sql.push_str(&format!("{0} = {0}", ctx.quote(pk)));
        } else {
            sql.push_str(&updates.join(", "));
        }
        Ok(sql)
    }

    /// Re-nest driver rows into qualifier → column → value maps, casting
    /// values back through the model's column types.
    ///
    /// Base behavior expects the MySQL shapes: table-qualified rows when the
    /// statement requested `nest_tables`, flat single-table rows otherwise.
    fn nest_rows(
        &self,
        schema: &Schema,
        query: &Query,
        outcome: &QueryOutcome,
    ) -> Result<Vec<NestedRow>> {
        let base = schema.require_model(&query.model)?;
        let Some(rows) = outcome.rows.as_ref() else {
            return Ok(Vec::new());
        };
        match rows {
            Rows::Nested(nested) => Ok(nested
                .iter()
                .map(|row| cast_nested_row(schema, query, &base, row.clone()))
                .collect()),
            Rows::Flat { fields, rows } => Ok(rows
                .iter()
                .map(|row| {
                    let mut columns = IndexMap::new();
                    for (field, value) in fields.iter().zip(row.iter()) {
                        columns.insert(field.name.clone(), value.clone());
                    }
                    let mut nested = NestedRow::new();
                    nested.insert(base.table_alias.clone(), columns);
                    cast_nested_row(schema, query, &base, nested)
                })
                .collect()),
        }
    }

    /// Recover the generated key from a write outcome.
    fn insert_id_of(&self, outcome: &QueryOutcome) -> Option<i64> {
        outcome.insert_id
    }
}

// ---------------------------------------------------------------------------
// Shared statement helpers
// ---------------------------------------------------------------------------

/// Normalize SET data into an ordered column union plus per-row maps.
/// Bulk rows missing a column bind NULL for it.
fn insert_rows<'a>(
    ctx: &'a FormatContext,
) -> Result<(Vec<String>, Vec<&'a IndexMap<String, Expr>>)> {
    let command = ctx.query.command;
    let sets = ctx.query.sets.as_ref().filter(|s| !s.is_empty());
    let Some(sets) = sets else {
        return Err(Error::EmptySets {
            command: command.to_string(),
        });
    };
    match sets {
        Sets::One(map) => Ok((map.keys().cloned().collect(), vec![map])),
        Sets::Many(rows) => {
            let mut columns: Vec<String> = Vec::new();
            for row in rows {
                for key in row.keys() {
                    if !columns.iter().any(|c| c == key) {
                        columns.push(key.clone());
                    }
                }
            }
            Ok((columns, rows.iter().collect()))
        }
    }
}

/// `INSERT [hints] INTO t (cols) VALUES (...), (...)`.
fn insert_prefix(
    ctx: &FormatContext,
    columns: &[String],
    rows: &[&IndexMap<String, Expr>],
    values: &mut Vec<Value>,
) -> Result<String> {
    let mut sql = String::from("INSERT ");
    let hints = comment_hints_sql(ctx.query);
    if !hints.is_empty() {
        sql.push_str(&hints);
        sql.push(' ');
    }
    sql.push_str("INTO ");
    sql.push_str(&ctx.quote(&ctx.model.table));
    sql.push_str(" (");
    let quoted: Vec<String> = columns.iter().map(|c| ctx.quote(c)).collect();
    sql.push_str(&quoted.join(", "));
    sql.push_str(") VALUES ");

    let mut tuples = Vec::with_capacity(rows.len());
    for row in rows {
        let mut cells = Vec::with_capacity(columns.len());
        for column in columns {
            match row.get(column) {
                Some(expr) => cells.push(format_expr(ctx, expr, values)?),
                None => {
                    values.push(Value::Null);
                    cells.push("?".to_owned());
                }
            }
        }
        tuples.push(format!("({})", cells.join(", ")));
    }
    sql.push_str(&tuples.join(", "));
    Ok(sql)
}

/// `c1 = ?, c2 = c2 + ?` SET clause.
fn set_clause(
    ctx: &FormatContext,
    sets: &IndexMap<String, Expr>,
    values: &mut Vec<Value>,
) -> Result<String> {
    let mut parts = Vec::with_capacity(sets.len());
    for (column, expr) in sets {
        parts.push(format!(
            "{} = {}",
            ctx.quote(column),
            format_expr(ctx, expr, values)?
        ));
    }
    Ok(parts.join(", "))
}

/// Cast every column of a nested row back through its model's column types.
/// Unknown columns (aggregates, computed aliases) pass through untouched.
pub(crate) fn cast_nested_row(
    schema: &Schema,
    query: &Query,
    base: &Arc<ModelDef>,
    row: NestedRow,
) -> NestedRow {
    row.into_iter()
        .map(|(qualifier, columns)| {
            let model = if qualifier == base.table_alias || qualifier == base.table {
                Some(Arc::clone(base))
            } else {
                query
                    .joins
                    .get(&qualifier)
                    .and_then(|join| schema.model(&join.model))
            };
            let columns = columns
                .into_iter()
                .map(|(name, value)| {
                    let cast = model
                        .as_ref()
                        .and_then(|m| {
                            m.attributes.values().find(|a| a.column_name == name)
                        })
                        .map_or_else(
                            || value.clone(),
                            |attr| attr.column_type.cast(&name, value.clone()),
                        );
                    (name, cast)
                })
                .collect();
            (qualifier, columns)
        })
        .collect()
}
