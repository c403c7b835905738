//! SQLite spellbook.
//!
//! Upsert takes the `ON CONFLICT ... DO UPDATE` form. Reads and writes are
//! distinguished on the statement so the driver can pick the right call and
//! synthesize a `last_insert_rowid()` lookup after writes. Joined results
//! come back flat without per-field table ids, so rows are re-nested
//! positionally from the query's own per-qualifier column layout.

use indexmap::IndexMap;

use grimoire_ast::{Expr, Query, Sets};
use grimoire_error::Result;
use grimoire_types::{Schema, Value};

use crate::book::{cast_nested_row, Spellbook};
use crate::driver::{NestedRow, QueryOutcome, Rows};
use crate::format::FormatContext;
use crate::Dialect;

/// Statement formatter for SQLite.
#[derive(Clone, Copy, Debug, Default)]
pub struct SqliteSpellbook;

impl Spellbook for SqliteSpellbook {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn format_upsert(&self, ctx: &FormatContext, values: &mut Vec<Value>) -> Result<String> {
        let mut sql = self.format_insert(ctx, values)?;
        let pk = ctx.quote(ctx.model.primary_column());
        sql.push_str(&format!(" ON CONFLICT ({pk}) DO UPDATE SET "));
        let columns: Vec<String> = match ctx.query.sets.as_ref() {
            Some(Sets::One(map)) => map.keys().cloned().collect(),
            Some(Sets::Many(rows)) => rows.iter().flat_map(|r| r.keys().cloned()).collect(),
            None => Vec::new(),
        };
        let updates: Vec<String> = columns
            .iter()
            .filter(|col| col.as_str() != ctx.model.primary_column())
            .map(|col| format!("{0} = excluded.{0}", ctx.quote(col)))
            .collect();
        if updates.is_empty() {
            sql.push_str(&format!("{pk} = {pk}"));
        } else {
            sql.push_str(&updates.join(", "));
        }
        Ok(sql)
    }

    /// Re-nest flat rows positionally: the query's selection list says which
    /// qualifier each column belongs to, in order.
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
        let (fields, flat_rows) = match rows {
            Rows::Flat { fields, rows } => (fields, rows),
            Rows::Nested(nested) => {
                return Ok(nested
                    .iter()
                    .map(|row| cast_nested_row(schema, query, &base, row.clone()))
                    .collect());
            }
        };

        let layout = column_layout(query, &base.table_alias);

        Ok(flat_rows
            .iter()
            .map(|row| {
                let mut nested = NestedRow::new();
                for (i, (field, value)) in fields.iter().zip(row.iter()).enumerate() {
                    let qualifier = layout
                        .get(i)
                        .cloned()
                        .unwrap_or_else(|| base.table_alias.clone());
                    nested
                        .entry(qualifier)
                        .or_insert_with(IndexMap::new)
                        .insert(field.name.clone(), value.clone());
                }
                cast_nested_row(schema, query, &base, nested)
            })
            .collect())
    }
}

/// Per-selected-column qualifier, in selection order. Computed columns and
/// aliases belong to the base qualifier.
fn column_layout(query: &Query, base_qualifier: &str) -> Vec<String> {
    query
        .columns
        .iter()
        .map(|col| qualifier_of(col).unwrap_or(base_qualifier).to_owned())
        .collect()
}

fn qualifier_of(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Id(ident) => ident.qualifier(),
        Expr::Alias { expr, .. } => qualifier_of(expr),
        _ => None,
    }
}
