//! PostgreSQL spellbook.
//!
//! Diverges from the base behavior in four ways: placeholders are numbered
//! (`$1`, `$2`, ...), INSERT appends `RETURNING <pk>` because the wire
//! protocol reports no last-insert-id, upsert is `ON CONFLICT ... DO UPDATE`,
//! and joined results come back flat, so rows are re-nested here using the
//! driver-reported per-field `tableID`.

use indexmap::IndexMap;

use grimoire_ast::Query;
use grimoire_error::Result;
use grimoire_types::Schema;

use crate::book::{cast_nested_row, Spellbook};
use crate::driver::{FieldInfo, NestedRow, QueryOutcome, Rows, SqlStatement};
use crate::format::FormatContext;
use crate::Dialect;

/// Statement formatter for PostgreSQL.
#[derive(Clone, Copy, Debug, Default)]
pub struct PostgresSpellbook;

impl Spellbook for PostgresSpellbook {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn finalize(&self, statement: SqlStatement) -> SqlStatement {
        SqlStatement {
            sql: number_placeholders(&statement.sql),
            ..statement
        }
    }

    fn returning_clause(&self, ctx: &FormatContext) -> Option<String> {
        Some(format!("RETURNING {}", ctx.quote(ctx.model.primary_column())))
    }

    fn format_upsert(
        &self,
        ctx: &FormatContext,
        values: &mut Vec<grimoire_types::Value>,
    ) -> Result<String> {
        let mut sql = self.format_insert(ctx, values)?;
        // format_insert appended RETURNING; splice the conflict clause in
        // front of it.
        let returning = self
            .returning_clause(ctx)
            .unwrap_or_default();
        if let Some(stripped) = sql.strip_suffix(&format!(" {returning}")) {
            sql = stripped.to_owned();
        }
        let pk = ctx.quote(ctx.model.primary_column());
        sql.push_str(&format!(" ON CONFLICT ({pk}) DO UPDATE SET "));
        let updates: Vec<String> = ctx
            .query
            .sets
            .as_ref()
            .map(|sets| match sets {
                grimoire_ast::Sets::One(map) => map.keys().cloned().collect(),
                grimoire_ast::Sets::Many(rows) => rows
                    .iter()
                    .flat_map(|row| row.keys().cloned())
                    .collect::<Vec<_>>(),
            })
            .unwrap_or_default()
            .into_iter()
            .filter(|col| col != ctx.model.primary_column())
            .map(|col| format!("{0} = EXCLUDED.{0}", ctx.quote(&col)))
            .collect();
        if updates.is_empty() {
            sql.push_str(&format!("{pk} = EXCLUDED.{pk}"));
        } else {
            sql.push_str(&updates.join(", "));
        }
        sql.push(' ');
        sql.push_str(&returning);
        Ok(sql)
    }

    /// Re-nest flat rows by watching the per-field `tableID` change.
    ///
    /// Qualifier runs map to the base table first, then joins in declaration
    /// order. Computed fields report no `tableID` and stay with the current
    /// qualifier. A repeated column name inside one run forces a transition,
    /// which is what disambiguates the same table joined twice (equal
    /// `tableID` on both sides, broken by declaration order). Grouped
    /// queries collapse to the base qualifier outright.
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
            // Already nested (a driver doing the work for us): just cast.
            Rows::Nested(nested) => {
                return Ok(nested
                    .iter()
                    .map(|row| cast_nested_row(schema, query, &base, row.clone()))
                    .collect());
            }
        };

        let mut qualifiers = vec![base.table_alias.clone()];
        qualifiers.extend(query.joins.keys().cloned());
        let grouped = !query.groups.is_empty();

        let assignment = assign_qualifiers(fields, &qualifiers, grouped);
        tracing::trace!(
            fields = fields.len(),
            qualifiers = qualifiers.len(),
            grouped,
            "re-nesting flat rows"
        );

        Ok(flat_rows
            .iter()
            .map(|row| {
                let mut nested = NestedRow::new();
                for ((field, qualifier), value) in
                    fields.iter().zip(assignment.iter()).zip(row.iter())
                {
                    nested
                        .entry(qualifier.clone())
                        .or_insert_with(IndexMap::new)
                        .insert(field.name.clone(), value.clone());
                }
                cast_nested_row(schema, query, &base, nested)
            })
            .collect())
    }

    /// The generated key arrives as the single RETURNING column.
    fn insert_id_of(&self, outcome: &QueryOutcome) -> Option<i64> {
        if let Some(Rows::Flat { rows, .. }) = outcome.rows.as_ref() {
            if let Some(value) = rows.first().and_then(|row| row.first()) {
                return value
                    .as_integer()
                    .or_else(|| value.as_text().and_then(|s| s.parse().ok()));
            }
        }
        outcome.insert_id
    }
}

/// Map each field to a qualifier by tracking `tableID` transitions.
fn assign_qualifiers(
    fields: &[FieldInfo],
    qualifiers: &[String],
    grouped: bool,
) -> Vec<String> {
    let mut assignment = Vec::with_capacity(fields.len());
    if grouped || qualifiers.len() == 1 {
        // GROUP BY output is not instantiable per-table; everything lands on
        // the default (base) qualifier.
        assignment.resize(fields.len(), qualifiers[0].clone());
        return assignment;
    }

    let mut qi = 0usize;
    let mut last_real: Option<u32> = None;
    let mut seen_in_run: Vec<&str> = Vec::new();
    for field in fields {
        match field.table_id {
            None => {}
            Some(tid) => {
                let transition = last_real.is_some_and(|prev| prev != tid)
                    || seen_in_run.iter().any(|name| *name == field.name);
                if transition && qi + 1 < qualifiers.len() {
                    qi += 1;
                    seen_in_run.clear();
                }
                last_real = Some(tid);
                seen_in_run.push(&field.name);
            }
        }
        assignment.push(qualifiers[qi].clone());
    }
    assignment
}

/// Rewrite `?` placeholders to `$1`, `$2`, ... skipping quoted regions.
fn number_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0u32;
    let mut in_string = false;
    let mut in_ident = false;
    for ch in sql.chars() {
        match ch {
            '\'' if !in_ident => in_string = !in_string,
            '"' if !in_string => in_ident = !in_ident,
            '?' if !in_string && !in_ident => {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
                continue;
            }
            _ => {}
        }
        out.push(ch);
    }
    out
}
