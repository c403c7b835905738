//! Dialect-aware expression and SELECT rendering.
//!
//! Expressions render with `?` placeholders, pushing bound values into a flat
//! list as they go. Rendering rules the rest of the pipeline relies on:
//!
//! - equality against a NULL literal becomes `IS [NOT] NULL`; any other
//!   operator against NULL is a hard error;
//! - equality against an array literal or subquery becomes `IN`/`NOT IN`;
//!   an empty array renders the always-false `IN (NULL)`;
//! - sub-expressions are parenthesized only when the nested operator binds
//!   looser than the enclosing one;
//! - literals compared against a known column are uncast through the
//!   column's type before being bound.

use std::cmp::Ordering;
use std::sync::Arc;

use grimoire_ast::{
    precedes, Expr, FuncCall, Hint, Ident, Modifier, Op, Query, SortDirection,
};
use grimoire_error::{Error, Result};
use grimoire_types::{AttributeDef, ModelDef, Schema, Value};

use crate::driver::Dialect;

/// Everything expression rendering needs to resolve identifiers and bind
/// values for one query.
pub struct FormatContext<'a> {
    pub schema: &'a Schema,
    pub model: Arc<ModelDef>,
    pub query: &'a Query,
    pub dialect: Dialect,
}

impl<'a> FormatContext<'a> {
    /// Build a context for a query, resolving its owning model.
    pub fn new(schema: &'a Schema, query: &'a Query, dialect: Dialect) -> Result<Self> {
        let model = schema.require_model(&query.model)?;
        Ok(Self {
            schema,
            model,
            query,
            dialect,
        })
    }

    /// Quote an identifier for the context dialect.
    #[must_use]
    pub fn quote(&self, name: &str) -> String {
        let q = self.dialect.quote_char();
        let escaped = name.replace(q, &format!("{q}{q}"));
        format!("{q}{escaped}{q}")
    }

    /// The qualifier columns of the base table carry when joins are present.
    #[must_use]
    pub fn base_qualifier(&self) -> &str {
        &self.model.table_alias
    }

    /// Resolve a qualifier against the base model or a mounted join.
    #[must_use]
    pub fn model_of_qualifier(&self, qualifier: &str) -> Option<Arc<ModelDef>> {
        if qualifier == self.model.table_alias || qualifier == self.model.table {
            return Some(Arc::clone(&self.model));
        }
        let join = self.query.joins.get(qualifier)?;
        self.schema.model(&join.model)
    }

    /// The attribute an identifier refers to, by attribute name first, then
    /// by column name. `None` for computed aliases and unknown qualifiers.
    #[must_use]
    pub fn attribute_of(&self, ident: &Ident) -> Option<AttributeDef> {
        let model = match ident.qualifier() {
            Some(q) => self.model_of_qualifier(q)?,
            None => Arc::clone(&self.model),
        };
        if let Some(attr) = model.attribute(&ident.name) {
            return Some(attr.clone());
        }
        model
            .attributes
            .values()
            .find(|a| a.column_name == ident.name)
            .cloned()
    }

    /// Render an identifier as a dialect-quoted, optionally qualified name.
    ///
    /// Attribute names map to their column names; anything unmatched passes
    /// through unchanged so computed aliases stay referencable in HAVING and
    /// ORDER BY.
    #[must_use]
    fn resolve_ident(&self, ident: &Ident) -> String {
        match ident.qualifier() {
            Some(qualifier) => {
                let column = self
                    .model_of_qualifier(qualifier)
                    .and_then(|m| m.attribute(&ident.name).map(|a| a.column_name.clone()))
                    .unwrap_or_else(|| ident.name.clone());
                format!("{}.{}", self.quote(qualifier), self.quote(&column))
            }
            None => {
                let column = self
                    .model
                    .attribute(&ident.name)
                    .map_or_else(|| ident.name.clone(), |a| a.column_name.clone());
                if self.query.joins.is_empty() {
                    self.quote(&column)
                } else {
                    format!("{}.{}", self.quote(self.base_qualifier()), self.quote(&column))
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Expression rendering
// ---------------------------------------------------------------------------

/// Render one expression, appending bound values to `values`.
pub fn format_expr(ctx: &FormatContext, expr: &Expr, values: &mut Vec<Value>) -> Result<String> {
    fmt_expr(ctx, expr, values, None)
}

/// AND-join a condition list, parenthesizing any top-level OR when more than
/// one condition is present.
pub fn format_conditions(
    ctx: &FormatContext,
    conditions: &[Expr],
    values: &mut Vec<Value>,
) -> Result<String> {
    let wrap = conditions.len() > 1;
    let mut parts = Vec::with_capacity(conditions.len());
    for cond in conditions {
        let sql = format_expr(ctx, cond, values)?;
        if wrap && cond.operator() == Some(Op::Or) {
            parts.push(format!("({sql})"));
        } else {
            parts.push(sql);
        }
    }
    Ok(parts.join(" AND "))
}

/// Append every value an expression would bind, uncasting column-typed
/// literals, without keeping the SQL text.
pub fn collect_literal(ctx: &FormatContext, expr: &Expr, values: &mut Vec<Value>) -> Result<()> {
    let _ = format_expr(ctx, expr, values)?;
    Ok(())
}

fn fmt_expr(
    ctx: &FormatContext,
    expr: &Expr,
    values: &mut Vec<Value>,
    attr: Option<&AttributeDef>,
) -> Result<String> {
    match expr {
        Expr::Id(ident) => Ok(ctx.resolve_ident(ident)),
        Expr::Literal(value) => fmt_literal(ctx, value, values, attr),
        Expr::Func(call) => fmt_func(ctx, call, values),
        Expr::Op { op, args } => fmt_op(ctx, *op, args, values),
        Expr::Alias { expr, alias } => Ok(format!(
            "{} AS {}",
            fmt_expr(ctx, expr, values, attr)?,
            ctx.quote(alias)
        )),
        Expr::Modifier { modifier, expr } => {
            let inner = fmt_expr(ctx, expr, values, attr)?;
            match modifier {
                Modifier::Distinct => Ok(format!("DISTINCT {inner}")),
            }
        }
        Expr::Wildcard => Ok("*".to_owned()),
        Expr::Subquery(query) => {
            let sub_ctx = FormatContext::new(ctx.schema, query, ctx.dialect)?;
            Ok(format!("({})", format_select(&sub_ctx, values)?))
        }
        Expr::Raw(text) => Ok(text.clone()),
    }
}

/// Placeholders are emitted for every literal except NULL and empty arrays.
fn fmt_literal(
    ctx: &FormatContext,
    value: &Value,
    values: &mut Vec<Value>,
    attr: Option<&AttributeDef>,
) -> Result<String> {
    match value {
        Value::Null => Ok("NULL".to_owned()),
        Value::List(items) if items.is_empty() => Ok("(NULL)".to_owned()),
        Value::List(items) => {
            let mut marks = Vec::with_capacity(items.len());
            for item in items {
                values.push(uncast(attr, item)?);
                marks.push("?");
            }
            Ok(format!("({})", marks.join(", ")))
        }
        other => {
            values.push(uncast(attr, other)?);
            Ok("?".to_owned())
        }
    }
}

fn uncast(attr: Option<&AttributeDef>, value: &Value) -> Result<Value> {
    match attr {
        Some(attr) => attr.column_type.uncast(&attr.column_name, value.clone()),
        None => Ok(value.clone()),
    }
}

fn fmt_func(ctx: &FormatContext, call: &FuncCall, values: &mut Vec<Value>) -> Result<String> {
    // PostgreSQL spells date parts as EXTRACT(part FROM expr).
    if ctx.dialect == Dialect::Postgres && call.args.len() == 1 {
        if let Some(part) = date_part(&call.name) {
            let arg = fmt_expr(ctx, &call.args[0], values, None)?;
            return Ok(format!("EXTRACT({part} FROM {arg})"));
        }
    }

    let mut args = Vec::with_capacity(call.args.len());
    for arg in &call.args {
        args.push(fmt_expr(ctx, arg, values, None)?);
    }
    let mut rendered = format!("{}({}", call.name.to_ascii_uppercase(), args.join(", "));
    if let Some(returning) = call.returning {
        rendered.push_str(" RETURNING ");
        rendered.push_str(returning.as_sql());
    }
    rendered.push(')');
    Ok(rendered)
}

fn date_part(name: &str) -> Option<&'static str> {
    match name {
        "year" => Some("YEAR"),
        "month" => Some("MONTH"),
        "day" => Some("DAY"),
        "hour" => Some("HOUR"),
        "minute" => Some("MINUTE"),
        "second" => Some("SECOND"),
        _ => None,
    }
}

fn fmt_op(ctx: &FormatContext, op: Op, args: &[Expr], values: &mut Vec<Value>) -> Result<String> {
    // The attribute of the left operand drives uncasting of right-side
    // literals in comparisons.
    let lhs_attr = args.first().and_then(|lhs| match lhs {
        Expr::Id(ident) => ctx.attribute_of(ident),
        _ => None,
    });

    if op.is_unary() {
        let operand = &args[0];
        let inner = fmt_expr(ctx, operand, values, None)?;
        let inner = match operand.operator() {
            Some(child) if precedes(child, op) == Ordering::Less => format!("({inner})"),
            _ => inner,
        };
        return Ok(match op {
            Op::Not => format!("NOT {inner}"),
            Op::Neg => format!("-{inner}"),
            Op::BitNot => format!("~{inner}"),
            _ => unreachable!("unary operators are Not/Neg/BitNot"),
        });
    }

    if op.is_ternary() {
        let lhs = fmt_operand(ctx, op, &args[0], values, None, false)?;
        let low = fmt_operand(ctx, op, &args[1], values, lhs_attr.as_ref(), true)?;
        let high = fmt_operand(ctx, op, &args[2], values, lhs_attr.as_ref(), true)?;
        return Ok(format!("{lhs} {} {low} AND {high}", op.as_sql()));
    }

    // NULL comparisons rewrite to IS [NOT] NULL; other operators against
    // NULL are misuse.
    if let Expr::Literal(Value::Null) = &args[1] {
        let lhs = fmt_operand(ctx, op, &args[0], values, None, false)?;
        return match op {
            Op::Eq => Ok(format!("{lhs} IS NULL")),
            Op::Ne => Ok(format!("{lhs} IS NOT NULL")),
            other => Err(Error::NullComparison {
                op: other.as_sql().to_owned(),
            }),
        };
    }

    // Equality against arrays and subqueries rewrites to IN / NOT IN.
    let op = match (&op, &args[1]) {
        (Op::Eq, Expr::Literal(Value::List(_)) | Expr::Subquery(_)) => Op::In,
        (Op::Ne, Expr::Literal(Value::List(_)) | Expr::Subquery(_)) => Op::NotIn,
        _ => op,
    };

    if matches!(op, Op::In | Op::NotIn) {
        let lhs = fmt_operand(ctx, op, &args[0], values, None, false)?;
        // Either a single collapsed set operand or an explicit item list.
        let set = if args.len() == 2 {
            match &args[1] {
                Expr::Literal(Value::List(_)) | Expr::Subquery(_) => {
                    fmt_expr(ctx, &args[1], values, lhs_attr.as_ref())?
                }
                single => format!("({})", fmt_expr(ctx, single, values, lhs_attr.as_ref())?),
            }
        } else {
            let mut items = Vec::with_capacity(args.len() - 1);
            for item in &args[1..] {
                items.push(fmt_expr(ctx, item, values, lhs_attr.as_ref())?);
            }
            format!("({})", items.join(", "))
        };
        return Ok(format!("{lhs} {} {set}", op.as_sql()));
    }

    let lhs = fmt_operand(ctx, op, &args[0], values, None, false)?;
    let rhs = fmt_operand(ctx, op, &args[1], values, lhs_attr.as_ref(), true)?;
    Ok(format!("{lhs} {} {rhs}", op.as_sql()))
}

/// Render an operand, parenthesizing it when its operator binds looser than
/// the enclosing one (or equally, on the right side, where associativity
/// could change meaning).
fn fmt_operand(
    ctx: &FormatContext,
    parent: Op,
    operand: &Expr,
    values: &mut Vec<Value>,
    attr: Option<&AttributeDef>,
    right_side: bool,
) -> Result<String> {
    let rendered = fmt_expr(ctx, operand, values, attr)?;
    let needs_parens = operand.operator().is_some_and(|child| {
        match precedes(child, parent) {
            Ordering::Less => true,
            Ordering::Equal => right_side,
            Ordering::Greater => false,
        }
    });
    if needs_parens {
        Ok(format!("({rendered})"))
    } else {
        Ok(rendered)
    }
}

// ---------------------------------------------------------------------------
// SELECT rendering
// ---------------------------------------------------------------------------

/// Render a complete SELECT for the context query.
///
/// This lives here rather than in the spellbooks because subquery expressions
/// need it recursively; the books build their other statements on top.
pub fn format_select(ctx: &FormatContext, values: &mut Vec<Value>) -> Result<String> {
    let mut sql = String::from("SELECT ");

    let comment_hints = comment_hints_sql(ctx.query);
    if !comment_hints.is_empty() {
        sql.push_str(&comment_hints);
        sql.push(' ');
    }

    if ctx.query.columns.is_empty() {
        sql.push('*');
    } else {
        let mut cols = Vec::with_capacity(ctx.query.columns.len());
        for col in &ctx.query.columns {
            cols.push(format_expr(ctx, col, values)?);
        }
        sql.push_str(&cols.join(", "));
    }

    sql.push_str(" FROM ");
    sql.push_str(&format_table(ctx, values)?);

    if ctx.dialect == Dialect::MySql {
        let index_hints = index_hints_sql(ctx.query);
        if !index_hints.is_empty() {
            sql.push(' ');
            sql.push_str(&index_hints);
        }
    }

    for (qualifier, join) in &ctx.query.joins {
        let target = ctx.schema.require_model(&join.model)?;
        sql.push_str(" LEFT JOIN ");
        sql.push_str(&ctx.quote(&target.table));
        if qualifier != &target.table {
            sql.push_str(" AS ");
            sql.push_str(&ctx.quote(qualifier));
        }
        sql.push_str(" ON ");
        sql.push_str(&format_expr(ctx, &join.on, values)?);
    }

    if !ctx.query.wheres.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&format_conditions(ctx, &ctx.query.wheres, values)?);
    }

    if !ctx.query.groups.is_empty() {
        let mut groups = Vec::with_capacity(ctx.query.groups.len());
        for group in &ctx.query.groups {
            groups.push(format_expr(ctx, group, values)?);
        }
        sql.push_str(" GROUP BY ");
        sql.push_str(&groups.join(", "));
    }

    if !ctx.query.havings.is_empty() {
        sql.push_str(" HAVING ");
        sql.push_str(&format_conditions(ctx, &ctx.query.havings, values)?);
    }

    if !ctx.query.orders.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&format_orders(ctx, values)?);
    }

    sql.push_str(&limit_sql(ctx));
    Ok(sql)
}

/// Render the FROM target: a quoted table (aliased when joins need the
/// qualifier) or a promoted subquery.
fn format_table(ctx: &FormatContext, values: &mut Vec<Value>) -> Result<String> {
    match ctx.query.table.as_ref() {
        Expr::Id(ident) => {
            let mut sql = ctx.quote(&ident.name);
            if !ctx.query.joins.is_empty() && ctx.base_qualifier() != ident.name {
                sql.push_str(" AS ");
                sql.push_str(&ctx.quote(ctx.base_qualifier()));
            }
            Ok(sql)
        }
        Expr::Subquery(inner) => {
            let sub_ctx = FormatContext::new(ctx.schema, inner, ctx.dialect)?;
            Ok(format!(
                "({}) AS {}",
                format_select(&sub_ctx, values)?,
                ctx.quote(ctx.base_qualifier())
            ))
        }
        other => {
            let rendered = fmt_expr(ctx, other, values, None)?;
            Ok(rendered)
        }
    }
}

/// Render ORDER BY entries; ascending direction is left implicit.
pub fn format_orders(ctx: &FormatContext, values: &mut Vec<Value>) -> Result<String> {
    let mut parts = Vec::with_capacity(ctx.query.orders.len());
    for (expr, direction) in &ctx.query.orders {
        let rendered = format_expr(ctx, expr, values)?;
        match direction {
            SortDirection::Asc => parts.push(rendered),
            SortDirection::Desc => parts.push(format!("{rendered} DESC")),
        }
    }
    Ok(parts.join(", "))
}

/// Render LIMIT/OFFSET per dialect quirks: MySQL and SQLite require a LIMIT
/// before OFFSET, PostgreSQL takes a bare OFFSET.
#[must_use]
pub fn limit_sql(ctx: &FormatContext) -> String {
    match (ctx.query.row_count, ctx.query.skip) {
        (None, None) => String::new(),
        (Some(limit), None) => format!(" LIMIT {limit}"),
        (Some(limit), Some(offset)) => format!(" LIMIT {limit} OFFSET {offset}"),
        (None, Some(offset)) => match ctx.dialect {
            Dialect::MySql => format!(" LIMIT 18446744073709551615 OFFSET {offset}"),
            Dialect::Sqlite => format!(" LIMIT -1 OFFSET {offset}"),
            Dialect::Postgres => format!(" OFFSET {offset}"),
        },
    }
}

/// Comment hints render right after the command verb.
#[must_use]
pub fn comment_hints_sql(query: &Query) -> String {
    let parts: Vec<String> = query
        .hints
        .iter()
        .filter_map(|hint| match hint {
            Hint::Comment(h) => Some(h.to_sql_string()),
            Hint::Index(_) => None,
        })
        .collect();
    parts.join(" ")
}

/// Index hints render after the FROM target (MySQL only).
#[must_use]
pub fn index_hints_sql(query: &Query) -> String {
    let parts: Vec<String> = query
        .hints
        .iter()
        .filter_map(|hint| match hint {
            Hint::Index(h) => Some(h.to_sql_string()),
            Hint::Comment(_) => None,
        })
        .collect();
    parts.join(" ")
}
