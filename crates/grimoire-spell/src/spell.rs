//! The deferred query builder.
//!
//! A `Spell` owns its query state exclusively; the plain chain methods
//! (`where_`, `order`, ...) clone first and mutate the copy (fork-on-write),
//! while their `*_mut` twins mutate in place. One base spell can therefore
//! spawn many independent derived queries without interference, and a spell
//! is reusable as a template: every `execute()` re-runs the full
//! format → driver → dispatch pipeline with no memoization.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;

use grimoire_ast::{walk_expr, Command, Expr, Hint, Op, Query, Sets, SortDirection};
use grimoire_error::{Error, Result};
use grimoire_parser::parse_expr_list;
use grimoire_spellbook::{spellbook_for, Connection, Driver, SqlStatement};
use grimoire_types::{ModelDef, Schema, Value};

use crate::batch::Batch;
use crate::dispatch::{dispatch, Payload, Record};
use crate::input::{IntoConditions, IntoOrder, IntoSets, SetValue};
use crate::scope::Scope;

/// A deferred, chainable query over one model.
#[derive(Clone)]
pub struct Spell {
    pub(crate) schema: Arc<Schema>,
    pub(crate) model: Arc<ModelDef>,
    pub(crate) driver: Arc<dyn Driver>,
    pub(crate) connection: Option<Arc<dyn Connection>>,
    pub(crate) query: Query,
    pub(crate) scopes: Vec<Scope>,
    pub(crate) silent: bool,
}

impl fmt::Debug for Spell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spell")
            .field("model", &self.model.name)
            .field("query", &self.query)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

impl Spell {
    /// Construct a spell for a model, composing its scope chain: the model
    /// default scope, then the automatic soft-delete predicate when the
    /// model is paranoid.
    pub fn new(schema: Arc<Schema>, driver: Arc<dyn Driver>, model_name: &str) -> Result<Self> {
        if !schema.is_connected() {
            return Err(Error::NotConnected {
                model: model_name.to_owned(),
            });
        }
        let model = schema.require_model(model_name)?;
        let query = Query::select_from(&model.name, &model.table);

        let mut scopes = Vec::new();
        if let Some(conditions) = model.default_scope.clone() {
            scopes.push(Scope::new("default", move |spell: &mut Spell| {
                spell.where_mut(conditions.clone())?;
                Ok(())
            }));
        }
        if model.is_paranoid() {
            let deleted_at = model
                .timestamps
                .deleted_at
                .clone()
                .unwrap_or_else(|| "deletedAt".to_owned());
            scopes.push(Scope::paranoid("paranoid", move |spell: &mut Spell| {
                let conditions: grimoire_parser::Conditions = vec![(
                    deleted_at.clone(),
                    grimoire_parser::Operand::Value(Value::Null),
                )];
                spell.where_mut(conditions)?;
                Ok(())
            }));
        }

        Ok(Self {
            schema,
            model,
            driver,
            connection: None,
            query,
            scopes,
            silent: false,
        })
    }

    /// The owning model's metadata.
    #[must_use]
    pub fn model(&self) -> &Arc<ModelDef> {
        &self.model
    }

    /// The raw (un-scoped) query state.
    #[must_use]
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Produce a structurally independent copy sharing no mutable state with
    /// the original. Every non-`_mut` chain method goes through this.
    #[must_use]
    pub fn dup(&self) -> Self {
        self.clone()
    }

    // -----------------------------------------------------------------------
    // Selection
    // -----------------------------------------------------------------------

    /// Add to the selection list (comma-separated expression text). A bare
    /// `*` leaves the list empty, which already selects everything.
    pub fn select(&self, columns: &str) -> Result<Self> {
        let mut spell = self.dup();
        spell.select_mut(columns)?;
        Ok(spell)
    }

    pub fn select_mut(&mut self, columns: &str) -> Result<&mut Self> {
        let exprs = parse_expr_list(columns, Vec::new())?;
        for expr in &exprs {
            if !matches!(expr, Expr::Wildcard) {
                self.validate_expr(expr, "SELECT", true)?;
            }
        }
        self.query
            .columns
            .extend(exprs.into_iter().filter(|e| !matches!(e, Expr::Wildcard)));
        Ok(self)
    }

    // -----------------------------------------------------------------------
    // Conditions
    // -----------------------------------------------------------------------

    pub fn where_(&self, conditions: impl IntoConditions) -> Result<Self> {
        let mut spell = self.dup();
        spell.where_mut(conditions)?;
        Ok(spell)
    }

    pub fn where_mut(&mut self, conditions: impl IntoConditions) -> Result<&mut Self> {
        let exprs = conditions.into_conditions()?;
        for expr in &exprs {
            self.validate_expr(expr, "WHERE", true)?;
        }
        self.query.wheres.extend(exprs);
        Ok(self)
    }

    /// Reduce existing conditions into one AND tree and OR the new condition
    /// set with it. Associates left on repeated calls.
    pub fn or_where(&self, conditions: impl IntoConditions) -> Result<Self> {
        let mut spell = self.dup();
        spell.or_where_mut(conditions)?;
        Ok(spell)
    }

    pub fn or_where_mut(&mut self, conditions: impl IntoConditions) -> Result<&mut Self> {
        let exprs = conditions.into_conditions()?;
        for expr in &exprs {
            self.validate_expr(expr, "WHERE", true)?;
        }
        let incoming = fold_and(exprs);
        let Some(incoming) = incoming else {
            return Ok(self);
        };
        match fold_and(std::mem::take(&mut self.query.wheres)) {
            Some(existing) => {
                self.query.wheres = vec![Expr::binop(Op::Or, existing, incoming)];
            }
            None => self.query.wheres.push(incoming),
        }
        Ok(self)
    }

    pub fn having(&self, conditions: impl IntoConditions) -> Result<Self> {
        let mut spell = self.dup();
        spell.having_mut(conditions)?;
        Ok(spell)
    }

    pub fn having_mut(&mut self, conditions: impl IntoConditions) -> Result<&mut Self> {
        let exprs = conditions.into_conditions()?;
        for expr in &exprs {
            // Aliased aggregates are referencable here; stay lenient.
            self.validate_expr(expr, "HAVING", false)?;
        }
        self.query.havings.extend(exprs);
        Ok(self)
    }

    pub fn or_having(&self, conditions: impl IntoConditions) -> Result<Self> {
        let mut spell = self.dup();
        spell.or_having_mut(conditions)?;
        Ok(spell)
    }

    pub fn or_having_mut(&mut self, conditions: impl IntoConditions) -> Result<&mut Self> {
        let exprs = conditions.into_conditions()?;
        for expr in &exprs {
            self.validate_expr(expr, "HAVING", false)?;
        }
        let Some(incoming) = fold_and(exprs) else {
            return Ok(self);
        };
        match fold_and(std::mem::take(&mut self.query.havings)) {
            Some(existing) => {
                self.query.havings = vec![Expr::binop(Op::Or, existing, incoming)];
            }
            None => self.query.havings.push(incoming),
        }
        Ok(self)
    }

    // -----------------------------------------------------------------------
    // Grouping and ordering
    // -----------------------------------------------------------------------

    /// GROUP BY the named columns. Virtual attributes are rejected; group
    /// columns join the selection list when not already selected.
    pub fn group(&self, columns: &str) -> Result<Self> {
        let mut spell = self.dup();
        spell.group_mut(columns)?;
        Ok(spell)
    }

    pub fn group_mut(&mut self, columns: &str) -> Result<&mut Self> {
        let exprs = parse_expr_list(columns, Vec::new())?;
        for expr in exprs {
            if let Expr::Id(ident) = &expr {
                if ident.qualifier().is_none() {
                    self.model.column_of(&ident.name, "GROUP BY")?;
                }
            } else {
                self.validate_expr(&expr, "GROUP BY", true)?;
            }
            if !self.query.columns.contains(&expr) {
                self.query.columns.push(expr.clone());
            }
            self.query.groups.push(expr);
        }
        Ok(self)
    }

    pub fn order(&self, input: impl IntoOrder) -> Result<Self> {
        let mut spell = self.dup();
        spell.order_mut(input)?;
        Ok(spell)
    }

    pub fn order_mut(&mut self, input: impl IntoOrder) -> Result<&mut Self> {
        let orders = input.into_order()?;
        for (expr, _) in &orders {
            self.validate_expr(expr, "ORDER BY", false)?;
        }
        self.query.orders.extend(orders);
        Ok(self)
    }

    // -----------------------------------------------------------------------
    // Limits
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn limit(&self, row_count: u64) -> Self {
        let mut spell = self.dup();
        spell.limit_mut(row_count);
        spell
    }

    pub fn limit_mut(&mut self, row_count: u64) -> &mut Self {
        self.query.row_count = Some(row_count);
        self
    }

    #[must_use]
    pub fn offset(&self, skip: u64) -> Self {
        let mut spell = self.dup();
        spell.offset_mut(skip);
        spell
    }

    pub fn offset_mut(&mut self, skip: u64) -> &mut Self {
        self.query.skip = Some(skip);
        self
    }

    // -----------------------------------------------------------------------
    // Scopes
    // -----------------------------------------------------------------------

    /// Strip every scope, the soft-delete predicate included.
    #[must_use]
    pub fn unscoped(&self) -> Self {
        let mut spell = self.dup();
        spell.scopes.clear();
        spell
    }

    /// Strip only the paranoid (soft-delete) scope, keeping named scopes.
    #[must_use]
    pub fn unparanoid(&self) -> Self {
        let mut spell = self.dup();
        spell.scopes.retain(|scope| !scope.is_paranoid());
        spell
    }

    /// Attach an explicit named scope.
    #[must_use]
    pub fn scope(&self, scope: Scope) -> Self {
        let mut spell = self.dup();
        spell.scopes.push(scope);
        spell
    }

    // -----------------------------------------------------------------------
    // Hints
    // -----------------------------------------------------------------------

    /// Mount a hint; structurally equal hints mount once.
    #[must_use]
    pub fn hint(&self, hint: Hint) -> Self {
        let mut spell = self.dup();
        spell.hint_mut(hint);
        spell
    }

    pub fn hint_mut(&mut self, hint: Hint) -> &mut Self {
        if !self.query.hints.contains(&hint) {
            self.query.hints.push(hint);
        }
        self
    }

    // -----------------------------------------------------------------------
    // Aggregates
    // -----------------------------------------------------------------------

    pub fn count(&self, attribute: &str) -> Result<Self> {
        self.aggregate("count", attribute)
    }

    pub fn count_mut(&mut self, attribute: &str) -> Result<&mut Self> {
        self.aggregate_mut("count", attribute)
    }

    pub fn average(&self, attribute: &str) -> Result<Self> {
        self.aggregate("average", attribute)
    }

    pub fn minimum(&self, attribute: &str) -> Result<Self> {
        self.aggregate("minimum", attribute)
    }

    pub fn maximum(&self, attribute: &str) -> Result<Self> {
        self.aggregate("maximum", attribute)
    }

    pub fn sum(&self, attribute: &str) -> Result<Self> {
        self.aggregate("sum", attribute)
    }

    fn aggregate(&self, name: &str, attribute: &str) -> Result<Self> {
        let mut spell = self.dup();
        spell.aggregate_mut(name, attribute)?;
        Ok(spell)
    }

    /// Append `FUNC(operand) AS name`. Only a plain identifier or `*` is a
    /// valid operand.
    fn aggregate_mut(&mut self, name: &str, attribute: &str) -> Result<&mut Self> {
        let operand = if attribute == "*" {
            Expr::Wildcard
        } else {
            if !is_plain_identifier(attribute) {
                return Err(Error::InvalidAggregateOperand {
                    function: name.to_owned(),
                    operand: attribute.to_owned(),
                });
            }
            self.model.column_of(attribute, "aggregate")?;
            Expr::id(attribute)
        };
        let func = match name {
            "average" => "avg",
            "minimum" => "min",
            "maximum" => "max",
            other => other,
        };
        self.query
            .columns
            .push(Expr::alias(Expr::func(func, vec![operand]), name));
        Ok(self)
    }

    // -----------------------------------------------------------------------
    // Write commands
    // -----------------------------------------------------------------------

    pub fn insert(&self, sets: impl IntoSets) -> Result<Self> {
        let mut spell = self.dup();
        spell.insert_mut(sets)?;
        Ok(spell)
    }

    pub fn insert_mut(&mut self, sets: impl IntoSets) -> Result<&mut Self> {
        self.query.command = Command::Insert;
        self.query.sets = Some(Sets::One(self.uncast_sets(sets)?));
        Ok(self)
    }

    pub fn bulk_insert<S: IntoSets>(&self, rows: Vec<S>) -> Result<Self> {
        let mut spell = self.dup();
        spell.bulk_insert_mut(rows)?;
        Ok(spell)
    }

    pub fn bulk_insert_mut<S: IntoSets>(&mut self, rows: Vec<S>) -> Result<&mut Self> {
        self.query.command = Command::BulkInsert;
        let mut all = Vec::with_capacity(rows.len());
        for row in rows {
            all.push(self.uncast_sets(row)?);
        }
        self.query.sets = Some(Sets::Many(all));
        Ok(self)
    }

    pub fn update(&self, sets: impl IntoSets) -> Result<Self> {
        let mut spell = self.dup();
        spell.update_mut(sets)?;
        Ok(spell)
    }

    pub fn update_mut(&mut self, sets: impl IntoSets) -> Result<&mut Self> {
        self.query.command = Command::Update;
        self.query.sets = Some(Sets::One(self.uncast_sets(sets)?));
        Ok(self)
    }

    pub fn upsert(&self, sets: impl IntoSets) -> Result<Self> {
        let mut spell = self.dup();
        spell.upsert_mut(sets)?;
        Ok(spell)
    }

    pub fn upsert_mut(&mut self, sets: impl IntoSets) -> Result<&mut Self> {
        self.query.command = Command::Upsert;
        self.query.sets = Some(Sets::One(self.uncast_sets(sets)?));
        Ok(self)
    }

    #[must_use]
    pub fn delete(&self) -> Self {
        let mut spell = self.dup();
        spell.delete_mut();
        spell
    }

    pub fn delete_mut(&mut self) -> &mut Self {
        self.query.command = Command::Delete;
        self
    }

    /// `SET column = column + by`, stamping the updated-at column unless
    /// silenced.
    pub fn increment(&self, attribute: &str, by: i64) -> Result<Self> {
        let mut spell = self.dup();
        spell.increment_mut(attribute, by)?;
        Ok(spell)
    }

    pub fn increment_mut(&mut self, attribute: &str, by: i64) -> Result<&mut Self> {
        self.arithmetic_update(attribute, Op::Add, by)
    }

    pub fn decrement(&self, attribute: &str, by: i64) -> Result<Self> {
        let mut spell = self.dup();
        spell.decrement_mut(attribute, by)?;
        Ok(spell)
    }

    pub fn decrement_mut(&mut self, attribute: &str, by: i64) -> Result<&mut Self> {
        self.arithmetic_update(attribute, Op::Sub, by)
    }

    fn arithmetic_update(&mut self, attribute: &str, op: Op, by: i64) -> Result<&mut Self> {
        let column = self.model.column_of(attribute, "SET")?.to_owned();
        self.query.command = Command::Update;
        let mut sets = IndexMap::new();
        sets.insert(
            column,
            Expr::binop(op, Expr::id(attribute), Expr::literal(by)),
        );
        if !self.silent {
            if let Some(updated_at) = self.model.timestamps.updated_at.clone() {
                if let Ok(column) = self.model.column_of(&updated_at, "SET") {
                    sets.insert(column.to_owned(), Expr::raw("CURRENT_TIMESTAMP"));
                }
            }
        }
        self.query.sets = Some(Sets::One(sets));
        Ok(self)
    }

    /// Suppress automatic timestamp stamping on increment/decrement.
    #[must_use]
    pub fn silent(&self) -> Self {
        let mut spell = self.dup();
        spell.silent = true;
        spell
    }

    /// Use an explicit connection (caller-managed transaction) instead of
    /// drawing from the pool.
    #[must_use]
    pub fn with_connection(&self, connection: Arc<dyn Connection>) -> Self {
        let mut spell = self.dup();
        spell.connection = Some(connection);
        spell
    }

    fn uncast_sets(&self, sets: impl IntoSets) -> Result<IndexMap<String, Expr>> {
        let mut out = IndexMap::new();
        for (name, value) in sets.into_sets()? {
            let attr = self.model.require_attribute(&name)?;
            if attr.is_virtual {
                return Err(Error::VirtualAttribute {
                    attribute: name,
                    clause: "SET".to_owned(),
                });
            }
            let expr = match value {
                // Raw fragments bypass uncasting.
                SetValue::Expr(expr) => expr,
                SetValue::Value(v) => Expr::Literal(
                    attr.column_type.uncast(&attr.column_name, v)?,
                ),
            };
            out.insert(attr.column_name.clone(), expr);
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Fail fast on unknown or virtual attributes, before any I/O.
    ///
    /// Strict contexts (WHERE/SELECT/GROUP) reject anything unresolvable;
    /// lenient contexts (HAVING/ORDER) tolerate computed aliases. Qualified
    /// identifiers check against the join target when it is mounted and pass
    /// when the join is yet to come.
    pub(crate) fn validate_expr(&self, expr: &Expr, clause: &str, strict: bool) -> Result<()> {
        let aliases: Vec<&str> = self
            .query
            .columns
            .iter()
            .filter_map(|col| match col {
                Expr::Alias { alias, .. } => Some(alias.as_str()),
                _ => None,
            })
            .collect();

        let mut failure: Option<Error> = None;
        walk_expr(expr, &mut |node| {
            if failure.is_some() {
                return;
            }
            let Expr::Id(ident) = node else {
                return;
            };
            let model = match ident.qualifier() {
                None => Some(Arc::clone(&self.model)),
                Some(q) if q == self.model.table_alias || q == self.model.table => {
                    Some(Arc::clone(&self.model))
                }
                Some(q) => match self.query.joins.get(q) {
                    Some(join) => self.schema.model(&join.model),
                    // The join may be mounted later in the chain.
                    None => None,
                },
            };
            let Some(model) = model else {
                return;
            };
            let attr = model
                .attribute(&ident.name)
                .or_else(|| {
                    model
                        .attributes
                        .values()
                        .find(|a| a.column_name == ident.name)
                });
            match attr {
                Some(attr) if attr.is_virtual && strict => {
                    failure = Some(Error::VirtualAttribute {
                        attribute: ident.name.clone(),
                        clause: clause.to_owned(),
                    });
                }
                Some(_) => {}
                None if aliases.contains(&ident.name.as_str()) && !strict => {}
                None if strict => {
                    failure = Some(Error::UnknownAttribute {
                        model: model.name.clone(),
                        attribute: ident.name.clone(),
                    });
                }
                None => {}
            }
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// The query with all scopes applied, suitable as a subquery operand.
    pub fn as_subquery(&self) -> Result<Query> {
        self.lowered()
    }

    pub(crate) fn lowered(&self) -> Result<Query> {
        if self.scopes.is_empty() {
            return Ok(self.query.clone());
        }
        let mut spell = self.clone();
        let scopes = std::mem::take(&mut spell.scopes);
        for scope in &scopes {
            tracing::trace!(scope = scope.name(), model = %self.model.name, "applying scope");
            scope.apply(&mut spell)?;
        }
        Ok(spell.query)
    }

    /// Format without executing.
    pub fn format(&self) -> Result<SqlStatement> {
        let query = self.lowered()?;
        let book = spellbook_for(self.driver.dialect());
        book.format(&self.schema, &query)
    }

    /// Debug SQL with bound values inlined. Real execution always binds
    /// through placeholders.
    pub fn to_sql_string(&self) -> Result<String> {
        let statement = self.format()?;
        Ok(inline_values(&statement.sql, &statement.values))
    }

    /// Run the spell once: format, execute on the driver, dispatch rows.
    ///
    /// Deliberately un-memoized: re-running the same spell issues a fresh
    /// query every time.
    pub fn execute(&self) -> Result<Payload> {
        let query = self.lowered()?;
        let book = spellbook_for(self.driver.dialect());
        let statement = book.format(&self.schema, &query)?;

        let started = Instant::now();
        let outcome = self
            .driver
            .execute(&statement, self.connection.as_deref())?;
        tracing::debug!(
            sql = %statement.sql,
            values = statement.values.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "executed"
        );

        if query.command.is_read() {
            let rows = book.nest_rows(&self.schema, &query, &outcome)?;
            dispatch(&self.schema, &query, rows)
        } else {
            Ok(Payload::Write {
                insert_id: book.insert_id_of(&outcome),
                affected_rows: outcome.affected_rows,
            })
        }
    }

    /// All matching records.
    pub fn all(&self) -> Result<Vec<Record>> {
        match self.execute()? {
            Payload::Records(records) => Ok(records),
            Payload::Scalar(_) | Payload::Write { .. } => Ok(Vec::new()),
        }
    }

    /// First record by primary key order.
    pub fn first(&self) -> Result<Option<Record>> {
        let mut spell = self.dup();
        if spell.query.orders.is_empty() {
            spell
                .query
                .orders
                .push((Expr::id(&self.model.primary_key), SortDirection::Asc));
        }
        spell.limit_mut(1);
        Ok(spell.all()?.into_iter().next())
    }

    /// The record at the given offset.
    pub fn get(&self, index: u64) -> Result<Option<Record>> {
        let mut spell = self.dup();
        spell.offset_mut(index).limit_mut(1);
        Ok(spell.all()?.into_iter().next())
    }

    /// Scalar result of an aggregate-only query.
    pub fn scalar(&self) -> Result<Value> {
        match self.execute()? {
            Payload::Scalar(value) => Ok(value),
            Payload::Records(_) | Payload::Write { .. } => Ok(Value::Null),
        }
    }

    /// Lazy forward-only pagination; each page awaits the previous one.
    #[must_use]
    pub fn batch(&self, size: u64) -> Batch {
        Batch::new(self.dup(), size)
    }
}

/// AND-fold a condition list into one tree; `None` when empty.
pub(crate) fn fold_and(exprs: Vec<Expr>) -> Option<Expr> {
    let mut iter = exprs.into_iter();
    let first = iter.next()?;
    Some(iter.fold(first, |acc, next| Expr::binop(Op::And, acc, next)))
}

fn is_plain_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Replace `?` / `$n` placeholders with inline literals, skipping quoted
/// regions. Debug output only.
fn inline_values(sql: &str, values: &[Value]) -> String {
    let mut out = String::with_capacity(sql.len() + values.len() * 8);
    let mut next = 0usize;
    let mut in_string = false;
    let mut in_ident = false;
    let mut chars = sql.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\'' if !in_ident => {
                in_string = !in_string;
                out.push(ch);
            }
            '"' if !in_string => {
                in_ident = !in_ident;
                out.push(ch);
            }
            '?' if !in_string && !in_ident => {
                let literal = values
                    .get(next)
                    .map_or_else(|| "?".to_owned(), Value::to_sql_literal);
                out.push_str(&literal);
                next += 1;
            }
            '$' if !in_string && !in_ident => {
                let mut digits = String::new();
                while chars.peek().is_some_and(char::is_ascii_digit) {
                    if let Some(digit) = chars.next() {
                        digits.push(digit);
                    }
                }
                if digits.is_empty() {
                    out.push(ch);
                } else {
                    let index = digits.parse::<usize>().unwrap_or(0).saturating_sub(1);
                    let literal = values
                        .get(index)
                        .map_or_else(|| format!("${digits}"), Value::to_sql_literal);
                    out.push_str(&literal);
                }
            }
            other => out.push(other),
        }
    }
    out
}
