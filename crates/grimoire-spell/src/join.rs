//! Association resolution and JOIN planning.
//!
//! `with_` resolves declared associations by name (pluralization-insensitive,
//! dotted multi-level, `through` hops mounted idempotently) and synthesizes
//! ON-condition AST per the association's direction. `join` mounts an
//! arbitrary model with an explicit ON condition. Either way, a builder that
//! already has LIMIT/OFFSET applied first wraps itself as a subquery so the
//! limit keeps applying to base rows rather than the join fan-out.

use std::sync::Arc;

use grimoire_ast::{copy_expr, Expr, Join, Op, Query};
use grimoire_error::{Error, Result};
use grimoire_parser::{conditions_from_json, parse_object};
use grimoire_types::{AssociationDef, AssociationKind, ModelDef};

use crate::input::IntoConditions;
use crate::spell::{fold_and, Spell};

impl Spell {
    /// Mount the named association (dotted names descend level by level).
    pub fn with_(&self, name: &str) -> Result<Self> {
        let mut spell = self.dup();
        spell.with_mut(name)?;
        Ok(spell)
    }

    pub fn with_mut(&mut self, name: &str) -> Result<&mut Self> {
        self.promote_if_limited();
        self.ensure_join_columns();

        let mut base_model = Arc::clone(&self.model);
        let mut base_qualifier = self.model.table_alias.clone();
        for part in name.split('.') {
            let (qualifier, target, _) =
                self.mount_association(&base_model, &base_qualifier, part)?;
            base_model = target;
            base_qualifier = qualifier;
        }
        Ok(self)
    }

    /// Mount an arbitrary model under a qualifier with an explicit ON
    /// condition.
    pub fn join(
        &self,
        model_name: &str,
        qualifier: &str,
        on: impl IntoConditions,
    ) -> Result<Self> {
        let mut spell = self.dup();
        spell.join_mut(model_name, qualifier, on)?;
        Ok(spell)
    }

    pub fn join_mut(
        &mut self,
        model_name: &str,
        qualifier: &str,
        on: impl IntoConditions,
    ) -> Result<&mut Self> {
        self.promote_if_limited();
        self.ensure_join_columns();

        if self.query.joins.contains_key(qualifier) {
            return Err(Error::DuplicateJoin {
                qualifier: qualifier.to_owned(),
            });
        }
        let target = self.schema.require_model(model_name)?;
        let on = fold_and(on.into_conditions()?).ok_or_else(|| Error::MalformedConditions {
            detail: "join requires an ON condition".to_owned(),
        })?;
        self.query.joins.insert(
            qualifier.to_owned(),
            Join {
                model: target.name.clone(),
                on,
                has_many: false,
            },
        );
        Ok(self)
    }

    /// Resolve one association hop from `base_model` and mount it. Returns
    /// the mounted qualifier, the target model, and the propagated
    /// one-to-many flag.
    fn mount_association(
        &mut self,
        base_model: &Arc<ModelDef>,
        base_qualifier: &str,
        name: &str,
    ) -> Result<(String, Arc<ModelDef>, bool)> {
        let (key, def) = base_model
            .association(name)
            .map(|(k, d)| (k.to_owned(), d.clone()))
            .ok_or_else(|| Error::UnknownAssociation {
                model: base_model.name.clone(),
                name: name.to_owned(),
            })?;

        if let Some(through) = &def.through {
            // Mount the intermediate hop at most once, wherever it was
            // reached from first.
            let (through_qualifier, through_model, through_many) =
                if let Some(join) = self.query.joins.get(through) {
                    let model = self.schema.require_model(&join.model)?;
                    (through.clone(), model, join.has_many)
                } else {
                    self.mount_association(base_model, base_qualifier, through)?
                };

            // The final hop lives on the intermediate model: match by
            // association name first, then by target model.
            let (_, hop) = through_model
                .association(&key)
                .map(|(k, d)| (k.to_owned(), d.clone()))
                .or_else(|| {
                    through_model
                        .associations
                        .iter()
                        .find(|(_, d)| d.model == def.model)
                        .map(|(k, d)| (k.clone(), d.clone()))
                })
                .ok_or_else(|| Error::UnknownAssociation {
                    model: through_model.name.clone(),
                    name: key.clone(),
                })?;

            let has_many = through_many || def.kind.is_many() || hop.kind.is_many();
            let target =
                self.mount_single(&through_model, &through_qualifier, &key, &hop, has_many)?;
            return Ok((key, target, has_many));
        }

        let has_many = def.kind.is_many();
        let target = self.mount_single(base_model, base_qualifier, &key, &def, has_many)?;
        Ok((key, target, has_many))
    }

    /// Mount one direct association under `qualifier`.
    fn mount_single(
        &mut self,
        base_model: &Arc<ModelDef>,
        base_qualifier: &str,
        qualifier: &str,
        def: &AssociationDef,
        has_many: bool,
    ) -> Result<Arc<ModelDef>> {
        if self.query.joins.contains_key(qualifier) {
            return Err(Error::DuplicateJoin {
                qualifier: qualifier.to_owned(),
            });
        }
        let target = self.schema.require_model(&def.model)?;

        // The key comparison depends on direction: belongs-to holds the
        // foreign key on the base side, has-one/has-many on the target.
        let mut on = match def.kind {
            AssociationKind::BelongsTo => Expr::binop(
                Op::Eq,
                Expr::qualified(base_qualifier, &def.foreign_key),
                Expr::qualified(qualifier, &target.primary_key),
            ),
            AssociationKind::HasOne | AssociationKind::HasMany => Expr::binop(
                Op::Eq,
                Expr::qualified(base_qualifier, &base_model.primary_key),
                Expr::qualified(qualifier, &def.foreign_key),
            ),
        };

        // Association-level default conditions, rewritten onto the target
        // qualifier and AND-merged into the ON condition.
        if let Some(conditions) = &def.default_where {
            let exprs = parse_object(&conditions_from_json(conditions)?)?;
            for expr in exprs {
                let qualified = qualify_expr(&expr, qualifier);
                on = Expr::binop(Op::And, on, qualified);
            }
        }

        // A restricted selection merges into the outer list, verified
        // against the target model.
        if let Some(selection) = &def.select {
            for name in selection {
                target.column_of(name, "SELECT")?;
                let column = Expr::qualified(qualifier, name.clone());
                if !self.query.columns.contains(&column) {
                    self.query.columns.push(column);
                }
            }
        }

        self.query.joins.insert(
            qualifier.to_owned(),
            Join {
                model: target.name.clone(),
                on,
                has_many,
            },
        );
        Ok(target)
    }

    /// Wrap the current query as the FROM subquery when a join arrives after
    /// LIMIT/OFFSET, so the limit keeps bounding base rows.
    pub(crate) fn promote_if_limited(&mut self) {
        if !self.query.is_limited() || !self.query.joins.is_empty() {
            return;
        }
        tracing::trace!(model = %self.model.name, "promoting limited query into subquery");
        let inner = std::mem::replace(
            &mut self.query,
            Query::select_from(&self.model.name, &self.model.table),
        );
        self.query.table = Box::new(Expr::Subquery(Box::new(inner)));
    }

    /// Joined queries need an explicit base selection so joined columns can
    /// be told apart from base columns in flat result shapes.
    pub(crate) fn ensure_join_columns(&mut self) {
        if !self.query.joins.is_empty() || !self.query.columns.is_empty() {
            return;
        }
        let base = self.model.table_alias.clone();
        for attr in self.model.attributes.values() {
            if !attr.is_virtual {
                self.query
                    .columns
                    .push(Expr::qualified(base.clone(), attr.name.clone()));
            }
        }
    }
}

/// Rewrite unqualified identifiers onto a join qualifier.
fn qualify_expr(expr: &Expr, qualifier: &str) -> Expr {
    copy_expr(expr, &mut |node| match node {
        Expr::Id(ident) if ident.qualifier().is_none() => {
            Some(Expr::qualified(qualifier, ident.name.clone()))
        }
        _ => None,
    })
}
