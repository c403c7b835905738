//! grimoire — an AST-based query builder with dialect spellbooks.
//!
//! The pipeline, leaf to root: a hand-written expression parser and a
//! MongoDB-style object translator both produce the same expression AST
//! (`grimoire-parser` / `grimoire-ast`); the deferred builder
//! ([`Spell`]) assembles query AST with fork-on-write semantics
//! (`grimoire-spell`); dialect spellbooks render parameterized SQL for
//! MySQL-family, PostgreSQL, and SQLite backends and re-shape driver rows
//! (`grimoire-spellbook`); the result dispatcher reconstructs object graphs
//! from the join fan-out.
//!
//! ```no_run
//! use std::sync::Arc;
//! use grimoire::prelude::*;
//! use grimoire::testkit::ScriptedDriver;
//! use serde_json::json;
//!
//! # fn main() -> grimoire::Result<()> {
//! let mut realm = Realm::new(Arc::new(ScriptedDriver::new(Dialect::MySql)));
//! realm.define(
//!     ModelDef::new("Post", "articles")
//!         .with_attribute(AttributeDef::new("id", ColumnType::BigInt).primary())
//!         .with_attribute(AttributeDef::new("title", ColumnType::Varchar(255))),
//! );
//! realm.connect()?;
//!
//! let posts = realm.spell("Post")?;
//! let recent = posts.where_(json!({"title": {"$like": "%rust%"}}))?.limit(10);
//! let records = recent.all()?;
//! # let _ = records;
//! # Ok(())
//! # }
//! ```

mod realm;

pub use realm::Realm;

pub use grimoire_ast::{
    copy_expr, precedes, walk_expr, Command, CommentHint, Expr, FuncCall, Hint, Ident,
    IndexHint, IndexHintKind, IndexHintScope, Join, Modifier, Op, Query, ReturningType, Sets,
    SortDirection,
};
pub use grimoire_error::{Error, Result};
pub use grimoire_parser::{
    conditions_from_json, parse_expr, parse_expr_list, parse_object, Conditions, Operand,
    ParseError,
};
pub use grimoire_spell::{
    dispatch, Batch, IntoConditions, IntoOrder, IntoSets, Payload, Record, Related, Scope,
    SetValue, Spell,
};
pub use grimoire_spellbook::{
    spellbook_for, Connection, Dialect, Driver, FieldInfo, MySqlSpellbook, NestedRow,
    PostgresSpellbook, QueryOutcome, Rows, Spellbook, SqliteSpellbook, SqlStatement,
    StatementKind,
};
pub use grimoire_types::{
    AssociationDef, AssociationKind, AttributeDef, ColumnType, ModelDef, Schema, Timestamps,
    Value,
};

/// The scripted driver double, re-exported for downstream test suites.
pub use grimoire_spell::testkit;

/// The everyday imports.
pub mod prelude {
    pub use crate::{
        AssociationDef, AssociationKind, AttributeDef, ColumnType, Dialect, Driver, Hint,
        ModelDef, Payload, Realm, Record, Related, Schema, Scope, Spell, Timestamps, Value,
    };
}
