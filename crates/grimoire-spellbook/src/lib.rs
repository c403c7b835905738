//! Dialect spellbooks: SQL statement formatting and result-shape handling
//! for MySQL-family, PostgreSQL, and SQLite backends.
//!
//! A spellbook turns a query AST into one parameterized [`SqlStatement`] and
//! knows how to bring the driver's rows back into a uniform nested shape.
//! The [`Driver`] trait is the seam to the out-of-workspace connection
//! layer: the pipeline produces SQL text and consumes rows, nothing more.

pub mod book;
pub mod driver;
pub mod format;
mod mysql;
mod postgres;
mod sqlite;

pub use book::Spellbook;
pub use driver::{
    Connection, Dialect, Driver, FieldInfo, NestedRow, QueryOutcome, Rows, SqlStatement,
    StatementKind,
};
pub use format::{collect_literal, format_conditions, format_expr, FormatContext};
pub use mysql::MySqlSpellbook;
pub use postgres::PostgresSpellbook;
pub use sqlite::SqliteSpellbook;

/// The spellbook for a dialect.
#[must_use]
pub fn spellbook_for(dialect: Dialect) -> Box<dyn Spellbook> {
    match dialect {
        Dialect::MySql => Box::new(MySqlSpellbook),
        Dialect::Postgres => Box::new(PostgresSpellbook),
        Dialect::Sqlite => Box::new(SqliteSpellbook),
    }
}
