//! The driver seam: what the query pipeline asks of a database driver and
//! the row/field shapes it consumes back.
//!
//! Driver implementations (connection pooling, wire protocol) live outside
//! this workspace; the pipeline only produces parameterized SQL and
//! post-processes the row shapes defined here.

use std::fmt;

use indexmap::IndexMap;

use grimoire_error::Result;
use grimoire_types::Value;

/// Supported database dialects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Postgres,
    Sqlite,
}

impl Dialect {
    /// The identifier quote character.
    #[must_use]
    pub const fn quote_char(self) -> char {
        match self {
            Self::MySql => '`',
            Self::Postgres | Self::Sqlite => '"',
        }
    }
}

/// Whether a statement reads rows or writes them. SQLite drivers use this to
/// choose between query and execute calls and to know when to synthesize a
/// `last_insert_rowid()` lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatementKind {
    Read,
    Write,
}

/// One formatted statement: SQL text plus bound values.
#[derive(Clone, Debug, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub values: Vec<Value>,
    pub kind: StatementKind,
    /// Ask the driver for table-qualified rows (MySQL `nestTables` mode).
    /// Set on SELECTs with joins.
    pub nest_tables: bool,
}

/// Per-column metadata reported by the driver alongside flat rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldInfo {
    /// Column (or alias) name.
    pub name: String,
    /// Driver-reported source-table id, when the driver knows it
    /// (PostgreSQL). Computed columns report `None`.
    pub table_id: Option<u32>,
}

impl FieldInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, table_id: Option<u32>) -> Self {
        Self {
            name: name.into(),
            table_id,
        }
    }
}

/// A row re-nested by table qualifier: qualifier → column → value.
pub type NestedRow = IndexMap<String, IndexMap<String, Value>>;

/// Row data in whichever shape the driver produced.
#[derive(Clone, Debug, PartialEq)]
pub enum Rows {
    /// Flat rows with per-column field metadata.
    Flat {
        fields: Vec<FieldInfo>,
        rows: Vec<Vec<Value>>,
    },
    /// Rows already partitioned by table qualifier.
    Nested(Vec<NestedRow>),
}

impl Rows {
    /// Number of rows in either shape.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Flat { rows, .. } => rows.len(),
            Self::Nested(rows) => rows.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What came back from one statement execution.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryOutcome {
    pub rows: Option<Rows>,
    /// Generated key for inserts, where the driver reports one natively.
    pub insert_id: Option<i64>,
    pub affected_rows: u64,
}

/// An opaque connection handle, passed through when the caller manages its
/// own transaction instead of drawing from the pool.
pub trait Connection: Send + Sync + fmt::Debug {}

/// The driver collaborator contract.
///
/// The pipeline calls exactly these entry points and never issues raw I/O
/// itself. Execution errors are propagated unchanged.
pub trait Driver: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Execute one statement, optionally on an explicit connection.
    fn execute(
        &self,
        statement: &SqlStatement,
        connection: Option<&dyn Connection>,
    ) -> Result<QueryOutcome>;

    /// Quote an identifier for this driver's dialect.
    fn escape_id(&self, name: &str) -> String {
        let q = self.dialect().quote_char();
        let escaped = name.replace(q, &format!("{q}{q}"));
        format!("{q}{escaped}{q}")
    }

    /// Schema introspection; drivers that cannot introspect return nothing.
    fn query_schema_info(&self, _database: &str, _tables: &[String]) -> Result<Vec<NestedRow>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopDriver;

    impl Driver for NoopDriver {
        fn dialect(&self) -> Dialect {
            Dialect::MySql
        }

        fn execute(
            &self,
            _statement: &SqlStatement,
            _connection: Option<&dyn Connection>,
        ) -> Result<QueryOutcome> {
            Ok(QueryOutcome::default())
        }
    }

    #[test]
    fn test_escape_id_per_dialect() {
        assert_eq!(NoopDriver.escape_id("order"), "`order`");
        assert_eq!(NoopDriver.escape_id("we`ird"), "`we``ird`");
    }
}
