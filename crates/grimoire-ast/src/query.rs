use std::fmt;

use indexmap::IndexMap;

use crate::{Expr, Hint};

/// The statement shape a query renders to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Select,
    Insert,
    BulkInsert,
    Update,
    Delete,
    Upsert,
}

impl Command {
    /// Whether the command reads rows rather than writing them.
    #[must_use]
    pub const fn is_read(self) -> bool {
        matches!(self, Self::Select)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Select => "SELECT",
            Self::Insert | Self::BulkInsert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Upsert => "UPSERT",
        })
    }
}

/// Sort direction for an ORDER BY entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        })
    }
}

/// One mounted join, keyed by qualifier in [`Query::joins`].
#[derive(Clone, Debug, PartialEq)]
pub struct Join {
    /// Target model name, resolved through the schema.
    pub model: String,
    /// ON condition.
    pub on: Expr,
    /// Whether the join fans out (one-to-many); drives result dispatch.
    pub has_many: bool,
}

/// SET data for write commands. Keys are column names; values are already
/// uncast literal expressions (or raw pass-through fragments).
#[derive(Clone, Debug, PartialEq)]
pub enum Sets {
    One(IndexMap<String, Expr>),
    Many(Vec<IndexMap<String, Expr>>),
}

impl Sets {
    /// Whether there is nothing to set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::One(map) => map.is_empty(),
            Self::Many(rows) => rows.iter().all(IndexMap::is_empty),
        }
    }
}

/// The written form of a spell: everything a dialect needs to render one
/// statement. This is the builder's output and the formatter's input.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    /// Owning model name, resolved against the schema during formatting.
    pub model: String,
    pub command: Command,
    /// Selection list; empty means `*`.
    pub columns: Vec<Expr>,
    /// FROM target: an identifier, or a subquery after promotion.
    pub table: Box<Expr>,
    /// WHERE conditions, implicitly AND-joined.
    pub wheres: Vec<Expr>,
    pub groups: Vec<Expr>,
    /// HAVING conditions, implicitly AND-joined.
    pub havings: Vec<Expr>,
    pub orders: Vec<(Expr, SortDirection)>,
    /// Qualifier → join, in mount order.
    pub joins: IndexMap<String, Join>,
    /// OFFSET.
    pub skip: Option<u64>,
    /// LIMIT.
    pub row_count: Option<u64>,
    /// SET data for write commands.
    pub sets: Option<Sets>,
    /// Optimizer hints, de-duplicated in mount order.
    pub hints: Vec<Hint>,
}

impl Query {
    /// A fresh SELECT query over a model's table.
    #[must_use]
    pub fn select_from(model: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            command: Command::Select,
            columns: Vec::new(),
            table: Box::new(Expr::id(table)),
            wheres: Vec::new(),
            groups: Vec::new(),
            havings: Vec::new(),
            orders: Vec::new(),
            joins: IndexMap::new(),
            skip: None,
            row_count: None,
            sets: None,
            hints: Vec::new(),
        }
    }

    /// Whether a LIMIT or OFFSET is already in effect. Joins arriving after
    /// this point must promote the query into a subquery first.
    #[must_use]
    pub const fn is_limited(&self) -> bool {
        self.skip.is_some() || self.row_count.is_some()
    }
}
