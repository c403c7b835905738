//! Values, column types, and model metadata for grimoire.
//!
//! The query pipeline is purely a consumer of this read-only metadata: a
//! [`ModelDef`] describes one mapped table, and a [`Schema`] is the explicit
//! registry the builder resolves model and association names against. There
//! is no global or per-class state; callers hold the schema behind an `Arc`
//! and pass it into every builder.

mod column;
mod model;
mod schema;
mod value;

pub use column::ColumnType;
pub use model::{
    AssociationDef, AssociationKind, AttributeDef, ModelDef, Timestamps,
};
pub use schema::Schema;
pub use value::Value;
