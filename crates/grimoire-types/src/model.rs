use indexmap::IndexMap;

use grimoire_error::{Error, Result};

use crate::ColumnType;

/// One mapped attribute: model-side name plus its persisted column.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct AttributeDef {
    /// Attribute name as the model exposes it.
    pub name: String,
    /// Column name in the table.
    pub column_name: String,
    /// Persisted type, driving cast/uncast.
    pub column_type: ColumnType,
    /// Whether this attribute is the primary key.
    pub primary: bool,
    /// Virtual attributes are computed and never persisted; referencing one
    /// where a column is required is a build error.
    pub is_virtual: bool,
}

impl AttributeDef {
    /// A plain persisted attribute whose column name equals its name.
    #[must_use]
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        let name = name.into();
        Self {
            column_name: name.clone(),
            name,
            column_type,
            primary: false,
            is_virtual: false,
        }
    }

    /// Mark as primary key.
    #[must_use]
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    /// Mark as virtual (computed, non-persisted).
    #[must_use]
    pub fn virtual_attr(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    /// Override the persisted column name.
    #[must_use]
    pub fn column(mut self, column_name: impl Into<String>) -> Self {
        self.column_name = column_name.into();
        self
    }
}

/// Association cardinality.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AssociationKind {
    HasMany,
    HasOne,
    BelongsTo,
}

impl AssociationKind {
    /// Whether the association fans out to multiple rows.
    #[must_use]
    pub const fn is_many(self) -> bool {
        matches!(self, Self::HasMany)
    }
}

/// Static per-model association metadata, declared once at definition time
/// and immutable thereafter. Consumed by the JOIN planner.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct AssociationDef {
    pub kind: AssociationKind,
    /// Target model name, resolved through the schema.
    pub model: String,
    /// Foreign-key attribute name. Lives on the target for `hasMany`/`hasOne`
    /// and on the base for `belongsTo`.
    pub foreign_key: String,
    /// Intermediate association name for many-to-many hops.
    pub through: Option<String>,
    /// Default conditions in object form, qualified onto the join target.
    pub default_where: Option<serde_json::Value>,
    /// Restricted selection list, qualified onto the join target.
    pub select: Option<Vec<String>>,
}

impl AssociationDef {
    #[must_use]
    pub fn new(
        kind: AssociationKind,
        model: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            model: model.into(),
            foreign_key: foreign_key.into(),
            through: None,
            default_where: None,
            select: None,
        }
    }

    /// Route the association through an intermediate association.
    #[must_use]
    pub fn through(mut self, name: impl Into<String>) -> Self {
        self.through = Some(name.into());
        self
    }

    /// Default conditions applied to the join target.
    #[must_use]
    pub fn where_default(mut self, conditions: serde_json::Value) -> Self {
        self.default_where = Some(conditions);
        self
    }

    /// Restrict the columns selected from the join target.
    #[must_use]
    pub fn select(mut self, columns: Vec<String>) -> Self {
        self.select = Some(columns);
        self
    }
}

/// Names of the automatic timestamp attributes a model declares, if any.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Timestamps {
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    /// Presence of a deleted-at attribute is what switches a model into
    /// paranoid (soft-delete) mode.
    pub deleted_at: Option<String>,
}

/// Read-only metadata for one mapped model.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ModelDef {
    /// Model name, unique within a schema.
    pub name: String,
    /// Table name.
    pub table: String,
    /// Qualifier used for this table when it is the join base.
    pub table_alias: String,
    /// Primary-key attribute name.
    pub primary_key: String,
    /// Attribute name → definition, in declaration order.
    pub attributes: IndexMap<String, AttributeDef>,
    /// Association name → descriptor, in declaration order.
    pub associations: IndexMap<String, AssociationDef>,
    pub timestamps: Timestamps,
    /// Model-level default scope in object-condition form.
    pub default_scope: Option<serde_json::Value>,
}

impl ModelDef {
    #[must_use]
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        let table = table.into();
        Self {
            name: name.into(),
            table_alias: table.clone(),
            table,
            primary_key: "id".to_owned(),
            attributes: IndexMap::new(),
            associations: IndexMap::new(),
            timestamps: Timestamps::default(),
            default_scope: None,
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, attr: AttributeDef) -> Self {
        if attr.primary {
            self.primary_key = attr.name.clone();
        }
        self.attributes.insert(attr.name.clone(), attr);
        self
    }

    #[must_use]
    pub fn with_association(mut self, name: impl Into<String>, def: AssociationDef) -> Self {
        self.associations.insert(name.into(), def);
        self
    }

    #[must_use]
    pub fn with_timestamps(mut self, timestamps: Timestamps) -> Self {
        self.timestamps = timestamps;
        self
    }

    #[must_use]
    pub fn with_default_scope(mut self, conditions: serde_json::Value) -> Self {
        self.default_scope = Some(conditions);
        self
    }

    /// Look up an attribute by name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.get(name)
    }

    /// Attribute lookup that fails with the build-error taxonomy.
    pub fn require_attribute(&self, name: &str) -> Result<&AttributeDef> {
        self.attribute(name).ok_or_else(|| Error::UnknownAttribute {
            model: self.name.clone(),
            attribute: name.to_owned(),
        })
    }

    /// Persisted column name for an attribute; virtual attributes are
    /// rejected with the clause named in the error.
    pub fn column_of(&self, name: &str, clause: &str) -> Result<&str> {
        let attr = self.require_attribute(name)?;
        if attr.is_virtual {
            return Err(Error::VirtualAttribute {
                attribute: name.to_owned(),
                clause: clause.to_owned(),
            });
        }
        Ok(&attr.column_name)
    }

    /// Column name of the primary key.
    #[must_use]
    pub fn primary_column(&self) -> &str {
        self.attributes
            .get(&self.primary_key)
            .map_or(self.primary_key.as_str(), |a| a.column_name.as_str())
    }

    /// Whether the model soft-deletes.
    #[must_use]
    pub fn is_paranoid(&self) -> bool {
        self.timestamps
            .deleted_at
            .as_ref()
            .is_some_and(|name| self.attributes.contains_key(name))
    }

    /// Resolve an association by exact name, then by the naive
    /// singular/plural flip (`comment` ↔ `comments`).
    #[must_use]
    pub fn association(&self, name: &str) -> Option<(&str, &AssociationDef)> {
        if let Some((key, def)) = self.associations.get_key_value(name) {
            return Some((key.as_str(), def));
        }
        let flipped = if let Some(stripped) = name.strip_suffix('s') {
            stripped.to_owned()
        } else {
            format!("{name}s")
        };
        self.associations
            .get_key_value(flipped.as_str())
            .map(|(key, def)| (key.as_str(), def))
    }
}
