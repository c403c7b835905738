//! Connection-and-schema bootstrap handle.
//!
//! A `Realm` pairs one driver with one model registry. Models are defined,
//! the realm connects once (validating cross-model references), and spells
//! are minted against the frozen schema from then on. No global state: two
//! realms over the same models never interfere.

use std::sync::Arc;

use grimoire_error::{Error, Result};
use grimoire_spell::Spell;
use grimoire_spellbook::Driver;
use grimoire_types::{ModelDef, Schema};

/// One driver plus one connected schema.
pub struct Realm {
    driver: Arc<dyn Driver>,
    schema: Schema,
    frozen: Option<Arc<Schema>>,
}

impl Realm {
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            schema: Schema::new(),
            frozen: None,
        }
    }

    /// Register a model. Definitions after `connect` take effect on the
    /// next `connect`.
    pub fn define(&mut self, model: ModelDef) {
        self.schema.define(model);
    }

    /// Validate the registry and freeze it for spell construction.
    pub fn connect(&mut self) -> Result<()> {
        self.schema.connect()?;
        let tables: Vec<String> = self
            .schema
            .models()
            .map(|m| m.table.clone())
            .collect();
        // Schema introspection is the driver's business; the result is
        // advisory here.
        let info = self.driver.query_schema_info("", &tables)?;
        tracing::debug!(tables = tables.len(), described = info.len(), "realm connected");
        self.frozen = Some(Arc::new(self.schema.clone()));
        Ok(())
    }

    /// The frozen schema, once connected.
    pub fn schema(&self) -> Result<Arc<Schema>> {
        self.frozen.clone().ok_or(Error::NotConnected {
            model: "<realm>".to_owned(),
        })
    }

    /// Mint a spell over one model.
    pub fn spell(&self, model_name: &str) -> Result<Spell> {
        Spell::new(self.schema()?, Arc::clone(&self.driver), model_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grimoire_spell::testkit::ScriptedDriver;
    use grimoire_spellbook::Dialect;
    use grimoire_types::{AttributeDef, ColumnType};

    #[test]
    fn test_spell_requires_connect() {
        let mut realm = Realm::new(Arc::new(ScriptedDriver::new(Dialect::MySql)));
        realm.define(
            ModelDef::new("Post", "articles")
                .with_attribute(AttributeDef::new("id", ColumnType::BigInt).primary()),
        );
        assert!(realm.spell("Post").is_err());
        realm.connect().unwrap();
        assert!(realm.spell("Post").is_ok());
    }
}
