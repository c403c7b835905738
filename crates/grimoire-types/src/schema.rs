use std::sync::Arc;

use indexmap::IndexMap;

use grimoire_error::{Error, Result};

use crate::ModelDef;

/// The explicit model registry.
///
/// Models are defined, then the schema is connected once; the builder
/// refuses to construct queries against an unconnected schema. The whole
/// registry is frozen behind an `Arc` after that, so concurrent readers need
/// no locking.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    models: IndexMap<String, Arc<ModelDef>>,
    connected: bool,
}

impl Schema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model definition. Later definitions with the same name
    /// replace earlier ones.
    pub fn define(&mut self, model: ModelDef) {
        self.models.insert(model.name.clone(), Arc::new(model));
    }

    /// Validate cross-model references and mark the schema initialized.
    ///
    /// Association targets and `through` hops must resolve; an unresolvable
    /// reference is reported against the declaring model.
    pub fn connect(&mut self) -> Result<()> {
        for model in self.models.values() {
            for (name, def) in &model.associations {
                if !self.models.contains_key(&def.model) {
                    return Err(Error::UnknownAssociation {
                        model: model.name.clone(),
                        name: format!("{name} -> {}", def.model),
                    });
                }
                if let Some(through) = &def.through {
                    if model.association(through).is_none() {
                        return Err(Error::UnknownAssociation {
                            model: model.name.clone(),
                            name: through.clone(),
                        });
                    }
                }
            }
        }
        self.connected = true;
        tracing::debug!(models = self.models.len(), "schema connected");
        Ok(())
    }

    /// Whether `connect` has completed.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    /// Look up a model by name.
    #[must_use]
    pub fn model(&self, name: &str) -> Option<Arc<ModelDef>> {
        self.models.get(name).cloned()
    }

    /// Model lookup that fails with the error taxonomy.
    pub fn require_model(&self, name: &str) -> Result<Arc<ModelDef>> {
        self.model(name).ok_or_else(|| Error::UnknownModel {
            name: name.to_owned(),
        })
    }

    /// Iterate models in definition order.
    pub fn models(&self) -> impl Iterator<Item = &Arc<ModelDef>> {
        self.models.values()
    }
}
