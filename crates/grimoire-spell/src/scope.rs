//! Composable query scopes.
//!
//! A scope is a closure that appends WHERE/ORDER/LIMIT state to a builder.
//! Scopes compose at construction time (model default scope, the automatic
//! soft-delete predicate, explicit scopes) and apply lazily when the spell
//! is formatted or executed. The paranoid tag lets `unparanoid` strip the
//! soft-delete predicate alone, while `unscoped` strips everything.

use std::fmt;
use std::sync::Arc;

use grimoire_error::Result;

use crate::Spell;

type ApplyFn = dyn Fn(&mut Spell) -> Result<()> + Send + Sync;

/// One composable filter applied to a spell before formatting.
#[derive(Clone)]
pub struct Scope {
    name: String,
    paranoid: bool,
    apply: Arc<ApplyFn>,
}

impl Scope {
    /// A named scope.
    pub fn new(
        name: impl Into<String>,
        apply: impl Fn(&mut Spell) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            paranoid: false,
            apply: Arc::new(apply),
        }
    }

    /// The automatic soft-delete predicate; strippable via `unparanoid`.
    pub fn paranoid(
        name: impl Into<String>,
        apply: impl Fn(&mut Spell) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            paranoid: true,
            apply: Arc::new(apply),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn is_paranoid(&self) -> bool {
        self.paranoid
    }

    /// Apply this scope's state to a builder.
    pub fn apply(&self, spell: &mut Spell) -> Result<()> {
        (self.apply)(spell)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.name)
            .field("paranoid", &self.paranoid)
            .finish_non_exhaustive()
    }
}
