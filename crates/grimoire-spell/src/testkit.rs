//! A scripted in-memory driver for exercising the pipeline without a
//! database. Tests queue outcomes, run spells, and inspect the statements
//! the pipeline produced.

use std::collections::VecDeque;
use std::sync::Mutex;

use grimoire_error::Result;
use grimoire_spellbook::{
    Connection, Dialect, Driver, FieldInfo, QueryOutcome, Rows, SqlStatement,
};
use grimoire_types::Value;

/// Driver double that replays queued outcomes and records every statement.
#[derive(Debug)]
pub struct ScriptedDriver {
    dialect: Dialect,
    outcomes: Mutex<VecDeque<QueryOutcome>>,
    executed: Mutex<Vec<SqlStatement>>,
}

impl ScriptedDriver {
    #[must_use]
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            outcomes: Mutex::new(VecDeque::new()),
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Queue the outcome for the next execution. With the queue empty,
    /// executions return an empty outcome.
    pub fn push_outcome(&self, outcome: QueryOutcome) {
        self.outcomes
            .lock()
            .expect("outcome queue poisoned")
            .push_back(outcome);
    }

    /// Queue a flat row set.
    pub fn push_rows(&self, fields: &[&str], rows: Vec<Vec<Value>>) {
        self.push_outcome(QueryOutcome {
            rows: Some(Rows::Flat {
                fields: fields.iter().map(|f| FieldInfo::new(*f, None)).collect(),
                rows,
            }),
            insert_id: None,
            affected_rows: 0,
        });
    }

    /// Statements executed so far, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<SqlStatement> {
        self.executed
            .lock()
            .expect("statement log poisoned")
            .clone()
    }

    /// Number of executions so far.
    #[must_use]
    pub fn execution_count(&self) -> usize {
        self.executed
            .lock()
            .expect("statement log poisoned")
            .len()
    }
}

impl Driver for ScriptedDriver {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn execute(
        &self,
        statement: &SqlStatement,
        _connection: Option<&dyn Connection>,
    ) -> Result<QueryOutcome> {
        self.executed
            .lock()
            .expect("statement log poisoned")
            .push(statement.clone());
        Ok(self
            .outcomes
            .lock()
            .expect("outcome queue poisoned")
            .pop_front()
            .unwrap_or_default())
    }
}
