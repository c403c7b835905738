//! Error taxonomy for the grimoire query-construction pipeline.
//!
//! Build errors surface synchronously at the offending builder call, before
//! any I/O. Execution errors come back from the driver unchanged, wrapped
//! only to unify the return type. Result casting never produces an error at
//! all; the dialect layer logs and passes the raw value through.

use thiserror::Error;

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for grimoire operations.
///
/// Every build-time variant names the offending field, operator, or
/// association so misuse is diagnosable without stepping through the AST.
#[derive(Error, Debug)]
pub enum Error {
    // === Build errors (before any I/O) ===
    /// An attribute referenced in WHERE/GROUP/SELECT/HAVING/ORDER does not
    /// exist on the model.
    #[error("unknown attribute \"{attribute}\" on model {model}")]
    UnknownAttribute { model: String, attribute: String },

    /// A virtual (computed, non-persisted) attribute was used where only
    /// persisted columns are allowed.
    #[error("virtual attribute \"{attribute}\" cannot be used in {clause}")]
    VirtualAttribute { attribute: String, clause: String },

    /// The same join qualifier was mounted twice.
    #[error("duplicate join qualifier \"{qualifier}\"")]
    DuplicateJoin { qualifier: String },

    /// No association with the given name (or its singular/plural flip) is
    /// declared on the model.
    #[error("unable to find association \"{name}\" on model {model}")]
    UnknownAssociation { model: String, name: String },

    /// An operator other than `=`/`!=` was applied against NULL.
    #[error("invalid operator {op} against null")]
    NullComparison { op: String },

    /// An aggregate was given something other than an identifier or `*`.
    #[error("invalid aggregate operand \"{operand}\" for {function}()")]
    InvalidAggregateOperand { function: String, operand: String },

    /// `$between`/`$notBetween` received something other than a two-element
    /// array of bounds.
    #[error("{op} expects an array of two bounds, got {got}")]
    MalformedBetween { op: String, got: String },

    /// An unrecognized `$`-operator appeared in an object condition.
    #[error("unexpected operator {op} in conditions")]
    UnknownOperator { op: String },

    /// A condition object could not be interpreted.
    #[error("unexpected conditions {detail}")]
    MalformedConditions { detail: String },

    /// Expression text failed to parse. Produced from the parser's own
    /// `ParseError` via `From`.
    #[error("parse error at {line}:{col}: {message}")]
    Parse { message: String, line: u32, col: u32 },

    /// The model has not completed schema initialization.
    #[error("model {model} is not connected yet")]
    NotConnected { model: String },

    /// No model with the given name is defined on the schema.
    #[error("no such model: {name}")]
    UnknownModel { name: String },

    /// A value could not be represented in the column's persisted type.
    #[error("cannot persist {value} into {column} ({column_type})")]
    UncastFailed {
        column: String,
        column_type: String,
        value: String,
    },

    /// The builder was asked to format a write command with no SET data.
    #[error("{command} requires values to set")]
    EmptySets { command: String },

    // === Execution errors ===
    /// Whatever the underlying driver reported, propagated unchanged.
    #[error("{0}")]
    Driver(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wrap a driver-reported failure without reinterpreting it.
    pub fn driver(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Driver(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_offender() {
        let err = Error::UnknownAttribute {
            model: "Post".to_owned(),
            attribute: "missing".to_owned(),
        };
        assert_eq!(err.to_string(), "unknown attribute \"missing\" on model Post");

        let err = Error::NullComparison { op: ">".to_owned() };
        assert_eq!(err.to_string(), "invalid operator > against null");

        let err = Error::DuplicateJoin {
            qualifier: "authors".to_owned(),
        };
        assert!(err.to_string().contains("authors"));
    }
}
