use grimoire_error::{Error, Result};

use crate::Value;

/// Persisted column types known to the pipeline.
///
/// These drive the two value-coercion directions: `uncast` when a model
/// value is bound into a statement, `cast` when a driver row comes back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ColumnType {
    Boolean,
    Integer,
    BigInt,
    Float,
    Text,
    Varchar(u32),
    Date,
    DateTime,
    Json,
    Blob,
}

impl ColumnType {
    /// Human-readable name for error messages.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Boolean => "BOOLEAN",
            Self::Integer => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::Float => "FLOAT",
            Self::Text => "TEXT",
            Self::Varchar(_) => "VARCHAR",
            Self::Date => "DATE",
            Self::DateTime => "DATETIME",
            Self::Json => "JSON",
            Self::Blob => "BLOB",
        }
    }

    /// Coerce a model-side value into its DB-representable form before it is
    /// bound into a statement.
    ///
    /// Only impossible conversions fail; anything representable passes
    /// through so the database stays the authority on finer validation.
    pub fn uncast(self, column: &str, value: Value) -> Result<Value> {
        let fail = |value: &Value| Error::UncastFailed {
            column: column.to_owned(),
            column_type: self.name().to_owned(),
            value: value.to_sql_literal(),
        };
        if value.is_null() {
            return Ok(value);
        }
        match self {
            Self::Boolean => match value {
                Value::Bool(_) => Ok(value),
                Value::Integer(i) if i == 0 || i == 1 => Ok(Value::Bool(i == 1)),
                other => Err(fail(&other)),
            },
            Self::Integer | Self::BigInt => match value {
                Value::Integer(_) => Ok(value),
                Value::Bool(b) => Ok(Value::Integer(i64::from(b))),
                Value::Float(f) if f.fract() == 0.0 => Ok(Value::Integer(f as i64)),
                Value::Text(ref s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|_| fail(&value)),
                other => Err(fail(&other)),
            },
            Self::Float => match value {
                Value::Float(_) => Ok(value),
                Value::Integer(i) => Ok(Value::Float(i as f64)),
                Value::Text(ref s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| fail(&value)),
                other => Err(fail(&other)),
            },
            Self::Text | Self::Varchar(_) | Self::Date | Self::DateTime => match value {
                Value::Text(_) => Ok(value),
                Value::Integer(i) => Ok(Value::Text(i.to_string())),
                Value::Float(f) => Ok(Value::Text(f.to_string())),
                other => Err(fail(&other)),
            },
            Self::Json => match value {
                // JSON columns persist as text; lists and scalars serialize.
                Value::Text(_) => Ok(value),
                Value::List(_) | Value::Bool(_) | Value::Integer(_) | Value::Float(_) => {
                    Ok(Value::Text(json_text(&value)))
                }
                other => Err(fail(&other)),
            },
            Self::Blob => match value {
                Value::Blob(_) => Ok(value),
                Value::Text(s) => Ok(Value::Blob(s.into_bytes())),
                other => Err(fail(&other)),
            },
        }
    }

    /// Coerce a driver-returned value back to the model-side type.
    ///
    /// Never fails the query: a value that cannot be coerced is logged and
    /// passed through raw.
    #[must_use]
    pub fn cast(self, column: &str, value: Value) -> Value {
        if value.is_null() {
            return value;
        }
        let coerced = match self {
            Self::Boolean => match &value {
                Value::Bool(_) => Some(value.clone()),
                Value::Integer(i) if *i == 0 || *i == 1 => Some(Value::Bool(*i == 1)),
                _ => None,
            },
            // PostgreSQL returns oversized integers as strings; bring them
            // back to the numeric type the attribute declares.
            Self::Integer | Self::BigInt => match &value {
                Value::Integer(_) => Some(value.clone()),
                Value::Text(s) => s.trim().parse::<i64>().ok().map(Value::Integer),
                Value::Float(f) if f.fract() == 0.0 => Some(Value::Integer(*f as i64)),
                _ => None,
            },
            Self::Float => match &value {
                Value::Float(_) => Some(value.clone()),
                Value::Integer(i) => Some(Value::Float(*i as f64)),
                Value::Text(s) => s.trim().parse::<f64>().ok().map(Value::Float),
                _ => None,
            },
            Self::Text | Self::Varchar(_) | Self::Date | Self::DateTime | Self::Json => {
                match &value {
                    Value::Text(_) => Some(value.clone()),
                    Value::Integer(i) => Some(Value::Text(i.to_string())),
                    Value::Float(f) => Some(Value::Text(f.to_string())),
                    _ => None,
                }
            }
            Self::Blob => match &value {
                Value::Blob(_) => Some(value.clone()),
                Value::Text(s) => Some(Value::Blob(s.clone().into_bytes())),
                _ => None,
            },
        };
        match coerced {
            Some(v) => v,
            None => {
                tracing::warn!(
                    column,
                    column_type = self.name(),
                    value = %value.to_sql_literal(),
                    "result value could not be cast, passing through raw"
                );
                value
            }
        }
    }
}

fn json_text(value: &Value) -> String {
    match value {
        Value::Null => "null".to_owned(),
        Value::Bool(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => serde_json::Value::String(s.clone()).to_string(),
        Value::Blob(_) => "null".to_owned(),
        Value::List(items) => {
            let inner: Vec<String> = items.iter().map(json_text).collect();
            format!("[{}]", inner.join(","))
        }
    }
}
