//! Row values exchanged with every adapter.

use crate::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An ordered mapping from field name to value.
pub type Row = serde_json::Map<String, Value>;

/// Converts a JSON payload into a row.
pub fn into_row(value: Value) -> StoreResult<Row> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::validation(format!(
            "expected an object, got {}",
            json_type_name(&other)
        ))),
    }
}

/// Returns the JSON type name of a value, as used in error messages.
#[must_use]
pub const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Short `{id, name}` description of a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub id: String,
    pub name: String,
}

impl Descriptor {
    /// Builds a descriptor from a row, if it carries both an id and a name.
    #[must_use]
    pub fn from_row(row: &Row, id_field: &str) -> Option<Self> {
        let id = row.get(id_field).and_then(crate::external_id_of)?;
        let name = match row.get("name")? {
            Value::Null => return None,
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Some(Self { id, name })
    }
}
