//! Identifier normalization between backend-native keys and the canonical
//! external (string) form.

use crate::{Row, StoreError, StoreResult};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display};

/// The kind of backend an adapter talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Document store keyed by object ids.
    Document,
    /// MySQL, paginated with `LIMIT … OFFSET …`.
    MySql,
    /// PostgreSQL, paginated with `OFFSET … ROWS FETCH NEXT … ROWS ONLY`.
    Postgres,
    /// Embedded SQLite.
    Sqlite,
    /// Key-value store with caller-supplied keys.
    KeyValue,
}

impl BackendKind {
    /// Returns the identifier field adapters of this kind use by default.
    #[must_use]
    pub const fn default_id_field(self) -> &'static str {
        match self {
            Self::MySql | Self::Postgres => "id",
            Self::Document | Self::Sqlite | Self::KeyValue => "_id",
        }
    }

    /// Short name used in logs and errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Document => "mongodb",
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
            Self::KeyValue => "redis",
        }
    }

    /// Whether the backend generates ids on insert.
    #[must_use]
    pub const fn generates_ids(self) -> bool {
        !matches!(self, Self::KeyValue)
    }
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A backend-native primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NativeId {
    /// Document-store object id.
    ObjectId(ObjectId),
    /// Auto-increment integer key.
    Integer(i64),
    /// Opaque string key.
    Key(String),
}

impl NativeId {
    /// Converts the native id into its JSON representation for binding.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::ObjectId(oid) => Value::String(oid.to_hex()),
            Self::Integer(n) => Value::from(*n),
            Self::Key(k) => Value::String(k.clone()),
        }
    }
}

impl Display for NativeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_external(self))
    }
}

/// Converts a native id to its canonical string form.
#[must_use]
pub fn to_external(id: &NativeId) -> String {
    match id {
        NativeId::ObjectId(oid) => oid.to_hex(),
        NativeId::Integer(n) => n.to_string(),
        NativeId::Key(k) => k.clone(),
    }
}

/// Converts a canonical string id to the native key of `backend`.
///
/// Document ids must be 24-character hex object ids. SQL ids become
/// integers when they parse as one and stay opaque keys otherwise.
pub fn to_internal(id: &str, backend: BackendKind) -> StoreResult<NativeId> {
    if id.is_empty() {
        return Err(StoreError::malformed_id(id, "identifier is empty"));
    }

    match backend {
        BackendKind::Document => ObjectId::parse_str(id)
            .map(NativeId::ObjectId)
            .map_err(|e| StoreError::malformed_id(id, e.to_string())),
        BackendKind::MySql | BackendKind::Postgres | BackendKind::Sqlite => Ok(id
            .parse::<i64>()
            .map_or_else(|_| NativeId::Key(id.to_string()), NativeId::Integer)),
        BackendKind::KeyValue => Ok(NativeId::Key(id.to_string())),
    }
}

/// Returns the canonical string form of a JSON id value.
///
/// `null`, empty strings and structured values carry no usable id.
#[must_use]
pub fn external_id_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Rewrites the id field of a fetched row to its string form.
pub fn externalize(row: &mut Row, id_field: &str) {
    if let Some(value) = row.get_mut(id_field) {
        if let Some(external) = external_id_of(value) {
            *value = Value::String(external);
        }
    }
}
