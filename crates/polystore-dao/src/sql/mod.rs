//! Relational adapters.
//!
//! One generic [`SqlDao`] carries the contract; each backend contributes a
//! [`SqlConnector`] that knows how to open its connection, bind JSON values
//! and decode rows.

mod builder;
mod dao;
mod dialect;
mod statement;

pub mod mysql;
pub mod postgres;
pub mod sqlite;

pub use builder::{check_identifier, SqlBuilder};
pub use dao::SqlDao;
pub use dialect::Dialect;
pub use mysql::{MySqlConnector, MySqlDao};
pub use postgres::{PostgresConnector, PostgresDao};
pub use sqlite::{SqliteConnector, SqliteDao};
pub use statement::SqlStatement;

use crate::connection::Connector;
use async_trait::async_trait;
use polystore_core::{Row, StoreResult};
use serde_json::Value;

/// Executes built statements on one kind of SQL connection.
#[async_trait]
pub trait SqlConnector: Connector {
    /// The dialect statements are built in.
    const DIALECT: Dialect;

    /// Runs a query and decodes every returned row.
    async fn fetch_rows(&self, conn: &mut Self::Connection, stmt: &SqlStatement) -> StoreResult<Vec<Row>>;

    /// Runs a query returning a single integer, such as `COUNT(*)`.
    async fn fetch_count(&self, conn: &mut Self::Connection, stmt: &SqlStatement) -> StoreResult<u64>;

    /// Runs a statement and returns the number of affected rows.
    async fn execute(&self, conn: &mut Self::Connection, stmt: &SqlStatement) -> StoreResult<u64>;

    /// Runs an insert and returns the generated id, if the backend made one.
    async fn insert(&self, conn: &mut Self::Connection, stmt: &SqlStatement) -> StoreResult<Option<String>>;

    /// Runs unparameterized SQL, possibly several statements.
    async fn execute_raw(&self, conn: &mut Self::Connection, sql: &str) -> StoreResult<()>;
}

/// Binary column content, shown as text.
pub(crate) fn bytes_value(bytes: &[u8]) -> Value {
    Value::String(String::from_utf8_lossy(bytes).into_owned())
}

/// Text holding a JSON object or array comes back structured, since nested
/// values are stored as JSON text. Anything else stays a string.
pub(crate) fn json_text_value(text: String) -> Value {
    let trimmed = text.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(value) = serde_json::from_str(trimmed) {
            return value;
        }
    }
    Value::String(text)
}

/// A finite float as JSON, `null` otherwise.
pub(crate) fn float_value(value: f64) -> Value {
    serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number)
}
