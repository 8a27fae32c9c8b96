//! Embedded SQLite connector.

use super::{bytes_value, float_value, json_text_value, Dialect, SqlConnector, SqlDao, SqlStatement};
use crate::connection::Connector;
use async_trait::async_trait;
use polystore_config::SqliteConfig;
use polystore_core::{external_id_of, Row, SchemaCodec, StoreError, StoreResult};
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqliteRow, SqliteSynchronous,
};
use sqlx::{
    Column, ConnectOptions, Connection, Executor, Row as _, Sqlite, SqliteConnection, TypeInfo, ValueRef,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// SQLite table adapter. The id column defaults to `_id`; generated ids are
/// read back with `RETURNING`, which needs SQLite 3.35 or later.
pub type SqliteDao = SqlDao<SqliteConnector>;

impl SqliteDao {
    /// Creates an adapter for `table` in the database file of `config`.
    pub fn new(config: &SqliteConfig, table: impl Into<String>, codec: SchemaCodec) -> StoreResult<Self> {
        Self::with_connector(SqliteConnector::new(config), table, codec, config.auto_commit)
    }
}

/// Opens the database file, in WAL mode with `synchronous = NORMAL`.
#[derive(Clone)]
pub struct SqliteConnector {
    options: SqliteConnectOptions,
    path: PathBuf,
    create_dir: bool,
    timeout: Duration,
}

impl SqliteConnector {
    #[must_use]
    pub fn new(config: &SqliteConfig) -> Self {
        let path = config.file_path();
        let mut options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(config.create_if_missing)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(config.busy_timeout());
        if !config.log_queries {
            options = options.disable_statement_logging();
        }

        Self {
            options,
            path,
            create_dir: config.create_if_missing,
            timeout: config.busy_timeout(),
        }
    }

    /// Path of the database file.
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

fn bind_all(stmt: &SqlStatement) -> Query<'_, Sqlite, SqliteArguments<'_>> {
    stmt.params.iter().fold(sqlx::query(&stmt.sql), |query, value| match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.as_str()),
        nested => query.bind(nested.to_string()),
    })
}

/// Decodes by the storage class of each value. Integers in columns declared
/// `BOOLEAN` become booleans. Text stays a string unless the column's
/// declared type is one the driver does not map (`JSON`, for one); there
/// object and array text is read back as JSON.
fn decode_row(row: &SqliteRow) -> StoreResult<Row> {
    let mut out = Row::new();
    for column in row.columns() {
        let i = column.ordinal();
        let declared = column.type_info().name().to_ascii_uppercase();
        let value = decode_column(row, i, &declared)
            .map_err(|e| StoreError::Serialization(format!("column '{}': {}", column.name(), e)))?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

/// Type name reported for columns declared with a type the driver does not
/// recognize, and for expressions.
const UNMAPPED_DECLTYPE: &str = "NULL";

fn decode_column(row: &SqliteRow, i: usize, declared: &str) -> Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(i)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage = raw.type_info().name().to_string();

    let value = match (storage.as_str(), declared) {
        ("INTEGER", "BOOLEAN" | "BOOL") => Value::Bool(row.try_get_unchecked::<i64, _>(i)? != 0),
        ("INTEGER", _) => Value::from(row.try_get_unchecked::<i64, _>(i)?),
        ("REAL", _) => float_value(row.try_get_unchecked::<f64, _>(i)?),
        ("BLOB", _) => bytes_value(&row.try_get_unchecked::<Vec<u8>, _>(i)?),
        (_, UNMAPPED_DECLTYPE) => json_text_value(row.try_get_unchecked::<String, _>(i)?),
        _ => Value::String(row.try_get_unchecked::<String, _>(i)?),
    };
    Ok(value)
}

#[async_trait]
impl Connector for SqliteConnector {
    type Connection = SqliteConnection;

    fn describe(&self) -> String {
        format!("sqlite://{}", self.path.display())
    }

    fn connect_timeout(&self) -> Duration {
        self.timeout
    }

    async fn connect(&self) -> StoreResult<SqliteConnection> {
        if self.create_dir {
            if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|e| StoreError::connection(format!("cannot create {}: {}", dir.display(), e)))?;
                debug!(dir = %dir.display(), "Database directory ready");
            }
        }
        Ok(self.options.connect().await?)
    }

    async fn ping(&self, conn: &mut SqliteConnection) -> bool {
        conn.ping().await.is_ok()
    }

    async fn close(&self, conn: SqliteConnection) -> StoreResult<()> {
        Ok(conn.close().await?)
    }

    async fn begin(&self, conn: &mut SqliteConnection) -> StoreResult<()> {
        self.execute_raw(conn, Dialect::Sqlite.begin_statement()).await
    }

    async fn commit(&self, conn: &mut SqliteConnection) -> StoreResult<()> {
        self.execute_raw(conn, "COMMIT").await
    }

    async fn rollback(&self, conn: &mut SqliteConnection) -> StoreResult<()> {
        self.execute_raw(conn, "ROLLBACK").await
    }
}

#[async_trait]
impl SqlConnector for SqliteConnector {
    const DIALECT: Dialect = Dialect::Sqlite;

    async fn fetch_rows(&self, conn: &mut SqliteConnection, stmt: &SqlStatement) -> StoreResult<Vec<Row>> {
        let rows = bind_all(stmt).fetch_all(&mut *conn).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn fetch_count(&self, conn: &mut SqliteConnection, stmt: &SqlStatement) -> StoreResult<u64> {
        let row = bind_all(stmt).fetch_one(&mut *conn).await?;
        let total: i64 = row.try_get(0)?;
        Ok(u64::try_from(total).unwrap_or(0))
    }

    async fn execute(&self, conn: &mut SqliteConnection, stmt: &SqlStatement) -> StoreResult<u64> {
        Ok(bind_all(stmt).execute(&mut *conn).await?.rows_affected())
    }

    /// Inserts use `RETURNING`, so tables keyed by a non-rowid column
    /// report their real key.
    async fn insert(&self, conn: &mut SqliteConnection, stmt: &SqlStatement) -> StoreResult<Option<String>> {
        let row = bind_all(stmt).fetch_optional(&mut *conn).await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let Some(column) = row.columns().first() else {
            return Ok(None);
        };
        let declared = column.type_info().name().to_ascii_uppercase();
        let id = decode_column(&row, 0, &declared)?;
        Ok(external_id_of(&id))
    }

    async fn execute_raw(&self, conn: &mut SqliteConnection, sql: &str) -> StoreResult<()> {
        conn.execute(sqlx::raw_sql(sql)).await?;
        Ok(())
    }
}
