//! MySQL connector.

use super::{bytes_value, float_value, Dialect, SqlConnector, SqlDao, SqlStatement};
use crate::connection::Connector;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use polystore_config::{SqlServerConfig, DEFAULT_MYSQL_PORT};
use polystore_core::{Row, SchemaCodec, StoreError, StoreResult};
use serde_json::Value;
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, ConnectOptions, Connection, Executor, MySql, MySqlConnection, Row as _, TypeInfo};
use std::time::Duration;

/// MySQL table adapter.
pub type MySqlDao = SqlDao<MySqlConnector>;

impl MySqlDao {
    /// Creates an adapter for `table` from a server configuration.
    pub fn new(config: &SqlServerConfig, table: impl Into<String>, codec: SchemaCodec) -> StoreResult<Self> {
        Self::with_connector(MySqlConnector::new(config), table, codec, config.auto_commit)
    }
}

/// Opens MySQL connections.
#[derive(Clone)]
pub struct MySqlConnector {
    options: MySqlConnectOptions,
    target: String,
    timeout: Duration,
}

impl MySqlConnector {
    #[must_use]
    pub fn new(config: &SqlServerConfig) -> Self {
        let port = config.port_or(DEFAULT_MYSQL_PORT);
        let mut options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database);
        if !config.log_queries {
            options = options.disable_statement_logging();
        }

        Self {
            options,
            target: format!("mysql://{}@{}:{}/{}", config.user, config.host, port, config.database),
            timeout: config.connect_timeout(),
        }
    }
}

fn bind_all(stmt: &SqlStatement) -> Query<'_, MySql, MySqlArguments> {
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

fn decode_row(row: &MySqlRow) -> StoreResult<Row> {
    let mut out = Row::new();
    for column in row.columns() {
        let i = column.ordinal();
        let type_name = column.type_info().name();
        let value = decode_column(row, i, type_name).map_err(|e| {
            StoreError::Serialization(format!("column '{}' ({}): {}", column.name(), type_name, e))
        })?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn decode_column(row: &MySqlRow, i: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    let value = match type_name {
        "NULL" => Value::Null,
        "BOOLEAN" => row.try_get::<Option<bool>, _>(i)?.map_or(Value::Null, Value::Bool),
        name if is_integer(name) && name.ends_with("UNSIGNED") => {
            row.try_get_unchecked::<Option<u64>, _>(i)?.map_or(Value::Null, Value::from)
        }
        name if is_integer(name) => row.try_get_unchecked::<Option<i64>, _>(i)?.map_or(Value::Null, Value::from),
        "FLOAT" => row
            .try_get::<Option<f32>, _>(i)?
            .map_or(Value::Null, |f| float_value(f64::from(f))),
        "DOUBLE" => row.try_get::<Option<f64>, _>(i)?.map_or(Value::Null, float_value),
        "JSON" => row.try_get::<Option<Value>, _>(i)?.unwrap_or(Value::Null),
        "DATETIME" => row
            .try_get::<Option<NaiveDateTime>, _>(i)?
            .map_or(Value::Null, |d| Value::String(d.to_string())),
        "TIMESTAMP" => row
            .try_get::<Option<DateTime<Utc>>, _>(i)?
            .map_or(Value::Null, |d| Value::String(d.to_rfc3339())),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(i)?
            .map_or(Value::Null, |d| Value::String(d.to_string())),
        "TIME" => row
            .try_get::<Option<NaiveTime>, _>(i)?
            .map_or(Value::Null, |t| Value::String(t.to_string())),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => row
            .try_get_unchecked::<Option<Vec<u8>>, _>(i)?
            .map_or(Value::Null, |b| bytes_value(&b)),
        // CHAR, VARCHAR, TEXT, ENUM, SET, DECIMAL all arrive as text.
        _ => row
            .try_get_unchecked::<Option<String>, _>(i)?
            .map_or(Value::Null, Value::String),
    };
    Ok(value)
}

fn is_integer(type_name: &str) -> bool {
    ["TINYINT", "SMALLINT", "MEDIUMINT", "INT", "BIGINT", "YEAR"]
        .iter()
        .any(|prefix| type_name.split(' ').next() == Some(prefix))
}

#[async_trait]
impl Connector for MySqlConnector {
    type Connection = MySqlConnection;

    fn describe(&self) -> String {
        self.target.clone()
    }

    fn connect_timeout(&self) -> Duration {
        self.timeout
    }

    async fn connect(&self) -> StoreResult<MySqlConnection> {
        Ok(self.options.connect().await?)
    }

    async fn ping(&self, conn: &mut MySqlConnection) -> bool {
        conn.ping().await.is_ok()
    }

    async fn close(&self, conn: MySqlConnection) -> StoreResult<()> {
        Ok(conn.close().await?)
    }

    async fn begin(&self, conn: &mut MySqlConnection) -> StoreResult<()> {
        self.execute_raw(conn, Dialect::MySql.begin_statement()).await
    }

    async fn commit(&self, conn: &mut MySqlConnection) -> StoreResult<()> {
        self.execute_raw(conn, "COMMIT").await
    }

    async fn rollback(&self, conn: &mut MySqlConnection) -> StoreResult<()> {
        self.execute_raw(conn, "ROLLBACK").await
    }
}

#[async_trait]
impl SqlConnector for MySqlConnector {
    const DIALECT: Dialect = Dialect::MySql;

    async fn fetch_rows(&self, conn: &mut MySqlConnection, stmt: &SqlStatement) -> StoreResult<Vec<Row>> {
        let rows = bind_all(stmt).fetch_all(&mut *conn).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn fetch_count(&self, conn: &mut MySqlConnection, stmt: &SqlStatement) -> StoreResult<u64> {
        let row = bind_all(stmt).fetch_one(&mut *conn).await?;
        let total: i64 = row.try_get(0)?;
        Ok(u64::try_from(total).unwrap_or(0))
    }

    async fn execute(&self, conn: &mut MySqlConnection, stmt: &SqlStatement) -> StoreResult<u64> {
        Ok(bind_all(stmt).execute(&mut *conn).await?.rows_affected())
    }

    async fn insert(&self, conn: &mut MySqlConnection, stmt: &SqlStatement) -> StoreResult<Option<String>> {
        let result = bind_all(stmt).execute(&mut *conn).await?;
        Ok(match result.last_insert_id() {
            0 => None,
            id => Some(id.to_string()),
        })
    }

    async fn execute_raw(&self, conn: &mut MySqlConnection, sql: &str) -> StoreResult<()> {
        conn.execute(sqlx::raw_sql(sql)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_type_names() {
        assert!(is_integer("INT"));
        assert!(is_integer("BIGINT UNSIGNED"));
        assert!(!is_integer("INTERVAL"));
        assert!(!is_integer("VARCHAR"));
    }

    #[test]
    fn test_connector_describe_hides_password() {
        let config = SqlServerConfig {
            password: "secret".to_string(),
            ..SqlServerConfig::default()
        };
        let connector = MySqlConnector::new(&config);
        assert_eq!(connector.describe(), "mysql://root@localhost:3306/app");
        assert_eq!(connector.connect_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_new_rejects_bad_table_name() {
        let err = MySqlDao::new(&SqlServerConfig::default(), "users;", SchemaCodec::identity()).unwrap_err();
        assert!(matches!(err, StoreError::Validation { .. }));
    }

    #[test]
    fn test_new_uses_default_id_field() {
        use polystore_core::Dao;
        let dao = MySqlDao::new(&SqlServerConfig::default(), "users", SchemaCodec::identity()).unwrap();
        assert_eq!(dao.id_field(), "id");
        assert_eq!(dao.table(), "users");
        assert!(dao.auto_commit());
    }
}
