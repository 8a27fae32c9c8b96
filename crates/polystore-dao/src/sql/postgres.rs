//! PostgreSQL connector, paginating with `OFFSET … ROWS FETCH NEXT … ROWS ONLY`.

use super::{bytes_value, float_value, Dialect, SqlConnector, SqlDao, SqlStatement};
use crate::connection::Connector;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use polystore_config::{SqlServerConfig, DEFAULT_POSTGRES_PORT};
use polystore_core::{external_id_of, Row, SchemaCodec, StoreError, StoreResult};
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgRow};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{Column, ConnectOptions, Connection, Executor, PgConnection, Postgres, Row as _, TypeInfo};
use std::time::Duration;
use uuid::Uuid;

/// PostgreSQL table adapter.
pub type PostgresDao = SqlDao<PostgresConnector>;

impl PostgresDao {
    /// Creates an adapter for `table` from a server configuration.
    pub fn new(config: &SqlServerConfig, table: impl Into<String>, codec: SchemaCodec) -> StoreResult<Self> {
        Self::with_connector(PostgresConnector::new(config), table, codec, config.auto_commit)
    }
}

/// Opens PostgreSQL connections.
#[derive(Clone)]
pub struct PostgresConnector {
    options: PgConnectOptions,
    target: String,
    timeout: Duration,
}

impl PostgresConnector {
    #[must_use]
    pub fn new(config: &SqlServerConfig) -> Self {
        let port = config.port_or(DEFAULT_POSTGRES_PORT);
        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database)
            .application_name("polystore");
        if !config.log_queries {
            options = options.disable_statement_logging();
        }

        Self {
            options,
            target: format!("postgres://{}@{}:{}/{}", config.user, config.host, port, config.database),
            timeout: config.connect_timeout(),
        }
    }
}

fn bind_all(stmt: &SqlStatement) -> Query<'_, Postgres, PgArguments> {
    stmt.params.iter().fold(sqlx::query(&stmt.sql), |query, value| match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.as_str()),
        nested => query.bind(Json(nested)),
    })
}

fn decode_row(row: &PgRow) -> StoreResult<Row> {
    let mut out = Row::new();
    for column in row.columns() {
        let value = decode_column(row, column.ordinal(), column.type_info().name())
            .map_err(|e| StoreError::Serialization(format!("column '{}': {}", column.name(), e)))?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn decode_column(row: &PgRow, i: usize, type_name: &str) -> Result<Value, String> {
    fn text<T: ToString>(value: Option<T>) -> Value {
        value.map_or(Value::Null, |v| Value::String(v.to_string()))
    }

    let err = |e: sqlx::Error| e.to_string();
    let value = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(i).map_err(err)?.map_or(Value::Null, Value::Bool),
        "INT2" => row.try_get::<Option<i16>, _>(i).map_err(err)?.map_or(Value::Null, Value::from),
        "INT4" => row.try_get::<Option<i32>, _>(i).map_err(err)?.map_or(Value::Null, Value::from),
        "INT8" => row.try_get::<Option<i64>, _>(i).map_err(err)?.map_or(Value::Null, Value::from),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(i)
            .map_err(err)?
            .map_or(Value::Null, |f| float_value(f64::from(f))),
        "FLOAT8" => row.try_get::<Option<f64>, _>(i).map_err(err)?.map_or(Value::Null, float_value),
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" | "CITEXT" => {
            row.try_get::<Option<String>, _>(i).map_err(err)?.map_or(Value::Null, Value::String)
        }
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(i).map_err(err)?.unwrap_or(Value::Null),
        "UUID" => text(row.try_get::<Option<Uuid>, _>(i).map_err(err)?),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(i)
            .map_err(err)?
            .map_or(Value::Null, |d| Value::String(d.to_rfc3339())),
        "TIMESTAMP" => text(row.try_get::<Option<NaiveDateTime>, _>(i).map_err(err)?),
        "DATE" => text(row.try_get::<Option<NaiveDate>, _>(i).map_err(err)?),
        "TIME" => text(row.try_get::<Option<NaiveTime>, _>(i).map_err(err)?),
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(i)
            .map_err(err)?
            .map_or(Value::Null, |b| bytes_value(&b)),
        other => return Err(format!("unsupported column type {other}")),
    };
    Ok(value)
}

#[async_trait]
impl Connector for PostgresConnector {
    type Connection = PgConnection;

    fn describe(&self) -> String {
        self.target.clone()
    }

    fn connect_timeout(&self) -> Duration {
        self.timeout
    }

    async fn connect(&self) -> StoreResult<PgConnection> {
        Ok(self.options.connect().await?)
    }

    async fn ping(&self, conn: &mut PgConnection) -> bool {
        conn.ping().await.is_ok()
    }

    async fn close(&self, conn: PgConnection) -> StoreResult<()> {
        Ok(conn.close().await?)
    }

    async fn begin(&self, conn: &mut PgConnection) -> StoreResult<()> {
        self.execute_raw(conn, Dialect::Postgres.begin_statement()).await
    }

    async fn commit(&self, conn: &mut PgConnection) -> StoreResult<()> {
        self.execute_raw(conn, "COMMIT").await
    }

    async fn rollback(&self, conn: &mut PgConnection) -> StoreResult<()> {
        self.execute_raw(conn, "ROLLBACK").await
    }
}

#[async_trait]
impl SqlConnector for PostgresConnector {
    const DIALECT: Dialect = Dialect::Postgres;

    async fn fetch_rows(&self, conn: &mut PgConnection, stmt: &SqlStatement) -> StoreResult<Vec<Row>> {
        let rows = bind_all(stmt).fetch_all(&mut *conn).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn fetch_count(&self, conn: &mut PgConnection, stmt: &SqlStatement) -> StoreResult<u64> {
        let row = bind_all(stmt).fetch_one(&mut *conn).await?;
        let total: i64 = row.try_get(0)?;
        Ok(u64::try_from(total).unwrap_or(0))
    }

    async fn execute(&self, conn: &mut PgConnection, stmt: &SqlStatement) -> StoreResult<u64> {
        Ok(bind_all(stmt).execute(&mut *conn).await?.rows_affected())
    }

    /// Inserts use `RETURNING`, so the generated key comes back as a row.
    async fn insert(&self, conn: &mut PgConnection, stmt: &SqlStatement) -> StoreResult<Option<String>> {
        let row = bind_all(stmt).fetch_optional(&mut *conn).await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let Some(column) = row.columns().first() else {
            return Ok(None);
        };
        let id = decode_column(&row, 0, column.type_info().name()).map_err(StoreError::Serialization)?;
        Ok(external_id_of(&id))
    }

    async fn execute_raw(&self, conn: &mut PgConnection, sql: &str) -> StoreResult<()> {
        conn.execute(sqlx::raw_sql(sql)).await?;
        Ok(())
    }
}
