//! # Polystore DAO
//!
//! Data-access adapters behind the [`Dao`](polystore_core::Dao) contract:
//!
//! ```text
//! caller
//!   ↓  &dyn Dao / scoped(&dao, ..)
//! MongoDao        pooled mongodb::Client
//! MySqlDao     ┐
//! PostgresDao  ├  SqlDao<K: SqlConnector> over one sqlx connection
//! SqliteDao    ┘
//! RedisDao        one multiplexed redis connection
//! ```
//!
//! Single-connection adapters share [`ConnectionManager`], which connects
//! lazily, tracks transactions and reconnects once after a lost connection.

pub mod connection;
pub mod mongo;
pub mod redis;
pub mod sql;

pub use connection::{ConnectionManager, ConnectionState, Connector, Session};
pub use mongo::MongoDao;
pub use self::redis::{RedisConnector, RedisDao};
pub use sql::{
    Dialect, MySqlConnector, MySqlDao, PostgresConnector, PostgresDao, SqlBuilder, SqlConnector, SqlDao,
    SqlStatement, SqliteConnector, SqliteDao,
};
