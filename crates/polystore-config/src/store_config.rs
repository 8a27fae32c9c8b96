//! Store configuration structures.

use polystore_core::telemetry::LoggingConfig;
use polystore_core::StoreError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default MySQL port.
pub const DEFAULT_MYSQL_PORT: u16 = 3306;
/// Default PostgreSQL port.
pub const DEFAULT_POSTGRES_PORT: u16 = 5432;
/// Default Redis port.
pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// Root configuration: one section per backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Document store configuration.
    #[serde(default)]
    pub mongo: MongoConfig,

    /// MySQL configuration.
    #[serde(default)]
    pub mysql: SqlServerConfig,

    /// PostgreSQL configuration.
    #[serde(default)]
    pub postgres: SqlServerConfig,

    /// Embedded SQLite configuration.
    #[serde(default)]
    pub sqlite: SqliteConfig,

    /// Redis configuration.
    #[serde(default)]
    pub redis: RedisConfig,
}

impl StoreConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, StoreError> {
        toml::from_str(text).map_err(|e| StoreError::Configuration(e.to_string()))
    }
}

/// Document store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MongoConfig {
    /// Connection string (`mongodb://` or `mongodb+srv://`).
    pub url: String,
    /// Database name.
    pub database: String,
    /// Maximum pooled connections.
    pub max_pool_size: u32,
    /// Minimum pooled connections.
    pub min_pool_size: u32,
    /// Idle time before a pooled connection is closed, in seconds.
    pub max_idle_time_secs: u64,
    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            url: "mongodb://localhost:27017".to_string(),
            database: "app".to_string(),
            max_pool_size: 10,
            min_pool_size: 1,
            max_idle_time_secs: 10,
            connect_timeout_secs: 10,
        }
    }
}

impl MongoConfig {
    /// Returns the connect timeout as a Duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Returns the idle time as a Duration.
    #[must_use]
    pub const fn max_idle_time(&self) -> Duration {
        Duration::from_secs(self.max_idle_time_secs)
    }
}

/// Client/server SQL database configuration (MySQL, PostgreSQL).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlServerConfig {
    /// Database host.
    pub host: String,
    /// Database port. Falls back to the backend's default port.
    pub port: Option<u16>,
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
    /// Database (or service) name.
    pub database: String,
    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Commit after every write instead of waiting for `commit()`.
    pub auto_commit: bool,
    /// Enable driver statement logging.
    pub log_queries: bool,
}

impl Default for SqlServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: None,
            user: "root".to_string(),
            password: String::new(),
            database: "app".to_string(),
            connect_timeout_secs: 300,
            auto_commit: true,
            log_queries: false,
        }
    }
}

impl SqlServerConfig {
    /// Returns the configured port or `default`.
    #[must_use]
    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }

    /// Returns the connect timeout as a Duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Embedded SQLite configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Directory holding the database file.
    pub db_path: PathBuf,
    /// Database file name inside `db_path`.
    pub file_name: String,
    /// Time to wait on a locked database, in seconds.
    pub busy_timeout_secs: u64,
    /// Commit after every write instead of waiting for `commit()`.
    pub auto_commit: bool,
    /// Create the file if it does not exist.
    pub create_if_missing: bool,
    /// Enable driver statement logging.
    pub log_queries: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data"),
            file_name: "app.sqlite".to_string(),
            busy_timeout_secs: 300,
            auto_commit: true,
            create_if_missing: true,
            log_queries: false,
        }
    }
}

impl SqliteConfig {
    /// Creates a configuration for a database in `db_path`.
    #[must_use]
    pub fn in_dir(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    /// Full path of the database file.
    #[must_use]
    pub fn file_path(&self) -> PathBuf {
        self.db_path.join(&self.file_name)
    }

    /// Returns the busy timeout as a Duration.
    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }
}

/// Redis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis host.
    pub host: String,
    /// Redis port.
    pub port: u16,
    /// Optional password.
    pub password: Option<String>,
    /// Logical database index.
    pub db: i64,
    /// Prefix prepended to every key as `{namespace}:{id}`. Empty for none.
    pub namespace: String,
    /// Use TLS (`rediss://`).
    pub tls: bool,
    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Keys fetched per `SCAN` round trip.
    pub scan_count: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_REDIS_PORT,
            password: None,
            db: 0,
            namespace: String::new(),
            tls: false,
            connect_timeout_secs: 10,
            scan_count: 100,
        }
    }
}

impl RedisConfig {
    /// Returns the connect timeout as a Duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.mongo.database, "app");
        assert_eq!(config.mongo.max_pool_size, 10);
        assert_eq!(config.mysql.port_or(DEFAULT_MYSQL_PORT), 3306);
        assert_eq!(config.postgres.port_or(DEFAULT_POSTGRES_PORT), 5432);
        assert!(config.sqlite.auto_commit);
        assert_eq!(config.redis.port, 6379);
    }

    #[test]
    fn test_sqlite_file_path() {
        let config = SqliteConfig::in_dir("/tmp/store");
        assert_eq!(config.file_path(), PathBuf::from("/tmp/store/app.sqlite"));
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config = StoreConfig::from_toml(
            r#"
            [postgres]
            host = "db.internal"
            port = 15432

            [redis]
            namespace = "sessions"
            "#,
        )
        .unwrap();

        assert_eq!(config.postgres.host, "db.internal");
        assert_eq!(config.postgres.port_or(DEFAULT_POSTGRES_PORT), 15432);
        assert!(config.postgres.auto_commit);
        assert_eq!(config.redis.namespace, "sessions");
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.mysql.host, "localhost");
    }

    #[test]
    fn test_invalid_toml_is_configuration_error() {
        let err = StoreConfig::from_toml("[mongo\nurl = 1").unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }
}
