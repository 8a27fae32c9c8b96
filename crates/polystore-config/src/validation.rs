//! Configuration validation module.
//!
//! Collects every problem in one pass so a bad file is reported in full
//! before any connection is attempted.

use crate::{MongoConfig, RedisConfig, SqlServerConfig, SqliteConfig, StoreConfig};
use std::fmt;
use url::Url;

/// Configuration validation error variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    /// A required value is empty.
    EmptyValue { name: String },
    /// Port number is invalid (must be 1-65535).
    InvalidPort { name: String, value: u16 },
    /// Pool size configuration is invalid (min must be <= max).
    InvalidPoolSize { min: u32, max: u32 },
    /// Pool size exceeds maximum allowed.
    PoolSizeTooLarge { value: u32, maximum: u32 },
    /// URL format is invalid.
    InvalidUrl { url_type: String, message: String },
    /// Timeout value must be positive.
    NonPositiveTimeout { name: String, value: u64 },
    /// Key namespace contains characters that break key patterns.
    InvalidNamespace { value: String },
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyValue { name } => write!(f, "'{}' must not be empty", name),
            Self::InvalidPort { name, value } => {
                write!(f, "Invalid port for {}: {} (must be 1-65535)", name, value)
            }
            Self::InvalidPoolSize { min, max } => {
                write!(
                    f,
                    "Invalid pool size: min ({}) cannot be greater than max ({})",
                    min, max
                )
            }
            Self::PoolSizeTooLarge { value, maximum } => {
                write!(f, "Pool size {} exceeds maximum allowed ({})", value, maximum)
            }
            Self::InvalidUrl { url_type, message } => {
                write!(f, "Invalid {} URL: {}", url_type, message)
            }
            Self::NonPositiveTimeout { name, value } => {
                write!(f, "Timeout '{}' must be positive, got {}", name, value)
            }
            Self::InvalidNamespace { value } => {
                write!(f, "Invalid redis namespace '{}'", value)
            }
        }
    }
}

impl std::error::Error for ConfigValidationError {}

/// Result of configuration validation containing all errors found.
#[derive(Debug)]
pub struct ValidationResult {
    errors: Vec<ConfigValidationError>,
}

impl ValidationResult {
    fn new() -> Self {
        Self { errors: Vec::new() }
    }

    fn add_error(&mut self, error: ConfigValidationError) {
        self.errors.push(error);
    }

    fn require(&mut self, name: &str, value: &str) {
        if value.trim().is_empty() {
            self.add_error(ConfigValidationError::EmptyValue { name: name.to_string() });
        }
    }

    fn positive(&mut self, name: &str, value: u64) {
        if value == 0 {
            self.add_error(ConfigValidationError::NonPositiveTimeout {
                name: name.to_string(),
                value,
            });
        }
    }

    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the validation errors.
    pub fn errors(&self) -> &[ConfigValidationError] {
        &self.errors
    }

    /// Converts to Result, returning Err with all errors if any exist.
    pub fn into_result(self) -> Result<(), Vec<ConfigValidationError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Maximum connection pool size.
    const MAX_POOL_SIZE: u32 = 1000;

    /// Validates the entire store configuration.
    ///
    /// Returns Ok(()) if valid, or Err with all validation errors found.
    pub fn validate(config: &StoreConfig) -> Result<(), Vec<ConfigValidationError>> {
        let mut result = ValidationResult::new();

        result.require("logging.level", &config.logging.level);
        Self::validate_mongo(&config.mongo, &mut result);
        Self::validate_sql_server("mysql", &config.mysql, &mut result);
        Self::validate_sql_server("postgres", &config.postgres, &mut result);
        Self::validate_sqlite(&config.sqlite, &mut result);
        Self::validate_redis(&config.redis, &mut result);

        result.into_result()
    }

    fn validate_mongo(config: &MongoConfig, result: &mut ValidationResult) {
        if config.url.is_empty() {
            result.add_error(ConfigValidationError::InvalidUrl {
                url_type: "mongo".to_string(),
                message: "URL cannot be empty".to_string(),
            });
        } else {
            match Url::parse(&config.url) {
                Ok(url) if matches!(url.scheme(), "mongodb" | "mongodb+srv") => {}
                Ok(url) => result.add_error(ConfigValidationError::InvalidUrl {
                    url_type: "mongo".to_string(),
                    message: format!("unsupported scheme '{}', expected mongodb:// or mongodb+srv://", url.scheme()),
                }),
                Err(e) => result.add_error(ConfigValidationError::InvalidUrl {
                    url_type: "mongo".to_string(),
                    message: format!("Invalid URL format: {}", e),
                }),
            }
        }

        result.require("mongo.database", &config.database);

        if config.min_pool_size > config.max_pool_size {
            result.add_error(ConfigValidationError::InvalidPoolSize {
                min: config.min_pool_size,
                max: config.max_pool_size,
            });
        }
        if config.max_pool_size > Self::MAX_POOL_SIZE {
            result.add_error(ConfigValidationError::PoolSizeTooLarge {
                value: config.max_pool_size,
                maximum: Self::MAX_POOL_SIZE,
            });
        }

        result.positive("mongo.connect_timeout_secs", config.connect_timeout_secs);
    }

    fn validate_sql_server(section: &str, config: &SqlServerConfig, result: &mut ValidationResult) {
        result.require(&format!("{section}.host"), &config.host);
        result.require(&format!("{section}.database"), &config.database);

        if config.port == Some(0) {
            result.add_error(ConfigValidationError::InvalidPort {
                name: format!("{section}.port"),
                value: 0,
            });
        }

        result.positive(&format!("{section}.connect_timeout_secs"), config.connect_timeout_secs);
    }

    fn validate_sqlite(config: &SqliteConfig, result: &mut ValidationResult) {
        result.require("sqlite.db_path", &config.db_path.to_string_lossy());
        result.require("sqlite.file_name", &config.file_name);
    }

    fn validate_redis(config: &RedisConfig, result: &mut ValidationResult) {
        result.require("redis.host", &config.host);

        if config.port == 0 {
            result.add_error(ConfigValidationError::InvalidPort {
                name: "redis.port".to_string(),
                value: 0,
            });
        }

        if polystore_core::rules::valid_namespace(&config.namespace).is_err() {
            result.add_error(ConfigValidationError::InvalidNamespace {
                value: config.namespace.clone(),
            });
        }

        result.positive("redis.connect_timeout_secs", config.connect_timeout_secs);
        result.positive("redis.scan_count", config.scan_count as u64);
    }
}

/// Formats validation errors for display.
pub fn format_validation_errors(errors: &[ConfigValidationError]) -> String {
    let mut output = String::from("Configuration validation failed:\n");
    for (i, error) in errors.iter().enumerate() {
        output.push_str(&format!("  {}. {}\n", i + 1, error));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_passes() {
        assert!(ConfigValidator::validate(&StoreConfig::default()).is_ok());
    }

    #[test]
    fn test_invalid_mongo_scheme() {
        let mut config = StoreConfig::default();
        config.mongo.url = "http://localhost:27017".to_string();

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(
            e,
            ConfigValidationError::InvalidUrl { url_type, .. } if url_type == "mongo"
        )));
    }

    #[test]
    fn test_srv_scheme_accepted() {
        let mut config = StoreConfig::default();
        config.mongo.url = "mongodb+srv://cluster0.example.net".to_string();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_pool_size() {
        let mut config = StoreConfig::default();
        config.mongo.min_pool_size = 20;
        config.mongo.max_pool_size = 10;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(
            e,
            ConfigValidationError::InvalidPoolSize { min: 20, max: 10 }
        )));
    }

    #[test]
    fn test_empty_host() {
        let mut config = StoreConfig::default();
        config.postgres.host = "  ".to_string();

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(
            e,
            ConfigValidationError::EmptyValue { name } if name == "postgres.host"
        )));
    }

    #[test]
    fn test_zero_timeout() {
        let mut config = StoreConfig::default();
        config.mysql.connect_timeout_secs = 0;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(
            e,
            ConfigValidationError::NonPositiveTimeout { name, .. } if name == "mysql.connect_timeout_secs"
        )));
    }

    #[test]
    fn test_invalid_namespace() {
        let mut config = StoreConfig::default();
        config.redis.namespace = "user*".to_string();

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ConfigValidationError::InvalidNamespace { .. })));
    }

    #[test]
    fn test_multiple_errors() {
        let mut config = StoreConfig::default();
        config.mongo.url = String::new();
        config.redis.port = 0;
        config.sqlite.file_name = String::new();

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_format_validation_errors() {
        let errors = vec![
            ConfigValidationError::EmptyValue { name: "mongo.database".to_string() },
            ConfigValidationError::InvalidPort { name: "redis.port".to_string(), value: 0 },
        ];

        let output = format_validation_errors(&errors);
        assert!(output.contains("'mongo.database' must not be empty"));
        assert!(output.contains("Invalid port"));
    }
}
