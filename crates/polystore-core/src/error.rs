//! Unified error taxonomy for every data-access adapter.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;

/// Unified error type for all Polystore adapters.
///
/// Adapters never swallow an error into a default value except the two
/// documented cases: a missing row yields `None` and a no-op write yields
/// `false`.
#[derive(Error, Debug)]
pub enum StoreError {
    // ============ Connection Errors ============
    /// The backend cannot be reached or the connection was lost.
    #[error("Connection error: {0}")]
    Connection(String),

    // ============ Input Errors ============
    /// An id string cannot be converted to the backend's native key type.
    #[error("Malformed identifier '{value}': {reason}")]
    MalformedIdentifier { value: String, reason: String },

    /// An inbound payload failed schema validation.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        fields: Vec<FieldError>,
    },

    // ============ Backend Errors ============
    /// The backend rejected or failed a query/command.
    #[error("{backend} error: {message}")]
    Backend {
        backend: &'static str,
        message: String,
        code: Option<String>,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Value could not be converted between representations.
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ============ Internal Errors ============
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "CONNECTION_ERROR",
            Self::MalformedIdentifier { .. } => "MALFORMED_IDENTIFIER",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Backend { .. } => "BACKEND_OPERATION_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Creates a connection error.
    #[must_use]
    pub fn connection<T: Into<String>>(message: T) -> Self {
        Self::Connection(message.into())
    }

    /// Creates a malformed identifier error.
    #[must_use]
    pub fn malformed_id<V: Into<String>, R: Into<String>>(value: V, reason: R) -> Self {
        Self::MalformedIdentifier {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Creates a validation error without field details.
    #[must_use]
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation {
            message: message.into(),
            fields: Vec::new(),
        }
    }

    /// Creates a validation error from field-level failures.
    #[must_use]
    pub fn invalid_fields(fields: Vec<FieldError>) -> Self {
        let message = fields
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Self::Validation { message, fields }
    }

    /// Creates a backend operation error.
    #[must_use]
    pub fn backend<T: Into<String>>(backend: &'static str, message: T) -> Self {
        Self::Backend {
            backend,
            message: message.into(),
            code: None,
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal(message.into())
    }

    /// Returns the field-level failures of a validation error.
    #[must_use]
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Validation { fields, .. } => fields,
            _ => &[],
        }
    }

    /// Whether this error means the connection is gone.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Checks if a caller-side retry could succeed.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Connection(err.to_string()),
            sqlx::Error::Configuration(_) => Self::Configuration(err.to_string()),
            sqlx::Error::Database(db_err) => Self::Backend {
                backend: "sql",
                message: db_err.message().to_string(),
                code: db_err.code().map(|c| c.to_string()),
            },
            _ => Self::backend("sql", err.to_string()),
        }
    }
}

#[cfg(feature = "mongodb")]
impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;

        match err.kind.as_ref() {
            ErrorKind::Io(_) | ErrorKind::ConnectionPoolCleared { .. } | ErrorKind::ServerSelection { .. } => {
                Self::Connection(err.to_string())
            }
            ErrorKind::InvalidArgument { .. } => Self::validation(err.to_string()),
            ErrorKind::Command(command) => Self::Backend {
                backend: "mongodb",
                message: command.message.clone(),
                code: Some(command.code.to_string()),
            },
            _ => Self::backend("mongodb", err.to_string()),
        }
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
            Self::Connection(err.to_string())
        } else {
            Self::Backend {
                backend: "redis",
                message: err.to_string(),
                code: err.code().map(str::to_string),
            }
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON serialization error: {}", err))
    }
}

impl From<bson::ser::Error> for StoreError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Serialization(format!("BSON serialization error: {}", err))
    }
}

impl From<bson::de::Error> for StoreError {
    fn from(err: bson::de::Error) -> Self {
        Self::Serialization(format!("BSON deserialization error: {}", err))
    }
}

/// Field-level validation error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Field name
    pub field: String,
    /// Error message
    pub message: String,
    /// Error code
    pub code: String,
}

impl FieldError {
    /// Creates a field error.
    #[must_use]
    pub fn new(field: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code: code.into(),
        }
    }
}
