//! Validation utilities.

use crate::{FieldError, StoreError};
use validator::{Validate, ValidationErrors};

/// Extension trait for validation.
pub trait ValidateExt: Validate {
    /// Validates the struct and returns a `StoreError` on failure.
    fn validate_request(&self) -> Result<(), StoreError> {
        self.validate().map_err(validation_errors_to_store_error)
    }
}

impl<T: Validate> ValidateExt for T {}

/// Converts `validator::ValidationErrors` to `StoreError`.
#[must_use]
pub fn validation_errors_to_store_error(errors: ValidationErrors) -> StoreError {
    let mut field_errors: Vec<FieldError> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, errors)| {
            errors.iter().map(move |error| FieldError {
                field: (*field).to_string(),
                message: error
                    .message
                    .as_ref()
                    .map_or_else(|| error.code.to_string(), |m| m.to_string()),
                code: error.code.to_string(),
            })
        })
        .collect();
    field_errors.sort_by(|a, b| a.field.cmp(&b.field));

    StoreError::invalid_fields(field_errors)
}

/// Common validation functions.
pub mod rules {
    use validator::ValidationError;

    /// Validates that a string is not blank (not empty after trimming).
    pub fn not_blank(value: &str) -> Result<(), ValidationError> {
        if value.trim().is_empty() {
            return Err(ValidationError::new("not_blank"));
        }
        Ok(())
    }

    /// Validates a table or column name that is spliced into SQL text.
    ///
    /// Accepts ASCII letters, digits and underscores, optionally qualified
    /// once with a dot (`schema.table`), never starting with a digit.
    pub fn valid_identifier(name: &str) -> Result<(), ValidationError> {
        if name.is_empty() {
            return Err(ValidationError::new("identifier_empty"));
        }
        if name.len() > 64 * 2 + 1 {
            return Err(ValidationError::new("identifier_too_long"));
        }
        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() > 2 {
            return Err(ValidationError::new("identifier_invalid_characters"));
        }
        for part in parts {
            if part.is_empty() || part.len() > 64 {
                return Err(ValidationError::new("identifier_invalid_characters"));
            }
            if !part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(ValidationError::new("identifier_invalid_characters"));
            }
            if part.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                return Err(ValidationError::new("identifier_must_not_start_with_digit"));
            }
        }
        Ok(())
    }

    /// Validates a key-value namespace.
    pub fn valid_namespace(namespace: &str) -> Result<(), ValidationError> {
        if namespace.len() > 128 {
            return Err(ValidationError::new("namespace_too_long"));
        }
        if namespace.chars().any(|c| c.is_whitespace() || matches!(c, '*' | '?' | '[' | ']')) {
            return Err(ValidationError::new("namespace_invalid_characters"));
        }
        Ok(())
    }
}
