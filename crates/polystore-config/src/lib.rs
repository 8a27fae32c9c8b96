//! # Polystore Config
//!
//! Connection settings for every Polystore backend.
//! Supports layered configuration from files, environment variables,
//! and runtime refresh.

mod loader;
mod store_config;
mod validation;

pub use loader::*;
pub use store_config::*;
pub use validation::*;
