//! # Polystore Core
//!
//! Backend-independent building blocks of the Polystore data-access layer:
//! the error taxonomy, identifier normalization, pagination, filters,
//! schema codecs and the [`Dao`] contract every adapter implements.

pub mod codec;
pub mod error;
pub mod filter;
pub mod id;
pub mod pagination;
pub mod result;
pub mod row;
#[cfg(feature = "telemetry")]
pub mod telemetry;
pub mod traits;
pub mod validation;

pub use codec::*;
pub use error::*;
pub use filter::*;
pub use id::*;
pub use pagination::*;
pub use result::*;
pub use row::*;
pub use traits::*;
pub use validation::*;

// Re-export shaku for dependency injection
pub use shaku::Interface;
