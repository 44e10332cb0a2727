//! Runtime Core - Foundation for checkpoint storage management
//!
//! Provides the identifier and record types, error handling, and
//! configuration shared by the storage backends, the checkpoint storage
//! manager and the garbage collector.

pub mod config;
pub mod error;
pub mod types;

pub use config::{GcConfig, RetryConfig, StorageConfig};
pub use error::{Error, Result};
pub use types::*;
