//! Domain layer for the Steward maintenance core
//!
//! This module contains core business logic, models and port traits.

pub mod errors;
pub mod models;
pub mod ports;

// Re-export error types for convenient access
pub use errors::{
    ConfigurationError, ExecutorError, LockError, MaintenanceError, StoreError,
};
