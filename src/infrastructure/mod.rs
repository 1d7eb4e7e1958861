//! Infrastructure layer module
//!
//! Host-facing implementations of the domain ports:
//! - Configuration management (figment)
//! - Logging infrastructure (tracing)
//! - Process identity (nix)
//! - `restic` command executor (tokio::process)

pub mod config;
pub mod executor;
pub mod logging;
pub mod process;

pub use executor::ResticCommandExecutor;
pub use process::SystemProcessIdentity;
