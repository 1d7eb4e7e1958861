//! In-memory adapters.

pub mod config_store;

pub use config_store::InMemoryConfigStore;
