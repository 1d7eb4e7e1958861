//! Infrastructure adapters for external systems.

pub mod memory;
pub mod notifier;
pub mod sqlite;

pub use memory::InMemoryConfigStore;
pub use notifier::{BroadcastNotifier, TracingNotifier};
pub use sqlite::SqliteConfigStore;
