//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines the interfaces the maintenance core consumes:
//! - BackupExecutor: runs the actual repository commands
//! - ConfigStore: durable schedules, task configurations and retry state
//! - Clock / ProcessIdentity: time and lock-holder identity
//! - ResourceProbe: live host resource snapshot
//! - CompletionNotifier: observers of finished runs
//!
//! These traits define the contracts that allow the domain to be independent
//! of specific infrastructure implementations.

pub mod backup_executor;
pub mod clock;
pub mod config_store;
pub mod notifier;
pub mod process_identity;
pub mod resource_probe;

pub use backup_executor::BackupExecutor;
pub use clock::{Clock, SystemClock};
pub use config_store::ConfigStore;
pub use notifier::CompletionNotifier;
pub use process_identity::ProcessIdentity;
pub use resource_probe::{ResourceProbe, ResourceSnapshot};
