//! CLI command implementations.

pub mod history;
pub mod lock;
pub mod plan;
pub mod run;
pub mod schedule;
pub mod trigger;
