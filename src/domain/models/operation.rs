//! Repository operation kinds.
//!
//! Every piece of work that touches a repository exclusively is tagged with
//! one of these. The tag is written into the lock record and keys the lock
//! metrics.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of operation contending for exclusive repository access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryOperation {
    Backup,
    Restore,
    Prune,
    Check,
    Init,
    Maintenance,
}

impl RepositoryOperation {
    /// All operations in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Backup,
        Self::Restore,
        Self::Prune,
        Self::Check,
        Self::Init,
        Self::Maintenance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::Restore => "restore",
            Self::Prune => "prune",
            Self::Check => "check",
            Self::Init => "init",
            Self::Maintenance => "maintenance",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "backup" => Some(Self::Backup),
            "restore" => Some(Self::Restore),
            "prune" => Some(Self::Prune),
            "check" => Some(Self::Check),
            "init" => Some(Self::Init),
            "maintenance" => Some(Self::Maintenance),
            _ => None,
        }
    }
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_string_roundtrip() {
        for op in RepositoryOperation::ALL {
            assert_eq!(RepositoryOperation::from_str(op.as_str()), Some(op));
        }
        assert_eq!(RepositoryOperation::from_str("PRUNE"), Some(RepositoryOperation::Prune));
        assert_eq!(RepositoryOperation::from_str("compact"), None);
    }

    #[test]
    fn test_operation_serializes_as_stable_string() {
        let json = serde_json::to_string(&RepositoryOperation::Maintenance).unwrap();
        assert_eq!(json, "\"maintenance\"");
    }
}
