// ledger/src/error.rs
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound(String),
    /// The stored version of a record no longer matches the version it was read at.
    VersionConflict {
        entity: &'static str,
        id: Uuid,
        expected: u64,
        found: u64,
    },
    Duplicate(String),
    Serialize(String),
    Storage(String),
    Unavailable(String),
    Timeout,
}

impl StoreError {
    /// Transient failures are worth retrying as-is.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout)
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(what) => write!(f, "Not found: {}", what),
            Self::VersionConflict {
                entity,
                id,
                expected,
                found,
            } => write!(
                f,
                "Version conflict on {} {}: expected {}, found {}",
                entity, id, expected, found
            ),
            Self::Duplicate(what) => write!(f, "Duplicate: {}", what),
            Self::Serialize(msg) => write!(f, "Serialization error: {}", msg),
            Self::Storage(msg) => write!(f, "Storage error: {}", msg),
            Self::Unavailable(msg) => write!(f, "Store unavailable: {}", msg),
            Self::Timeout => write!(f, "Store operation timed out"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialize(err.to_string())
    }
}
