//! Cache-specific error types.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Cache store unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed cache entry {key}: {reason}")]
    Malformed { key: String, reason: String },

    #[error("TTL must be at least one millisecond, got {0} ms")]
    InvalidTtl(i64),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn unavailable(message: impl std::fmt::Display) -> Self {
        Self::Unavailable(message.to_string())
    }

    pub fn malformed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Whether the backing storage itself failed, as opposed to one entry.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
