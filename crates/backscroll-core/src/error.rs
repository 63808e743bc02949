//! Error types for the message log.

use thiserror::Error;

use crate::LogEntry;

/// Store error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Engine or I/O failure on read or write.
    #[error("Storage error: {0}")]
    Storage(String),
    /// A stored key or value could not be decoded.
    #[error("Failed to decode entry {key}: {reason}")]
    Decode { key: String, reason: String },
    /// A message could not be serialized for storage.
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    /// The timestamp cannot be used as a key.
    #[error("Invalid timestamp: {0:?}")]
    InvalidTimestamp(String),
}

impl StoreError {
    /// Create a new storage error.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    /// Create a new decode error for the raw key bytes.
    pub fn decode(key: &[u8], reason: impl std::fmt::Display) -> Self {
        Self::Decode {
            key: String::from_utf8_lossy(key).into_owned(),
            reason: reason.to_string(),
        }
    }
}

/// Append failure.
///
/// `committed` holds the prefix of the batch that was persisted before the
/// failure, in batch order. It is empty when the backend applies batches
/// atomically.
#[derive(Debug, Error)]
#[error("Append failed after {} committed message(s): {source}", committed.len())]
pub struct AppendError {
    pub committed: Vec<LogEntry>,
    #[source]
    pub source: StoreError,
}

impl AppendError {
    /// Failure with nothing persisted.
    #[must_use]
    pub const fn nothing_committed(source: StoreError) -> Self {
        Self {
            committed: Vec::new(),
            source,
        }
    }
}

impl From<StoreError> for AppendError {
    fn from(source: StoreError) -> Self {
        Self::nothing_committed(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_carries_key() {
        let err = StoreError::decode(b"2024-05-01T10:00:00Z", "expected value");
        assert!(matches!(err, StoreError::Decode { .. }));
        assert!(err.to_string().contains("2024-05-01T10:00:00Z"));
    }

    #[test]
    fn test_append_error_reports_prefix() {
        let err = AppendError::nothing_committed(StoreError::storage("disk full"));
        assert!(err.committed.is_empty());
        assert!(err.to_string().contains("0 committed"));
        assert!(err.to_string().contains("disk full"));
    }
}
