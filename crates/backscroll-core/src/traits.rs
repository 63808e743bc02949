//! Storage trait for the ordered message log.

use async_trait::async_trait;

use crate::{Anchor, AppendError, KeyStrategy, LogEntry, Message, StoreError};

/// Durable, ordered log of messages keyed by [`crate::LogKey`].
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Key strategy this store was opened with.
    fn key_strategy(&self) -> KeyStrategy;

    /// Write each message under its key, overwriting any entry with the
    /// same key.
    ///
    /// Returns the written entries in batch order.
    ///
    /// # Errors
    /// On failure, [`AppendError::committed`] holds the persisted prefix of
    /// the batch.
    async fn append(&self, batch: Vec<Message>) -> Result<Vec<LogEntry>, AppendError>;

    /// Up to `limit` entries strictly older than `anchor` (inclusive of the
    /// newest entry for [`Anchor::Now`]), newest first.
    ///
    /// # Errors
    /// Engine failures and undecodable entries abort the scan.
    async fn query(&self, anchor: Anchor, limit: usize) -> Result<Vec<LogEntry>, StoreError>;

    /// Number of stored entries.
    async fn len(&self) -> Result<usize, StoreError>;

    /// Whether the store holds no entries.
    async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len().await? == 0)
    }
}
