//! In-memory log storage.

use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::{
        RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use backscroll_core::{
    Anchor, AppendError, KeyStrategy, LogEntry, LogKey, LogStore, Message, StoreError, codec,
};

/// In-memory storage implementation.
///
/// Holds the same encoded keys and values as the durable backend, so
/// ordering and decoding behave identically. Data is lost on restart.
pub struct MemoryStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    key_strategy: KeyStrategy,
    next_seq: AtomicU64,
}

impl MemoryStore {
    /// Create a new in-memory store keyed by timestamp alone.
    #[must_use]
    pub fn new() -> Self {
        Self::with_key_strategy(KeyStrategy::default())
    }

    /// Create a new in-memory store with the given key strategy.
    #[must_use]
    pub fn with_key_strategy(key_strategy: KeyStrategy) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            key_strategy,
            next_seq: AtomicU64::new(1),
        }
    }

    #[cfg(test)]
    pub(crate) fn insert_raw(&self, key: &[u8], value: &[u8]) {
        self.entries
            .write()
            .unwrap()
            .insert(key.to_vec(), value.to_vec());
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    fn key_strategy(&self) -> KeyStrategy {
        self.key_strategy
    }

    async fn append(&self, batch: Vec<Message>) -> Result<Vec<LogEntry>, AppendError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let mut encoded = Vec::with_capacity(batch.len());
        for message in batch {
            codec::validate(&message)?;
            let value = codec::encode_value(&message)?;
            encoded.push((message, value));
        }

        let mut entries = self
            .entries
            .write()
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        let written = encoded
            .into_iter()
            .map(|(message, value)| {
                let seq = match self.key_strategy {
                    KeyStrategy::TimestampOnly => 0,
                    KeyStrategy::Sequenced => self.next_seq.fetch_add(1, Ordering::Relaxed),
                };
                let key = LogKey::new(message.timestamp.clone(), seq);
                entries.insert(self.key_strategy.encode_key(&key), value);
                LogEntry::new(key, message)
            })
            .collect();

        Ok(written)
    }

    async fn query(&self, anchor: Anchor, limit: usize) -> Result<Vec<LogEntry>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let entries = self
            .entries
            .read()
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        let upper = self.key_strategy.upper_bound(&anchor);
        entries
            .range::<Vec<u8>, _>((Bound::Unbounded, upper))
            .rev()
            .take(limit)
            .map(|(raw_key, raw_value)| -> Result<LogEntry, StoreError> {
                let key = self.key_strategy.decode_key(raw_key)?;
                let message = codec::decode_value(raw_key, raw_value)?;
                Ok(LogEntry::new(key, message))
            })
            .collect()
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self
            .entries
            .read()
            .map_err(|e| StoreError::Storage(e.to_string()))?
            .len())
    }
}
