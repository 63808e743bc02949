//! Durable log storage on redb (feature-gated).

use std::{ops::Bound, sync::Arc};

use async_trait::async_trait;
use backscroll_core::{
    Anchor, AppendError, KeyStrategy, LogEntry, LogKey, LogStore, Message, StoreConfig,
    StoreError, codec,
};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use tracing::{debug, info, instrument};

// Key: encoded LogKey, Value: JSON message
const MESSAGES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("messages");

// Key: setting name, Value: u64
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_SEQ: &str = "next_seq";
const KEY_STRATEGY: &str = "key_strategy";

const fn strategy_tag(strategy: KeyStrategy) -> u64 {
    match strategy {
        KeyStrategy::TimestampOnly => 0,
        KeyStrategy::Sequenced => 1,
    }
}

/// redb storage implementation.
///
/// Each append is one write transaction, so a batch is applied entirely or
/// not at all. Blocking engine calls run on the blocking thread pool.
pub struct RedbStore {
    db: Arc<Database>,
    config: StoreConfig,
}

impl RedbStore {
    /// Open or create the database.
    ///
    /// # Errors
    /// Returns error if the file cannot be opened, or if it was created with
    /// a different key strategy.
    #[instrument(skip(config), fields(path = %config.path.display()))]
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(StoreError::storage)?;
            }
        }

        let db = Database::create(&config.path).map_err(StoreError::storage)?;
        info!(key_strategy = ?config.key_strategy, "Opened message log");

        let store = Self {
            db: Arc::new(db),
            config,
        };
        store.init_tables()?;
        Ok(store)
    }

    /// Create tables and pin the key strategy on first open.
    fn init_tables(&self) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write().map_err(StoreError::storage)?;
        {
            write_txn.open_table(MESSAGES).map_err(StoreError::storage)?;
            let mut meta = write_txn.open_table(META).map_err(StoreError::storage)?;

            let wanted = strategy_tag(self.config.key_strategy);
            let existing = meta
                .get(KEY_STRATEGY)
                .map_err(StoreError::storage)?
                .map(|v| v.value());
            match existing {
                Some(tag) if tag != wanted => {
                    return Err(StoreError::Storage(format!(
                        "database was created with key strategy tag {tag}, opened with {:?}",
                        self.config.key_strategy
                    )));
                }
                Some(_) => {}
                None => {
                    meta.insert(KEY_STRATEGY, wanted)
                        .map_err(StoreError::storage)?;
                }
            }
        }
        write_txn.commit().map_err(StoreError::storage)?;

        debug!("Initialized redb tables");
        Ok(())
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn append_blocking(
        db: &Database,
        strategy: KeyStrategy,
        encoded: Vec<(Message, Vec<u8>)>,
    ) -> Result<Vec<LogEntry>, StoreError> {
        let write_txn = db.begin_write().map_err(StoreError::storage)?;
        let written = {
            let mut meta = write_txn.open_table(META).map_err(StoreError::storage)?;
            let mut next_seq = meta
                .get(NEXT_SEQ)
                .map_err(StoreError::storage)?
                .map_or(1, |v| v.value());

            let mut messages = write_txn.open_table(MESSAGES).map_err(StoreError::storage)?;
            let mut written = Vec::with_capacity(encoded.len());
            for (message, value) in encoded {
                let seq = match strategy {
                    KeyStrategy::TimestampOnly => 0,
                    KeyStrategy::Sequenced => {
                        let seq = next_seq;
                        next_seq += 1;
                        seq
                    }
                };
                let key = LogKey::new(message.timestamp.clone(), seq);
                let raw_key = strategy.encode_key(&key);
                messages
                    .insert(raw_key.as_slice(), value.as_slice())
                    .map_err(StoreError::storage)?;
                written.push(LogEntry::new(key, message));
            }

            if strategy == KeyStrategy::Sequenced {
                meta.insert(NEXT_SEQ, next_seq).map_err(StoreError::storage)?;
            }
            written
        };
        write_txn.commit().map_err(StoreError::storage)?;
        Ok(written)
    }

    fn query_blocking(
        db: &Database,
        strategy: KeyStrategy,
        anchor: &Anchor,
        limit: usize,
    ) -> Result<Vec<LogEntry>, StoreError> {
        let read_txn = db.begin_read().map_err(StoreError::storage)?;
        let table = read_txn.open_table(MESSAGES).map_err(StoreError::storage)?;

        let upper = strategy.upper_bound(anchor);
        let bounds: (Bound<&[u8]>, Bound<&[u8]>) =
            (Bound::Unbounded, upper.as_ref().map(Vec::as_slice));
        let range = table
            .range::<&[u8]>(bounds)
            .map_err(StoreError::storage)?;

        let mut results = Vec::with_capacity(limit.min(1024));
        for entry in range.rev().take(limit) {
            let (raw_key, raw_value) = entry.map_err(StoreError::storage)?;
            let raw_key = raw_key.value();
            let key = strategy.decode_key(raw_key)?;
            let message = codec::decode_value(raw_key, raw_value.value())?;
            results.push(LogEntry::new(key, message));
        }
        Ok(results)
    }

    #[cfg(test)]
    pub(crate) fn insert_raw(&self, key: &[u8], value: &[u8]) {
        let write_txn = self.db.begin_write().unwrap();
        {
            let mut table = write_txn.open_table(MESSAGES).unwrap();
            table.insert(key, value).unwrap();
        }
        write_txn.commit().unwrap();
    }
}

#[async_trait]
impl LogStore for RedbStore {
    fn key_strategy(&self) -> KeyStrategy {
        self.config.key_strategy
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

        let db = Arc::clone(&self.db);
        let strategy = self.config.key_strategy;
        let written = tokio::task::spawn_blocking(move || {
            Self::append_blocking(&db, strategy, encoded)
        })
        .await
        .map_err(StoreError::storage)??;
        Ok(written)
    }

    async fn query(&self, anchor: Anchor, limit: usize) -> Result<Vec<LogEntry>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let db = Arc::clone(&self.db);
        let strategy = self.config.key_strategy;
        tokio::task::spawn_blocking(move || Self::query_blocking(&db, strategy, &anchor, limit))
            .await
            .map_err(StoreError::storage)?
    }

    async fn len(&self) -> Result<usize, StoreError> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let read_txn = db.begin_read().map_err(StoreError::storage)?;
            let table = read_txn.open_table(MESSAGES).map_err(StoreError::storage)?;
            let len = table.len().map_err(StoreError::storage)?;
            Ok(usize::try_from(len).unwrap_or(usize::MAX))
        })
        .await
        .map_err(StoreError::storage)?
    }
}
