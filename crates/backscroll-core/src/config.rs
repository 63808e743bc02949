//! Configuration for the store and for sessions.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{KeyStrategy, broadcast::DEFAULT_SUBSCRIBER_CAPACITY};

/// Default number of messages per history page.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Where and how the log is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the database file.
    pub path: PathBuf,
    /// How messages are keyed.
    pub key_strategy: KeyStrategy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/backscroll.redb"),
            key_strategy: KeyStrategy::default(),
        }
    }
}

impl StoreConfig {
    /// Config for a database at `path` with default keying.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_key_strategy(mut self, key_strategy: KeyStrategy) -> Self {
        self.key_strategy = key_strategy;
        self
    }
}

/// Per-session behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Messages returned per pull.
    pub page_size: usize,

    /// Broadcast mailbox capacity per session, in events.
    pub subscriber_capacity: usize,

    /// Outbound batches buffered between the session and its connection.
    pub outbound_capacity: usize,

    /// Forward live events to sessions that have not pulled yet.
    pub live_before_first_pull: bool,

    /// Entries re-read from the head of the log when reconciling.
    pub reconcile_window: usize,

    /// Reconcile periodically, in milliseconds. Reconciliation after a
    /// lagged mailbox happens regardless.
    pub reconcile_interval_ms: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            outbound_capacity: 64,
            live_before_first_pull: false,
            reconcile_window: 100,
            reconcile_interval_ms: None,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub const fn with_live_before_first_pull(mut self, enabled: bool) -> Self {
        self.live_before_first_pull = enabled;
        self
    }

    #[must_use]
    pub fn reconcile_interval(&self) -> Option<Duration> {
        self.reconcile_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}
