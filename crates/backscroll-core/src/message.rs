//! Messages, timestamps and log keys.

use std::{borrow::Borrow, fmt};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Textual timestamp whose byte order equals chronological order.
///
/// Callers must keep the width fixed (same precision, same zone suffix)
/// across a store, otherwise lexicographic order stops matching time order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(String);

impl Timestamp {
    /// Wrap an already formatted timestamp.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// RFC 3339 UTC with whole seconds, e.g. `2024-05-01T12:00:00Z`.
    #[must_use]
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self::with_precision(at, SecondsFormat::Secs)
    }

    /// RFC 3339 UTC at a fixed sub-second precision.
    #[must_use]
    pub fn with_precision(at: DateTime<Utc>, precision: SecondsFormat) -> Self {
        Self(at.to_rfc3339_opts(precision, true))
    }

    /// Current time at whole-second precision.
    #[must_use]
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Empty timestamps and timestamps containing NUL cannot be keyed.
    #[must_use]
    pub fn is_keyable(&self) -> bool {
        !self.0.is_empty() && !self.0.as_bytes().contains(&0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Timestamp {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Timestamp {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(at: DateTime<Utc>) -> Self {
        Self::from_datetime(at)
    }
}

impl Borrow<str> for Timestamp {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A single log message, as stored and as sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub timestamp: Timestamp,
    pub body: String,
}

impl Message {
    #[must_use]
    pub fn new(timestamp: impl Into<Timestamp>, body: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            body: body.into(),
        }
    }
}

/// Position of a message in the log.
///
/// Orders by timestamp, then by sequence number. With timestamp-only keying
/// `seq` is always 0.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogKey {
    pub timestamp: Timestamp,
    pub seq: u64,
}

impl LogKey {
    #[must_use]
    pub const fn new(timestamp: Timestamp, seq: u64) -> Self {
        Self { timestamp, seq }
    }

    /// Lowest key at `timestamp`; anything at or after this instant sorts
    /// at or above it.
    #[must_use]
    pub const fn floor(timestamp: Timestamp) -> Self {
        Self { timestamp, seq: 0 }
    }
}

impl fmt::Display for LogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.timestamp, self.seq)
    }
}

/// A stored message together with the key it lives under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub key: LogKey,
    pub message: Message,
}

impl LogEntry {
    #[must_use]
    pub const fn new(key: LogKey, message: Message) -> Self {
        Self { key, message }
    }
}

/// Where a backward scan starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anchor {
    /// The newest entry in the store, inclusive.
    Now,
    /// The greatest entry strictly below this key.
    Before(LogKey),
}

impl From<LogKey> for Anchor {
    fn from(key: LogKey) -> Self {
        Self::Before(key)
    }
}

impl From<Timestamp> for Anchor {
    fn from(timestamp: Timestamp) -> Self {
        Self::Before(LogKey::floor(timestamp))
    }
}
