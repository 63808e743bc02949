//! Byte encoding of log keys and stored values.
//!
//! Keys sort bytewise in the same order as [`LogKey`]:
//! - `TimestampOnly`: the raw timestamp bytes.
//! - `Sequenced`: timestamp bytes, a `0x00` separator, then the sequence
//!   number as big-endian `u64`.
//!
//! Values are the JSON encoding of [`Message`].

use std::ops::Bound;

use serde::{Deserialize, Serialize};

use crate::{Anchor, LogKey, Message, StoreError, Timestamp};

const SEPARATOR: u8 = 0x00;
const SEQ_LEN: usize = 8;

/// How messages are keyed in the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Key by timestamp alone. Equal timestamps overwrite each other.
    #[default]
    TimestampOnly,
    /// Key by timestamp plus a store-assigned sequence number.
    Sequenced,
}

impl KeyStrategy {
    /// Encode a key for storage.
    #[must_use]
    pub fn encode_key(self, key: &LogKey) -> Vec<u8> {
        let ts = key.timestamp.as_bytes();
        match self {
            Self::TimestampOnly => ts.to_vec(),
            Self::Sequenced => {
                let mut buf = Vec::with_capacity(ts.len() + 1 + SEQ_LEN);
                buf.extend_from_slice(ts);
                buf.push(SEPARATOR);
                buf.extend_from_slice(&key.seq.to_be_bytes());
                buf
            }
        }
    }

    /// Decode a stored key.
    ///
    /// # Errors
    /// Returns [`StoreError::Decode`] if the bytes are not a key of this
    /// strategy.
    pub fn decode_key(self, raw: &[u8]) -> Result<LogKey, StoreError> {
        let (ts, seq) = match self {
            Self::TimestampOnly => (raw, 0),
            Self::Sequenced => {
                if raw.len() < SEQ_LEN + 2 || raw[raw.len() - SEQ_LEN - 1] != SEPARATOR {
                    return Err(StoreError::decode(raw, "missing sequence suffix"));
                }
                let (ts, rest) = raw.split_at(raw.len() - SEQ_LEN - 1);
                let mut seq = [0u8; SEQ_LEN];
                seq.copy_from_slice(&rest[1..]);
                (ts, u64::from_be_bytes(seq))
            }
        };
        let ts = std::str::from_utf8(ts).map_err(|e| StoreError::decode(raw, e))?;
        Ok(LogKey::new(Timestamp::new(ts), seq))
    }

    /// Exclusive upper bound of a backward scan starting at `anchor`.
    #[must_use]
    pub fn upper_bound(self, anchor: &Anchor) -> Bound<Vec<u8>> {
        match anchor {
            Anchor::Now => Bound::Unbounded,
            Anchor::Before(key) => Bound::Excluded(self.encode_key(key)),
        }
    }
}

/// Check that a message can be stored.
///
/// # Errors
/// Returns [`StoreError::InvalidTimestamp`] for empty timestamps or
/// timestamps containing NUL.
pub fn validate(message: &Message) -> Result<(), StoreError> {
    if message.timestamp.is_keyable() {
        Ok(())
    } else {
        Err(StoreError::InvalidTimestamp(
            message.timestamp.as_str().to_owned(),
        ))
    }
}

/// Serialize a message for storage.
///
/// # Errors
/// Returns [`StoreError::Encode`] if serialization fails.
pub fn encode_value(message: &Message) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(message)?)
}

/// Deserialize a stored message. `raw_key` is only used for error context.
///
/// # Errors
/// Returns [`StoreError::Decode`] if the value is not a valid message.
pub fn decode_value(raw_key: &[u8], raw: &[u8]) -> Result<Message, StoreError> {
    serde_json::from_slice(raw).map_err(|e| StoreError::decode(raw_key, e))
}
