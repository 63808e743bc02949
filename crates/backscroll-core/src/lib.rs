//! Core types for a timestamp-ordered message log with live fan-out.
//!
//! This crate provides the fundamental building blocks:
//! - `Message`, `LogKey`, `Anchor` - The data model
//! - `KeyStrategy` - Byte encoding of keys and values
//! - `LogStore` - Storage trait for the ordered log
//! - `Broadcaster` - Per-subscriber fan-out of appended batches
//! - `StoreConfig`, `SessionConfig` - Configuration

pub mod broadcast;
pub mod codec;
pub mod config;
pub mod error;
pub mod message;
pub mod traits;

pub use broadcast::{Broadcaster, Delivery, SubscriberId, Subscription, UpdateEvent};
pub use codec::KeyStrategy;
pub use config::{SessionConfig, StoreConfig};
pub use error::{AppendError, StoreError};
pub use message::{Anchor, LogEntry, LogKey, Message, Timestamp};
pub use traits::LogStore;
