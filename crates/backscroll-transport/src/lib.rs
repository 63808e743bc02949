//! Transport layer for message log sessions.
//!
//! Provides:
//! - Wire protocol (JSON arrays of messages)
//! - WebSocket transport (feature: websocket)

pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use protocol::{FAILED_PULL, ProtocolError, decode_batch, decode_frame, encode_batch};

#[cfg(feature = "websocket")]
pub use websocket::{MESSAGES_PATH, create_ws_router};
