//! Wire protocol for client-server communication.
//!
//! Client to server: any data frame asks for the next page of history; its
//! payload is ignored.
//!
//! Server to client: one frame per batch, a JSON array of
//! `{"timestamp": ..., "body": ...}` objects. Pages are newest first; live
//! batches keep the order they were appended in. A pull the store could
//! not answer is sent as `null`, so it never reads as exhausted history
//! (`[]`).

use backscroll_core::Message;
use backscroll_session::Outbound;

/// Protocol error.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Failed to encode batch: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("Failed to decode batch: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Encode a batch as one frame payload.
///
/// # Errors
/// Returns error if serialization fails.
pub fn encode_batch(messages: &[Message]) -> Result<String, ProtocolError> {
    serde_json::to_string(messages).map_err(ProtocolError::Encode)
}

/// Payload of a failed pull.
pub const FAILED_PULL: &str = "null";

/// Encode an outbound batch, or `None` for a live batch with nothing in it.
///
/// # Errors
/// Returns error if serialization fails.
pub fn encode_outbound(batch: &Outbound) -> Result<Option<String>, ProtocolError> {
    match batch {
        Outbound::Live(messages) if messages.is_empty() => Ok(None),
        Outbound::Failed(_) => Ok(Some(FAILED_PULL.to_string())),
        batch => encode_batch(batch.messages()).map(Some),
    }
}

/// Decode a frame payload sent by the server.
///
/// # Errors
/// Returns error if the payload is not a JSON array of messages.
pub fn decode_batch(payload: &str) -> Result<Vec<Message>, ProtocolError> {
    serde_json::from_str(payload).map_err(ProtocolError::Decode)
}

/// Decode any server frame: `Some(batch)`, or `None` for a failed pull.
///
/// # Errors
/// Returns error if the payload is neither a batch nor `null`.
pub fn decode_frame(payload: &str) -> Result<Option<Vec<Message>>, ProtocolError> {
    serde_json::from_str(payload).map_err(ProtocolError::Decode)
}
