//! Storage backends, the message log service and cursor sessions.
//!
//! Provides:
//! - `MessageLog` - Append, publish and open sessions
//! - `SessionHandler` / `run_session` - Per-connection pagination and live feed
//! - Storage implementations (memory, redb)

pub mod handler;
pub mod manager;
pub mod storage;

pub use handler::{
    Cursor, Outbound, SessionError, SessionHandler, SessionId, SessionRequest, SessionSummary,
    run_session,
};
pub use manager::{MessageLog, Session};
