//! WebSocket transport for message log sessions.

use std::future;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use backscroll_core::LogStore;
use backscroll_session::{MessageLog, Outbound, SessionError, SessionRequest};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::protocol;

/// Route serving the session protocol.
pub const MESSAGES_PATH: &str = "/messages";

/// WebSocket handler state.
pub struct WsState<S: LogStore> {
    pub log: MessageLog<S>,
}

impl<S: LogStore> Clone for WsState<S> {
    fn clone(&self) -> Self {
        Self {
            log: self.log.clone(),
        }
    }
}

impl<S: LogStore> WsState<S> {
    /// Create new WebSocket state.
    #[must_use]
    pub const fn new(log: MessageLog<S>) -> Self {
        Self { log }
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler<S>(
    ws: WebSocketUpgrade,
    State(state): State<WsState<S>>,
) -> impl IntoResponse
where
    S: LogStore + 'static,
{
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Map an incoming frame to a session request.
///
/// Control frames carry no request.
fn to_request(
    frame: Result<Message, axum::Error>,
) -> Option<Result<SessionRequest, SessionError>> {
    match frame {
        Ok(Message::Text(_) | Message::Binary(_)) => Some(Ok(SessionRequest::Pull)),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Close(_)) => None,
        Err(e) => Some(Err(SessionError::Connection(e.to_string()))),
    }
}

async fn handle_socket<S>(socket: WebSocket, state: WsState<S>)
where
    S: LogStore + 'static,
{
    let session = match state.log.try_open_session() {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!("Rejecting connection: {e}");
            return;
        }
    };
    let session_id = session.handler.id();

    let (mut sender, receiver) = socket.split();

    // Channel for sending batches to the client
    let (tx, mut rx) = mpsc::channel::<Outbound>(state.log.config().outbound_capacity);

    // Spawn task to forward batches to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(batch) = rx.recv().await {
            let json = match protocol::encode_outbound(&batch) {
                Ok(Some(json)) => json,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(session = %session_id, "Failed to encode batch: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let requests = receiver
        .take_while(|frame| future::ready(!matches!(frame, Ok(Message::Close(_)))))
        .filter_map(|frame| future::ready(to_request(frame)));

    match session.run(requests, tx).await {
        Ok(summary) => tracing::debug!(
            session = %session_id,
            pages = summary.pages,
            live_batches = summary.live_batches,
            "Connection closed"
        ),
        Err(e) => tracing::warn!(session = %session_id, "Connection ended with error: {e}"),
    }

    let _ = send_task.await;
}

/// Create the session router, serving the protocol at [`MESSAGES_PATH`].
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_ws_router(log));
/// ```
#[must_use]
pub fn create_ws_router<S>(log: MessageLog<S>) -> axum::Router
where
    S: LogStore + 'static,
{
    axum::Router::new()
        .route(MESSAGES_PATH, axum::routing::get(ws_handler::<S>))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(WsState::new(log))
}
