//! Per-connection cursor state machine.
//!
//! A session merges two inputs into one outbound stream:
//! - pull requests, answered with the next page of history walking back
//!   from the cursor;
//! - broadcast events, forwarded when they are newer than the cursor.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use backscroll_core::{
    Anchor, Delivery, LogEntry, LogKey, LogStore, Message, SessionConfig, StoreError, Subscription,
    UpdateEvent,
};
use futures::{Stream, StreamExt};
use tokio::{
    sync::mpsc,
    time::{Instant, Interval, MissedTickBehavior},
};
use uuid::Uuid;

/// Session identifier.
pub type SessionId = Uuid;

/// Session error.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Message log is shut down")]
    Closed,
}

/// Client request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRequest {
    /// Send the next page of history.
    Pull,
}

/// Batch sent to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Answer to a pull, newest first. May be empty.
    Page(Vec<Message>),
    /// Newly appended messages newer than the cursor. Never empty.
    Live(Vec<Message>),
    /// A pull that failed in the store. The cursor did not move.
    Failed(String),
}

impl Outbound {
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        match self {
            Self::Page(m) | Self::Live(m) => m,
            Self::Failed(_) => &[],
        }
    }

    #[must_use]
    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Self::Page(m) | Self::Live(m) => m,
            Self::Failed(_) => Vec::new(),
        }
    }
}

/// Where the session stands in log time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    /// No history pulled yet.
    Uninitialized,
    /// Oldest key shown to the client so far.
    Paginating(LogKey),
}

/// Counters reported when a session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub pages: usize,
    pub live_batches: usize,
    pub failed_pulls: usize,
    pub messages: usize,
}

/// Entries recently sent to the client, newest kept.
///
/// Matched on key and message, so a same-key overwrite is not mistaken for
/// something already sent.
#[derive(Debug)]
struct RecentEntries {
    entries: BTreeMap<LogKey, Message>,
    capacity: usize,
}

impl RecentEntries {
    fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn record(&mut self, entry: &LogEntry) {
        self.entries
            .insert(entry.key.clone(), entry.message.clone());
        while self.entries.len() > self.capacity {
            self.entries.pop_first();
        }
    }

    fn contains(&self, entry: &LogEntry) -> bool {
        self.entries.get(&entry.key) == Some(&entry.message)
    }
}

/// Cursor state for one connection.
pub struct SessionHandler<S: LogStore> {
    id: SessionId,
    store: Arc<S>,
    config: SessionConfig,
    cursor: Cursor,
    recent: RecentEntries,
}

impl<S: LogStore> SessionHandler<S> {
    /// Create a handler with no history pulled.
    #[must_use]
    pub fn new(store: Arc<S>, config: SessionConfig) -> Self {
        let recent = RecentEntries::new(config.reconcile_window.max(config.page_size));
        Self {
            id: Uuid::new_v4(),
            store,
            config,
            cursor: Cursor::Uninitialized,
            recent,
        }
    }

    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub const fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether a message at `key` belongs to the live view.
    fn is_live(&self, key: &LogKey) -> bool {
        match &self.cursor {
            Cursor::Uninitialized => self.config.live_before_first_pull,
            Cursor::Paginating(cursor) => key > cursor,
        }
    }

    /// Fetch the next page of history and move the cursor to its oldest
    /// entry.
    ///
    /// # Errors
    /// Returns the store error; the cursor is left unchanged.
    pub async fn pull(&mut self) -> Result<Vec<Message>, StoreError> {
        let anchor = match &self.cursor {
            Cursor::Uninitialized => Anchor::Now,
            Cursor::Paginating(key) => Anchor::Before(key.clone()),
        };
        let page = self.store.query(anchor, self.config.page_size).await?;

        if let Some(oldest) = page.last() {
            self.cursor = Cursor::Paginating(oldest.key.clone());
            tracing::debug!(session = %self.id, cursor = %oldest.key, "Cursor moved");
        }
        for entry in &page {
            self.recent.record(entry);
        }
        Ok(page.into_iter().map(|e| e.message).collect())
    }

    /// Messages of `event` that are newer than the cursor and were not
    /// already sent, for instance by a reconcile after a lag.
    ///
    /// Entries at or behind the cursor are dropped for good; they stay
    /// reachable by pulling further back.
    pub fn on_event(&mut self, event: &UpdateEvent) -> Vec<Message> {
        let mut forwarded = Vec::new();
        for entry in &event.entries {
            if self.is_live(&entry.key) && !self.recent.contains(entry) {
                self.recent.record(entry);
                forwarded.push(entry.message.clone());
            }
        }
        forwarded
    }

    /// Re-read the head of the log and return live messages this session
    /// has not been sent recently, oldest first.
    ///
    /// # Errors
    /// Returns the store error.
    pub async fn reconcile(&mut self) -> Result<Vec<Message>, StoreError> {
        if self.cursor == Cursor::Uninitialized && !self.config.live_before_first_pull {
            return Ok(Vec::new());
        }

        let head = self
            .store
            .query(Anchor::Now, self.config.reconcile_window)
            .await?;

        let mut missing = Vec::new();
        for entry in head.into_iter().rev() {
            if self.is_live(&entry.key) && !self.recent.contains(&entry) {
                self.recent.record(&entry);
                missing.push(entry.message);
            }
        }
        if !missing.is_empty() {
            tracing::debug!(session = %self.id, count = missing.len(), "Reconciled missed messages");
        }
        Ok(missing)
    }
}

fn reconcile_timer(period: Option<Duration>) -> Option<Interval> {
    period.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    })
}

async fn next_tick(timer: Option<&mut Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Drive a session until its connection or the broadcaster goes away.
///
/// Waits on client requests, broadcast deliveries and the optional
/// reconcile timer at once. The subscription is dropped, and so
/// unregistered, when this returns.
///
/// # Errors
/// Returns [`SessionError::Connection`] if the request stream fails.
pub async fn run_session<S, R>(
    mut handler: SessionHandler<S>,
    mut subscription: Subscription,
    requests: R,
    outbound: mpsc::Sender<Outbound>,
) -> Result<SessionSummary, SessionError>
where
    S: LogStore,
    R: Stream<Item = Result<SessionRequest, SessionError>>,
{
    tokio::pin!(requests);
    let mut summary = SessionSummary::default();
    let mut timer = reconcile_timer(handler.config().reconcile_interval());
    let session = handler.id();

    tracing::info!(%session, subscriber = %subscription.id(), "Session started");

    let result = loop {
        let batch = tokio::select! {
            request = requests.next() => match request {
                Some(Ok(SessionRequest::Pull)) => match handler.pull().await {
                    Ok(page) => Some(Outbound::Page(page)),
                    Err(e) => {
                        tracing::error!(%session, "Failed getting messages: {e}");
                        Some(Outbound::Failed(e.to_string()))
                    }
                },
                Some(Err(e)) => break Err(e),
                None => break Ok(()),
            },
            delivery = subscription.recv() => match delivery {
                Some(Delivery::Event(event)) => {
                    Some(Outbound::Live(handler.on_event(&event)))
                }
                Some(Delivery::Lagged(skipped)) => {
                    tracing::warn!(%session, skipped, "Session lagged behind broadcast");
                    reconciled(&mut handler).await
                }
                None => break Ok(()),
            },
            () = next_tick(timer.as_mut()) => reconciled(&mut handler).await,
        };

        let Some(batch) = batch else {
            continue;
        };
        if matches!(&batch, Outbound::Live(m) if m.is_empty()) {
            continue;
        }

        match &batch {
            Outbound::Page(_) => summary.pages += 1,
            Outbound::Live(_) => summary.live_batches += 1,
            Outbound::Failed(_) => summary.failed_pulls += 1,
        }
        summary.messages += batch.messages().len();

        if outbound.send(batch).await.is_err() {
            break Ok(());
        }
    };

    drop(subscription);
    tracing::info!(
        %session,
        pages = summary.pages,
        live_batches = summary.live_batches,
        failed_pulls = summary.failed_pulls,
        messages = summary.messages,
        "Session ended"
    );
    result.map(|()| summary)
}

async fn reconciled<S: LogStore>(handler: &mut SessionHandler<S>) -> Option<Outbound> {
    match handler.reconcile().await {
        Ok(missing) => Some(Outbound::Live(missing)),
        Err(e) => {
            tracing::error!(session = %handler.id(), "Reconcile failed: {e}");
            None
        }
    }
}
