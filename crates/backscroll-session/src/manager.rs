//! Message log service: durable append plus live fan-out.

use std::sync::Arc;

use backscroll_core::{
    Anchor, AppendError, Broadcaster, LogEntry, LogStore, Message, SessionConfig, StoreError,
    Subscription, UpdateEvent,
};
use futures::Stream;
use tokio::sync::mpsc;

use crate::handler::{
    Outbound, SessionError, SessionHandler, SessionRequest, SessionSummary, run_session,
};

/// A session opened against a [`MessageLog`], already subscribed.
pub struct Session<S: LogStore> {
    pub handler: SessionHandler<S>,
    pub subscription: Subscription,
}

impl<S: LogStore> Session<S> {
    /// Drive the session until its connection goes away.
    ///
    /// # Errors
    /// Returns error if the request stream fails.
    pub async fn run<R>(
        self,
        requests: R,
        outbound: mpsc::Sender<Outbound>,
    ) -> Result<SessionSummary, SessionError>
    where
        R: Stream<Item = Result<SessionRequest, SessionError>>,
    {
        run_session(self.handler, self.subscription, requests, outbound).await
    }
}

/// Ordered message log with live delivery to open sessions.
pub struct MessageLog<S: LogStore> {
    store: Arc<S>,
    broadcaster: Broadcaster,
    config: SessionConfig,
}

impl<S: LogStore> Clone for MessageLog<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            broadcaster: self.broadcaster.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: LogStore> MessageLog<S> {
    /// Create a new message log over `store`.
    #[must_use]
    pub fn new(store: S, config: SessionConfig) -> Self {
        Self::from_arc(Arc::new(store), config)
    }

    /// Create a new message log over a shared store.
    #[must_use]
    pub fn from_arc(store: Arc<S>, config: SessionConfig) -> Self {
        Self {
            store,
            broadcaster: Broadcaster::with_capacity(config.subscriber_capacity),
            config,
        }
    }

    /// Persist a batch and publish what was written.
    ///
    /// A partially committed batch still publishes its committed prefix
    /// before the error is returned.
    ///
    /// # Errors
    /// Returns the store's append error.
    pub async fn append(&self, batch: Vec<Message>) -> Result<Vec<LogEntry>, AppendError> {
        match self.store.append(batch).await {
            Ok(written) => {
                self.publish(&written);
                Ok(written)
            }
            Err(e) => {
                self.publish(&e.committed);
                Err(e)
            }
        }
    }

    fn publish(&self, written: &[LogEntry]) {
        if written.is_empty() {
            return;
        }
        let delivered = self.broadcaster.publish(UpdateEvent::new(written.to_vec()));
        tracing::debug!(count = written.len(), subscribers = delivered, "Published append");
    }

    /// Up to `limit` entries strictly before `anchor`, newest first.
    ///
    /// # Errors
    /// Returns error if the store read fails.
    pub async fn query(&self, anchor: Anchor, limit: usize) -> Result<Vec<LogEntry>, StoreError> {
        self.store.query(anchor, limit).await
    }

    /// Subscribe, then build a handler, so nothing appended after this call
    /// is missed.
    #[must_use]
    pub fn open_session(&self) -> (SessionHandler<S>, Subscription) {
        let subscription = self.broadcaster.subscribe();
        let handler = SessionHandler::new(Arc::clone(&self.store), self.config.clone());
        (handler, subscription)
    }

    /// Like [`Self::open_session`], refusing once the log is shut down.
    ///
    /// # Errors
    /// Returns [`SessionError::Closed`] after [`Self::shutdown`].
    pub fn try_open_session(&self) -> Result<Session<S>, SessionError> {
        if self.broadcaster.is_closed() {
            return Err(SessionError::Closed);
        }
        let (handler, subscription) = self.open_session();
        Ok(Session {
            handler,
            subscription,
        })
    }

    #[must_use]
    pub const fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Close the broadcaster; open sessions end once drained.
    pub fn shutdown(&self) {
        tracing::info!(
            subscribers = self.broadcaster.subscriber_count(),
            "Shutting down message log"
        );
        self.broadcaster.close();
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use backscroll_core::{Delivery, KeyStrategy, LogKey};

    use super::*;
    use crate::storage::MemoryStore;

    /// Commits the first message of each batch, then fails.
    struct HalfStore(MemoryStore);

    #[async_trait]
    impl LogStore for HalfStore {
        fn key_strategy(&self) -> KeyStrategy {
            self.0.key_strategy()
        }

        async fn append(&self, mut batch: Vec<Message>) -> Result<Vec<LogEntry>, AppendError> {
            batch.truncate(1);
            let committed = self.0.append(batch).await?;
            Err(AppendError {
                committed,
                source: StoreError::Storage("disk full".into()),
            })
        }

        async fn query(&self, anchor: Anchor, limit: usize) -> Result<Vec<LogEntry>, StoreError> {
            self.0.query(anchor, limit).await
        }

        async fn len(&self) -> Result<usize, StoreError> {
            self.0.len().await
        }
    }

    fn event_keys(delivery: Option<Delivery>) -> Vec<LogKey> {
        match delivery {
            Some(Delivery::Event(event)) => event.entries.iter().map(|e| e.key.clone()).collect(),
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_append_publishes_written_entries() {
        let log = MessageLog::new(MemoryStore::new(), SessionConfig::default());
        let (_handler, mut subscription) = log.open_session();

        let written = log
            .append(vec![Message::new("T1", "a"), Message::new("T2", "b")])
            .await
            .unwrap();

        let keys: Vec<_> = written.iter().map(|e| e.key.clone()).collect();
        assert_eq!(event_keys(subscription.try_recv()), keys);
        assert!(subscription.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_empty_append_publishes_nothing() {
        let log = MessageLog::new(MemoryStore::new(), SessionConfig::default());
        let (_handler, mut subscription) = log.open_session();

        log.append(Vec::new()).await.unwrap();
        assert!(subscription.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_failed_append_publishes_committed_prefix() {
        let log = MessageLog::new(HalfStore(MemoryStore::new()), SessionConfig::default());
        let (_handler, mut subscription) = log.open_session();

        let err = log
            .append(vec![Message::new("T1", "a"), Message::new("T2", "b")])
            .await
            .unwrap_err();
        assert_eq!(err.committed.len(), 1);

        assert_eq!(
            event_keys(subscription.try_recv()),
            vec![LogKey::floor("T1".into())]
        );
    }

    #[tokio::test]
    async fn test_rejected_append_publishes_nothing() {
        let log = MessageLog::new(MemoryStore::new(), SessionConfig::default());
        let (_handler, mut subscription) = log.open_session();

        let err = log.append(vec![Message::new("", "x")]).await.unwrap_err();
        assert!(err.committed.is_empty());
        assert!(subscription.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_sessions() {
        let log = MessageLog::new(MemoryStore::new(), SessionConfig::default());
        let (_handler, mut subscription) = log.open_session();
        assert_eq!(log.broadcaster().subscriber_count(), 1);

        log.shutdown();
        assert!(subscription.recv().await.is_none());
        assert!(matches!(
            log.try_open_session(),
            Err(SessionError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_clones_share_store_and_broadcaster() {
        let log = MessageLog::new(MemoryStore::new(), SessionConfig::default());
        let producer = log.clone();
        let (_handler, mut subscription) = log.open_session();

        producer.append(vec![Message::new("T1", "a")]).await.unwrap();
        assert_eq!(log.store().len().await.unwrap(), 1);
        assert_eq!(event_keys(subscription.try_recv()).len(), 1);
    }
}
