//! Fan-out of appended batches to every live session.
//!
//! Each subscriber owns a bounded mailbox. Publishing enqueues the event into
//! every mailbox independently; a full mailbox drops its oldest event and
//! reports the gap as [`Delivery::Lagged`] on the next receive.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::sync::Notify;
use uuid::Uuid;

use crate::LogEntry;

/// Default mailbox capacity, in events.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 1024;

/// Subscriber identifier.
pub type SubscriberId = Uuid;

/// A batch of entries that was just appended to the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEvent {
    pub entries: Vec<LogEntry>,
}

impl UpdateEvent {
    #[must_use]
    pub const fn new(entries: Vec<LogEntry>) -> Self {
        Self { entries }
    }
}

/// What a subscriber receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The next published event.
    Event(Arc<UpdateEvent>),
    /// This many events were dropped because the mailbox was full.
    Lagged(u64),
}

#[derive(Default)]
struct MailboxState {
    events: VecDeque<Arc<UpdateEvent>>,
    dropped: u64,
}

struct Mailbox {
    state: Mutex<MailboxState>,
    notify: Notify,
    closed: AtomicBool,
    capacity: usize,
}

impl Mailbox {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(MailboxState::default()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true if an older event had to be dropped.
    fn push(&self, event: Arc<UpdateEvent>) -> bool {
        let dropped = {
            let mut state = self.lock();
            let dropped = if state.events.len() >= self.capacity {
                state.events.pop_front();
                state.dropped += 1;
                true
            } else {
                false
            };
            state.events.push_back(event);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    fn pop(&self) -> Option<Delivery> {
        let mut state = self.lock();
        if state.dropped > 0 {
            return Some(Delivery::Lagged(std::mem::take(&mut state.dropped)));
        }
        state.events.pop_front().map(Delivery::Event)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

struct Registry {
    subscribers: RwLock<HashMap<SubscriberId, Arc<Mailbox>>>,
    closed: AtomicBool,
    capacity: usize,
}

impl Registry {
    fn close_all(&self) {
        self.closed.store(true, Ordering::Release);
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for mailbox in subscribers.values() {
            mailbox.close();
        }
    }

    fn remove(&self, id: SubscriberId) -> bool {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Subscriber registry with independent per-subscriber delivery.
///
/// Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Registry>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    /// Create a broadcaster with the default mailbox capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Create a broadcaster whose mailboxes hold up to `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Registry {
                subscribers: RwLock::new(HashMap::new()),
                closed: AtomicBool::new(false),
                capacity,
            }),
        }
    }

    /// Register a new subscriber.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let id = Uuid::new_v4();
        let mailbox = Arc::new(Mailbox::new(self.inner.capacity));
        {
            // Checked under the write lock so a concurrent close either sees
            // this mailbox or is seen here.
            let mut subscribers = self
                .inner
                .subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if self.is_closed() {
                mailbox.close();
            } else {
                subscribers.insert(id, Arc::clone(&mailbox));
            }
        }
        tracing::debug!(subscriber = %id, "Subscribed");
        Subscription {
            id,
            mailbox,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.inner.remove(id);
        if removed {
            tracing::debug!(subscriber = %id, "Unsubscribed");
        }
        removed
    }

    /// Deliver `event` to every registered subscriber.
    ///
    /// Never waits on a subscriber. Returns the number of subscribers the
    /// event was enqueued to.
    pub fn publish(&self, event: UpdateEvent) -> usize {
        if self.is_closed() {
            return 0;
        }
        let event = Arc::new(event);
        let targets: Vec<(SubscriberId, Arc<Mailbox>)> = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, mailbox)| (*id, Arc::clone(mailbox)))
            .collect();

        for (id, mailbox) in &targets {
            if mailbox.push(Arc::clone(&event)) {
                tracing::debug!(subscriber = %id, "Mailbox full, dropped oldest event");
            }
        }
        targets.len()
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Stop delivering and wake every subscriber.
    pub fn close(&self) {
        self.inner.close_all();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

/// Handle to one subscriber's mailbox. Unsubscribes on drop.
pub struct Subscription {
    id: SubscriberId,
    mailbox: Arc<Mailbox>,
    registry: Weak<Registry>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Subscription {
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next delivery.
    ///
    /// Returns `None` once the broadcaster is closed and the mailbox is
    /// drained.
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            if let Some(delivery) = self.mailbox.pop() {
                return Some(delivery);
            }
            if self.mailbox.closed.load(Ordering::Acquire) {
                return None;
            }
            self.mailbox.notify.notified().await;
        }
    }

    /// Take the next delivery without waiting.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.mailbox.pop()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if registry.remove(self.id) {
                tracing::debug!(subscriber = %self.id, "Subscription dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_pending, assert_ready_eq, task};

    use super::*;
    use crate::{LogKey, Message};

    fn event(ts: &str) -> UpdateEvent {
        UpdateEvent::new(vec![LogEntry::new(
            LogKey::floor(ts.into()),
            Message::new(ts, format!("body {ts}")),
        )])
    }

    fn expect_event(delivery: Option<Delivery>) -> Arc<UpdateEvent> {
        match delivery {
            Some(Delivery::Event(event)) => event,
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_event() {
        let broadcaster = Broadcaster::new();
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();

        assert_eq!(broadcaster.publish(event("T1")), 2);

        let got_a = expect_event(a.recv().await);
        let got_b = expect_event(b.recv().await);
        assert_eq!(*got_a, event("T1"));
        assert_eq!(*got_b, event("T1"));
        assert!(a.try_recv().is_none());
        assert!(b.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_full_mailbox_drops_oldest() {
        let broadcaster = Broadcaster::with_capacity(2);
        let mut sub = broadcaster.subscribe();

        for ts in ["T1", "T2", "T3", "T4"] {
            broadcaster.publish(event(ts));
        }

        assert_eq!(sub.recv().await, Some(Delivery::Lagged(2)));
        assert_eq!(*expect_event(sub.recv().await), event("T3"));
        assert_eq!(*expect_event(sub.recv().await), event("T4"));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_affect_others() {
        let broadcaster = Broadcaster::with_capacity(1);
        let mut slow = broadcaster.subscribe();
        let mut fast = broadcaster.subscribe();

        broadcaster.publish(event("T1"));
        assert_eq!(*expect_event(fast.recv().await), event("T1"));
        broadcaster.publish(event("T2"));
        assert_eq!(*expect_event(fast.recv().await), event("T2"));

        assert_eq!(slow.recv().await, Some(Delivery::Lagged(1)));
        assert_eq!(*expect_event(slow.recv().await), event("T2"));
    }

    #[test]
    fn test_drop_unsubscribes() {
        let broadcaster = Broadcaster::new();
        let sub = broadcaster.subscribe();
        let other = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 2);

        drop(sub);
        assert_eq!(broadcaster.subscriber_count(), 1);
        assert_eq!(broadcaster.publish(event("T1")), 1);

        assert!(broadcaster.unsubscribe(other.id()));
        assert!(!broadcaster.unsubscribe(other.id()));
        assert_eq!(broadcaster.publish(event("T2")), 0);
    }

    #[test]
    fn test_recv_waits_for_publish() {
        let broadcaster = Broadcaster::new();
        let mut sub = broadcaster.subscribe();

        let mut recv = task::spawn(sub.recv());
        assert_pending!(recv.poll());

        broadcaster.publish(event("T1"));
        assert!(recv.is_woken());
        assert_ready_eq!(
            recv.poll(),
            Some(Delivery::Event(Arc::new(event("T1"))))
        );
    }

    #[tokio::test]
    async fn test_close_wakes_subscribers() {
        let broadcaster = Broadcaster::new();
        let mut sub = broadcaster.subscribe();

        let waiter = tokio::spawn(async move { sub.recv().await });
        tokio::task::yield_now().await;
        broadcaster.close();

        assert_eq!(waiter.await.unwrap(), None);
        assert_eq!(broadcaster.publish(event("T1")), 0);

        let mut late = broadcaster.subscribe();
        assert_eq!(late.recv().await, None);
    }

    #[tokio::test]
    async fn test_queued_events_drain_after_close() {
        let broadcaster = Broadcaster::new();
        let mut sub = broadcaster.subscribe();
        broadcaster.publish(event("T1"));
        broadcaster.close();

        assert_eq!(*expect_event(sub.recv().await), event("T1"));
        assert_eq!(sub.recv().await, None);
    }

    #[test]
    fn test_subscribe_racing_close_never_hangs() {
        for _ in 0..50 {
            let broadcaster = Broadcaster::new();
            let subscribers: Vec<_> = (0..4)
                .map(|_| {
                    let broadcaster = broadcaster.clone();
                    std::thread::spawn(move || {
                        (0..50).map(|_| broadcaster.subscribe()).collect::<Vec<_>>()
                    })
                })
                .collect();
            broadcaster.close();

            for handle in subscribers {
                for mut sub in handle.join().unwrap() {
                    let mut recv = task::spawn(sub.recv());
                    assert_ready_eq!(recv.poll(), None);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_dropping_broadcaster_ends_subscription() {
        let broadcaster = Broadcaster::new();
        let mut sub = broadcaster.subscribe();
        drop(broadcaster);
        assert_eq!(sub.recv().await, None);
    }
}
