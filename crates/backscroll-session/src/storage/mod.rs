//! Storage implementations.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "redb")]
pub mod redb;

#[cfg(feature = "memory")]
pub use memory::MemoryStore;

#[cfg(feature = "redb")]
pub use self::redb::RedbStore;

/// Behaviour every backend must share, run against each one.
#[cfg(test)]
pub(crate) mod conformance {
    use backscroll_core::{Anchor, LogEntry, LogStore, Message, Timestamp};

    fn ts(second: u32) -> Timestamp {
        Timestamp::new(format!("2024-05-01T10:{:02}:{:02}Z", second / 60, second % 60))
    }

    fn msg(second: u32) -> Message {
        Message::new(ts(second), format!("Hello World {}", ts(second)))
    }

    fn timestamps(entries: &[LogEntry]) -> Vec<Timestamp> {
        entries.iter().map(|e| e.message.timestamp.clone()).collect()
    }

    async fn ordering(store: &impl LogStore) {
        // Appended out of order on purpose.
        let batch = [4, 1, 3, 0, 2].into_iter().map(msg).collect();
        store.append(batch).await.unwrap();

        let got = store.query(Anchor::Now, 10).await.unwrap();
        assert_eq!(timestamps(&got), [ts(4), ts(3), ts(2), ts(1), ts(0)]);
        assert!(got.windows(2).all(|w| w[0].key > w[1].key));

        let limited = store.query(Anchor::Now, 3).await.unwrap();
        assert_eq!(timestamps(&limited), [ts(4), ts(3), ts(2)]);

        assert!(store.query(Anchor::Now, 0).await.unwrap().is_empty());
    }

    async fn boundaries(store: &impl LogStore) {
        store
            .append(vec![msg(10), msg(20), msg(30)])
            .await
            .unwrap();

        let newest = store.query(Anchor::Now, 10).await.unwrap();
        assert_eq!(newest[0].message.timestamp, ts(30));

        // Exact anchor is excluded.
        let before_exact = store.query(Anchor::from(ts(20)), 10).await.unwrap();
        assert_eq!(timestamps(&before_exact), [ts(10)]);

        // Inexact anchor excludes nothing but what is at or above it.
        let before_gap = store.query(Anchor::from(ts(25)), 10).await.unwrap();
        assert_eq!(timestamps(&before_gap), [ts(20), ts(10)]);

        let past_end = store.query(Anchor::from(ts(10)), 10).await.unwrap();
        assert!(past_end.is_empty());

        let after_newest = store.query(Anchor::from(ts(99)), 10).await.unwrap();
        assert_eq!(after_newest.len(), 3);
    }

    async fn pagination(store: &impl LogStore) {
        let total = 23;
        store.append((0..total).map(msg).collect()).await.unwrap();

        let mut pages = Vec::new();
        let mut anchor = Anchor::Now;
        loop {
            let page = store.query(anchor.clone(), 5).await.unwrap();
            let Some(oldest) = page.last() else {
                break;
            };
            anchor = Anchor::Before(oldest.key.clone());
            pages.push(page);
        }

        assert_eq!(pages.len(), 5);
        assert_eq!(pages.last().unwrap().len(), 3);
        let walked: Vec<_> = pages.iter().flat_map(|p| timestamps(p)).collect();
        let expected: Vec<_> = (0..total).rev().map(ts).collect();
        assert_eq!(walked, expected);
    }

    async fn empty_store(store: &impl LogStore) {
        assert!(store.is_empty().await.unwrap());
        assert!(store.query(Anchor::Now, 10).await.unwrap().is_empty());
        assert!(store.append(Vec::new()).await.unwrap().is_empty());
    }

    async fn collision_overwrites(store: &impl LogStore) {
        store
            .append(vec![Message::new(ts(5), "first")])
            .await
            .unwrap();
        store
            .append(vec![Message::new(ts(5), "second")])
            .await
            .unwrap();

        assert_eq!(store.len().await.unwrap(), 1);
        let got = store.query(Anchor::Now, 10).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].message.body, "second");
    }

    async fn collision_retained(store: &impl LogStore) {
        let first = store
            .append(vec![Message::new(ts(5), "first")])
            .await
            .unwrap();
        let second = store
            .append(vec![Message::new(ts(5), "second")])
            .await
            .unwrap();
        assert!(second[0].key > first[0].key);

        let got = store.query(Anchor::Now, 10).await.unwrap();
        let bodies: Vec<_> = got.iter().map(|e| e.message.body.as_str()).collect();
        assert_eq!(bodies, ["second", "first"]);

        // A bare timestamp anchor excludes every entry at that instant.
        assert!(store.query(Anchor::from(ts(5)), 10).await.unwrap().is_empty());
    }

    async fn same_timestamp_pagination(store: &impl LogStore) {
        let batch = (0..5).map(|i| Message::new(ts(7), format!("m{i}"))).collect();
        store.append(batch).await.unwrap();
        store.append(vec![msg(6)]).await.unwrap();

        let first = store.query(Anchor::Now, 2).await.unwrap();
        let second = store
            .query(Anchor::Before(first[1].key.clone()), 2)
            .await
            .unwrap();
        let third = store
            .query(Anchor::Before(second[1].key.clone()), 2)
            .await
            .unwrap();

        let bodies: Vec<String> = [first, second, third]
            .iter()
            .flatten()
            .map(|e| e.message.body.clone())
            .collect();
        let expected: Vec<String> = ["m4", "m3", "m2", "m1", "m0"]
            .into_iter()
            .map(String::from)
            .chain([msg(6).body])
            .collect();
        assert_eq!(bodies, expected);
    }

    /// Checks for stores keyed by timestamp alone.
    pub(crate) async fn run_all<S: LogStore, G>(make: impl Fn() -> (S, G)) {
        let (store, _guard) = make();
        empty_store(&store).await;
        let (store, _guard) = make();
        ordering(&store).await;
        let (store, _guard) = make();
        boundaries(&store).await;
        let (store, _guard) = make();
        pagination(&store).await;
        let (store, _guard) = make();
        collision_overwrites(&store).await;
    }

    /// Checks for stores keyed by timestamp and sequence number.
    pub(crate) async fn run_all_sequenced<S: LogStore, G>(make: impl Fn() -> (S, G)) {
        let (store, _guard) = make();
        empty_store(&store).await;
        let (store, _guard) = make();
        ordering(&store).await;
        let (store, _guard) = make();
        boundaries(&store).await;
        let (store, _guard) = make();
        pagination(&store).await;
        let (store, _guard) = make();
        collision_retained(&store).await;
        let (store, _guard) = make();
        same_timestamp_pagination(&store).await;
    }
}
