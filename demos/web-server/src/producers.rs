//! Simulated producers: bulk backfill, a live stream and late arrivals.

use backscroll_core::{LogStore, Message, Timestamp};
use backscroll_session::MessageLog;
use chrono::{DateTime, Duration, Utc};
use tokio::{task::JoinHandle, time::MissedTickBehavior};

use crate::config::SimulationConfig;

/// A message stamped `at`, with a body naming its timestamp.
pub fn message_at(at: DateTime<Utc>) -> Message {
    let timestamp = Timestamp::from_datetime(at);
    let body = format!("Hello World {timestamp}");
    Message::new(timestamp, body)
}

/// Messages `offset..offset + len` seconds before `origin`.
pub fn backfill_batch(origin: DateTime<Utc>, offset: usize, len: usize) -> Vec<Message> {
    (offset..offset + len)
        .map(|i| message_at(origin - Duration::seconds(i64::try_from(i).unwrap_or(i64::MAX))))
        .collect()
}

/// `size` messages at `step`, `2 * step`, ... seconds before `now`.
pub fn late_batch(now: DateTime<Utc>, size: usize, step_secs: i64) -> Vec<Message> {
    (1..=size)
        .map(|i| {
            let i = i64::try_from(i).unwrap_or(i64::MAX);
            message_at(now - Duration::seconds(step_secs.saturating_mul(i)))
        })
        .collect()
}

async fn append_logged<S: LogStore>(log: &MessageLog<S>, producer: &str, batch: Vec<Message>) {
    if let Err(e) = log.append(batch).await {
        tracing::error!(producer, committed = e.committed.len(), "Error appending messages: {e}");
    }
}

async fn backfill<S: LogStore>(log: MessageLog<S>, config: SimulationConfig) {
    let origin = Utc::now() - Duration::hours(1);
    let mut offset = 0;
    while offset < config.backfill_count {
        let len = config.backfill_batch.min(config.backfill_count - offset);
        append_logged(&log, "backfill", backfill_batch(origin, offset, len)).await;
        offset += len;
    }
    tracing::info!(count = config.backfill_count, "Loaded historical messages");
}

async fn live<S: LogStore>(log: MessageLog<S>, config: SimulationConfig) {
    let mut interval = tokio::time::interval(config.live_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let message = message_at(Utc::now());
        tracing::debug!(timestamp = %message.timestamp, "Latest timestamp");
        append_logged(&log, "live", vec![message]).await;
    }
}

async fn late_single<S: LogStore>(log: MessageLog<S>, config: SimulationConfig) {
    let mut interval = tokio::time::interval(config.late_single_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let at = Utc::now() - Duration::seconds(config.late_offset_secs);
        append_logged(&log, "late_single", vec![message_at(at)]).await;
    }
}

async fn late_chunk<S: LogStore>(log: MessageLog<S>, config: SimulationConfig) {
    let mut interval = tokio::time::interval(config.late_batch_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let batch = late_batch(Utc::now(), config.late_batch_size, config.late_offset_secs);
        append_logged(&log, "late_batch", batch).await;
    }
}

/// Spawn every producer. Each runs until aborted.
pub fn spawn_all<S>(log: &MessageLog<S>, config: &SimulationConfig) -> Vec<JoinHandle<()>>
where
    S: LogStore + 'static,
{
    tracing::info!(
        backfill = config.backfill_count,
        live_ms = config.live_interval_ms,
        late_single_ms = config.late_single_interval_ms,
        late_batch_ms = config.late_batch_interval_ms,
        "Starting simulated producers"
    );
    vec![
        tokio::spawn(backfill(log.clone(), config.clone())),
        tokio::spawn(live(log.clone(), config.clone())),
        tokio::spawn(late_single(log.clone(), config.clone())),
        tokio::spawn(late_chunk(log.clone(), config.clone())),
    ]
}
