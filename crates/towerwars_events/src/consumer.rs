//! At-least-once consumption with consumer groups and explicit
//! acknowledgement.
//!
//! Each durable service joins the stream under its own group name. A
//! record is acknowledged only after the handler applied it; handlers must
//! therefore be idempotent, keyed by `match_id` + `event_type` + the
//! record's own identity, because crashes between apply and ack redeliver.
//! A record that keeps failing is acked dead after a bounded number of
//! attempts so one poison record cannot stall the group.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::stream::EventSource;
use crate::STREAM_KEY;

/// Attempts before a record is declared poison and acked dead.
pub const MAX_DELIVERY_ATTEMPTS: u32 = 5;

/// One record as seen by a consumer.
#[derive(Clone, PartialEq, Debug)]
pub struct EventRecord {
    /// Stream-assigned id, unique and ordered within the stream.
    pub id: String,
    pub fields: HashMap<String, String>,
}

impl EventRecord {
    pub fn event_type(&self) -> Option<&str> {
        self.fields.get("event_type").map(String::as_str)
    }

    pub fn match_id(&self) -> Option<uuid::Uuid> {
        self.fields.get("match_id")?.parse().ok()
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

/// Applies records to durable state. Must be idempotent.
pub trait EventHandler: Send + 'static {
    fn apply(&mut self, record: &EventRecord) -> anyhow::Result<()>;
}

impl<F> EventHandler for F
where
    F: FnMut(&EventRecord) -> anyhow::Result<()> + Send + 'static,
{
    fn apply(&mut self, record: &EventRecord) -> anyhow::Result<()> {
        self(record)
    }
}

#[derive(Clone, Debug)]
pub struct ConsumerConfig {
    pub group: String,
    pub consumer: String,
    pub batch_size: usize,
    pub block: Duration,
}

impl ConsumerConfig {
    pub fn new(group: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            consumer: consumer.into(),
            batch_size: 64,
            block: Duration::from_millis(2000),
        }
    }
}

/// Runs the consume loop until the source fails terminally or the task is
/// dropped. Resumes this consumer's unacknowledged backlog first.
pub async fn run_consumer<S, H>(
    mut source: S,
    config: ConsumerConfig,
    mut handler: H,
) -> anyhow::Result<()>
where
    S: EventSource,
    H: EventHandler,
{
    source.ensure_group(STREAM_KEY, &config.group).await?;
    info!(group = %config.group, consumer = %config.consumer, "consumer joined");

    let mut attempts: HashMap<String, u32> = HashMap::new();

    // A crashed consumer left applied-but-unacked records behind; apply
    // them again (idempotently) before reading new ones.
    loop {
        let pending = source
            .read_pending(STREAM_KEY, &config.group, &config.consumer, config.batch_size)
            .await?;
        if pending.is_empty() {
            break;
        }
        debug!(count = pending.len(), "re-applying pending records");
        for record in pending {
            handle_record(&mut source, &config, &mut handler, &mut attempts, record).await?;
        }
    }

    loop {
        let records = source
            .read_new(
                STREAM_KEY,
                &config.group,
                &config.consumer,
                config.batch_size,
                config.block,
            )
            .await?;

        for record in records {
            handle_record(&mut source, &config, &mut handler, &mut attempts, record).await?;
        }
    }
}

async fn handle_record<S, H>(
    source: &mut S,
    config: &ConsumerConfig,
    handler: &mut H,
    attempts: &mut HashMap<String, u32>,
    record: EventRecord,
) -> anyhow::Result<()>
where
    S: EventSource,
    H: EventHandler,
{
    match handler.apply(&record) {
        Ok(()) => {
            attempts.remove(&record.id);
            source.ack(STREAM_KEY, &config.group, &record.id).await?;
        }
        Err(e) => {
            let n = attempts.entry(record.id.clone()).or_insert(0);
            *n += 1;
            if *n >= MAX_DELIVERY_ATTEMPTS {
                error!(
                    id = %record.id,
                    event_type = record.event_type().unwrap_or("?"),
                    "record failed {n} times, acking dead: {e:#}"
                );
                attempts.remove(&record.id);
                source.ack(STREAM_KEY, &config.group, &record.id).await?;
            } else {
                // Left unacked: it stays pending and is redelivered.
                warn!(id = %record.id, attempt = *n, "record failed, will retry: {e:#}");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use uuid::Uuid;

    use super::*;
    use crate::stream::{EventSink, EventSource, MemoryStream};
    use crate::{EventEnvelope, GameEvent, UnitKilled};

    fn kill_event(unit_id: u32) -> EventEnvelope {
        EventEnvelope::new(
            Uuid::nil(),
            GameEvent::UnitKilled(UnitKilled {
                player_id: 0,
                unit_id,
                unit_type: "Basic".to_owned(),
                unit_rarity: "Normal".to_owned(),
                killer_tower_id: Uuid::nil(),
                gold_awarded: 5,
                is_critical: false,
            }),
        )
    }

    async fn append_all(stream: &mut MemoryStream, events: &[EventEnvelope]) {
        for event in events {
            let fields = event.fields().unwrap();
            stream.append(STREAM_KEY, &fields).await.unwrap();
        }
    }

    #[tokio::test]
    async fn applied_records_are_acked() {
        let mut stream = MemoryStream::new();
        append_all(&mut stream, &[kill_event(1), kill_event(2)]).await;

        let mut source = stream.clone();
        let config = ConsumerConfig::new("persistence", "c1");
        source.ensure_group(STREAM_KEY, &config.group).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let mut handler = move |record: &EventRecord| {
            seen2.lock().push(record.field("UnitId").unwrap().to_owned());
            Ok(())
        };

        let records = source
            .read_new(STREAM_KEY, "persistence", "c1", 10, Duration::ZERO)
            .await
            .unwrap();
        let mut attempts = HashMap::new();
        for record in records {
            handle_record(&mut source, &config, &mut handler, &mut attempts, record)
                .await
                .unwrap();
        }

        assert_eq!(*seen.lock(), vec!["1".to_owned(), "2".to_owned()]);
        assert!(stream.pending("persistence", "c1").is_empty());
    }

    #[tokio::test]
    async fn unacked_records_stay_pending_and_redeliver() {
        let mut stream = MemoryStream::new();
        append_all(&mut stream, &[kill_event(7)]).await;

        let mut source = stream.clone();
        let config = ConsumerConfig::new("persistence", "c1");
        source.ensure_group(STREAM_KEY, &config.group).await.unwrap();

        let mut failing = |_: &EventRecord| anyhow::bail!("db down");

        let records = source
            .read_new(STREAM_KEY, "persistence", "c1", 10, Duration::ZERO)
            .await
            .unwrap();
        let mut attempts = HashMap::new();
        for record in records {
            handle_record(&mut source, &config, &mut failing, &mut attempts, record)
                .await
                .unwrap();
        }

        // Still pending, and visible to a restarted consumer.
        assert_eq!(stream.pending("persistence", "c1").len(), 1);
        let pending = source
            .read_pending(STREAM_KEY, "persistence", "c1", 10)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].field("UnitId"), Some("7"));
    }

    #[tokio::test]
    async fn poison_records_are_acked_dead() {
        let mut stream = MemoryStream::new();
        append_all(&mut stream, &[kill_event(9)]).await;

        let mut source = stream.clone();
        let config = ConsumerConfig::new("persistence", "c1");
        source.ensure_group(STREAM_KEY, &config.group).await.unwrap();

        let mut failing = |_: &EventRecord| anyhow::bail!("always broken");
        let mut attempts = HashMap::new();

        for _ in 0..MAX_DELIVERY_ATTEMPTS {
            let records = source
                .read_pending(STREAM_KEY, "persistence", "c1", 10)
                .await
                .unwrap();
            let records = if attempts.is_empty() && records.is_empty() {
                source
                    .read_new(STREAM_KEY, "persistence", "c1", 10, Duration::ZERO)
                    .await
                    .unwrap()
            } else {
                records
            };
            for record in records {
                handle_record(&mut source, &config, &mut failing, &mut attempts, record)
                    .await
                    .unwrap();
            }
        }

        assert!(stream.pending("persistence", "c1").is_empty());
        assert!(attempts.is_empty());
    }

    #[tokio::test]
    async fn two_groups_consume_independently() {
        let mut stream = MemoryStream::new();
        append_all(&mut stream, &[kill_event(1)]).await;

        for group in ["persistence", "auth-tower-xp"] {
            let mut source = stream.clone();
            source.ensure_group(STREAM_KEY, group).await.unwrap();
            let records = source
                .read_new(STREAM_KEY, group, "c1", 10, Duration::ZERO)
                .await
                .unwrap();
            assert_eq!(records.len(), 1, "group {group} sees the record");
        }
    }
}
