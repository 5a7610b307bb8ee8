//! Stream backends: the Redis stream used in production and an in-memory
//! double used by tests on both the publishing and consuming side.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tracing::debug;

use crate::consumer::EventRecord;

/// The appending half of a stream.
pub trait EventSink: Send + 'static {
    /// Appends one record, returning its stream-assigned id.
    fn append(
        &mut self,
        stream: &str,
        fields: &[(String, String)],
    ) -> impl Future<Output = anyhow::Result<String>> + Send;
}

/// The consuming half of a stream, with consumer-group semantics.
pub trait EventSource: Send + 'static {
    /// Creates `group` if it does not exist yet.
    fn ensure_group(
        &mut self,
        stream: &str,
        group: &str,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Reads records never delivered to `group`, blocking up to `block`.
    fn read_new(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> impl Future<Output = anyhow::Result<Vec<EventRecord>>> + Send;

    /// Re-reads records delivered to `consumer` but never acknowledged.
    /// Called on startup so a crashed consumer resumes its backlog.
    fn read_pending(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> impl Future<Output = anyhow::Result<Vec<EventRecord>>> + Send;

    /// Acknowledges one record for `group`.
    fn ack(
        &mut self,
        stream: &str,
        group: &str,
        id: &str,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Redis streams backend (`XADD` / `XGROUP` / `XREADGROUP` / `XACK`).
#[derive(Clone)]
pub struct RedisStream {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisStream {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .context("failed to connect to redis")?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: redis::aio::MultiplexedConnection) -> Self {
        Self { conn }
    }
}

fn records_from_reply(reply: StreamReadReply) -> Vec<EventRecord> {
    let mut records = Vec::new();
    for key in reply.keys {
        for entry in key.ids {
            let mut fields = HashMap::new();
            for (field, value) in entry.map {
                match redis::from_redis_value::<String>(&value) {
                    Ok(value) => {
                        fields.insert(field, value);
                    }
                    Err(e) => debug!(%field, "non-string stream value skipped: {e}"),
                }
            }
            records.push(EventRecord {
                id: entry.id,
                fields,
            });
        }
    }
    records
}

impl EventSink for RedisStream {
    async fn append(
        &mut self,
        stream: &str,
        fields: &[(String, String)],
    ) -> anyhow::Result<String> {
        let id: String = self
            .conn
            .xadd(stream, "*", fields)
            .await
            .context("XADD failed")?;
        Ok(id)
    }
}

impl EventSource for RedisStream {
    async fn ensure_group(&mut self, stream: &str, group: &str) -> anyhow::Result<()> {
        let created: redis::RedisResult<String> =
            self.conn.xgroup_create_mkstream(stream, group, "$").await;

        match created {
            Ok(_) => Ok(()),
            // The group surviving a restart is the normal case.
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e).context("XGROUP CREATE failed"),
        }
    }

    async fn read_new(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> anyhow::Result<Vec<EventRecord>> {
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block.as_millis() as usize);

        let reply: StreamReadReply = self
            .conn
            .xread_options(&[stream], &[">"], &opts)
            .await
            .context("XREADGROUP failed")?;

        Ok(records_from_reply(reply))
    }

    async fn read_pending(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> anyhow::Result<Vec<EventRecord>> {
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count);

        // Reading from id 0 inside a group returns this consumer's pending
        // entries rather than new ones.
        let reply: StreamReadReply = self
            .conn
            .xread_options(&[stream], &["0"], &opts)
            .await
            .context("XREADGROUP pending read failed")?;

        Ok(records_from_reply(reply))
    }

    async fn ack(&mut self, stream: &str, group: &str, id: &str) -> anyhow::Result<()> {
        let _: i64 = self
            .conn
            .xack(stream, group, &[id])
            .await
            .context("XACK failed")?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryStreamInner {
    next_id: u64,
    records: Vec<EventRecord>,
    /// group -> index of the next never-delivered record.
    cursors: HashMap<String, usize>,
    /// (group, consumer) -> pending record ids.
    pending: HashMap<(String, String), Vec<String>>,
}

/// In-memory stand-in for the stream, shared by clone.
#[derive(Clone, Default)]
pub struct MemoryStream {
    inner: Arc<Mutex<MemoryStreamInner>>,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record ever appended, in order.
    pub fn records(&self) -> Vec<EventRecord> {
        self.inner.lock().records.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unacknowledged ids for a consumer, for assertions.
    pub fn pending(&self, group: &str, consumer: &str) -> Vec<String> {
        self.inner
            .lock()
            .pending
            .get(&(group.to_owned(), consumer.to_owned()))
            .cloned()
            .unwrap_or_default()
    }
}

impl EventSink for MemoryStream {
    async fn append(
        &mut self,
        _stream: &str,
        fields: &[(String, String)],
    ) -> anyhow::Result<String> {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = format!("{}-0", inner.next_id);
        inner.records.push(EventRecord {
            id: id.clone(),
            fields: fields.iter().cloned().collect(),
        });
        Ok(id)
    }
}

impl EventSource for MemoryStream {
    async fn ensure_group(&mut self, _stream: &str, group: &str) -> anyhow::Result<()> {
        self.inner.lock().cursors.entry(group.to_owned()).or_insert(0);
        Ok(())
    }

    async fn read_new(
        &mut self,
        _stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        _block: Duration,
    ) -> anyhow::Result<Vec<EventRecord>> {
        let mut inner = self.inner.lock();
        let cursor = *inner.cursors.get(group).unwrap_or(&0);
        let records: Vec<EventRecord> = inner
            .records
            .iter()
            .skip(cursor)
            .take(count)
            .cloned()
            .collect();

        inner
            .cursors
            .insert(group.to_owned(), cursor + records.len());
        let pending = inner
            .pending
            .entry((group.to_owned(), consumer.to_owned()))
            .or_default();
        pending.extend(records.iter().map(|r| r.id.clone()));

        Ok(records)
    }

    async fn read_pending(
        &mut self,
        _stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> anyhow::Result<Vec<EventRecord>> {
        let inner = self.inner.lock();
        let Some(ids) = inner.pending.get(&(group.to_owned(), consumer.to_owned())) else {
            return Ok(Vec::new());
        };

        Ok(inner
            .records
            .iter()
            .filter(|r| ids.contains(&r.id))
            .take(count)
            .cloned()
            .collect())
    }

    async fn ack(&mut self, _stream: &str, group: &str, id: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        for ((g, _), ids) in inner.pending.iter_mut() {
            if g == group {
                ids.retain(|i| i != id);
            }
        }
        Ok(())
    }
}
