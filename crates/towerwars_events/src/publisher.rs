//! Non-blocking event publishing.
//!
//! The tick thread calls [`EventPublisher::publish`], which only pushes
//! onto an unbounded queue; a tokio worker drains the queue into the
//! stream, retrying failed appends with backoff. The queue carries a soft
//! cap: crossing it raises an alarm counter and a log line but never blocks
//! or drops — losing events is worse than the memory spike, and the cap
//! crossing is the operator's signal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::stream::EventSink;
use crate::{EventEnvelope, GameEvent, STREAM_KEY};

/// Queue depth past which the publisher starts alarming.
pub const SOFT_CAP: usize = 65536;

const RETRY_BASE: Duration = Duration::from_millis(100);
const RETRY_MAX: Duration = Duration::from_secs(5);

/// Cloneable handle for emitting events from the tick thread.
#[derive(Clone)]
pub struct EventPublisher {
    tx: flume::Sender<EventEnvelope>,
    over_cap: Arc<AtomicU64>,
}

impl EventPublisher {
    /// Enqueues an event. Never blocks.
    pub fn publish(&self, match_id: uuid::Uuid, event: GameEvent) {
        self.publish_envelope(EventEnvelope::new(match_id, event));
    }

    pub fn publish_envelope(&self, envelope: EventEnvelope) {
        if self.tx.len() >= SOFT_CAP {
            let n = self.over_cap.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                queued = self.tx.len(),
                over_cap = n,
                "event queue exceeds soft cap"
            );
        }

        if self.tx.send(envelope).is_err() {
            debug!("publisher worker is gone; event dropped");
        }
    }

    /// How many publishes found the queue above [`SOFT_CAP`].
    pub fn over_cap_count(&self) -> u64 {
        self.over_cap.load(Ordering::Relaxed)
    }

    /// Number of events waiting to be appended.
    pub fn queued(&self) -> usize {
        self.tx.len()
    }
}

/// Spawns the drain worker on `handle` and returns the publish handle.
///
/// The worker exits once every publisher clone is dropped and the queue is
/// drained, so pending events flush on shutdown.
pub fn spawn_publisher<S: EventSink>(
    sink: S,
    handle: &tokio::runtime::Handle,
) -> EventPublisher {
    let (tx, rx) = flume::unbounded();
    handle.spawn(drain_queue(sink, rx));

    EventPublisher {
        tx,
        over_cap: Arc::new(AtomicU64::new(0)),
    }
}

async fn drain_queue<S: EventSink>(mut sink: S, rx: flume::Receiver<EventEnvelope>) {
    while let Ok(envelope) = rx.recv_async().await {
        let fields = match envelope.fields() {
            Ok(fields) => fields,
            Err(e) => {
                warn!("unencodable event dropped: {e:#}");
                continue;
            }
        };

        let mut backoff = RETRY_BASE;
        loop {
            match sink.append(STREAM_KEY, &fields).await {
                Ok(id) => {
                    debug!(
                        id,
                        event_type = envelope.event.event_type(),
                        "event appended"
                    );
                    break;
                }
                Err(e) => {
                    warn!("event append failed, retrying in {backoff:?}: {e:#}");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(RETRY_MAX);
                }
            }
        }
    }

    debug!("publisher drained and stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryStream;
    use crate::{GameEvent, PlayerDamaged};

    #[tokio::test]
    async fn events_reach_the_stream_in_order() {
        let stream = MemoryStream::new();
        let publisher = spawn_publisher(stream.clone(), &tokio::runtime::Handle::current());

        for damage in 1..=3u32 {
            publisher.publish(
                uuid::Uuid::nil(),
                GameEvent::PlayerDamaged(PlayerDamaged {
                    player_id: 0,
                    damage,
                    remaining_lives: 20 - damage,
                }),
            );
        }

        // Drop the handle so the worker drains and exits, then give it a
        // moment to run.
        drop(publisher);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let records = stream.records();
        assert_eq!(records.len(), 3);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(
                record.fields.get("event_type").map(String::as_str),
                Some("player.damaged")
            );
            assert_eq!(
                record.fields.get("Damage").map(String::as_str),
                Some((i as u32 + 1).to_string().as_str())
            );
        }
    }

    #[test]
    fn publish_never_blocks() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let publisher = spawn_publisher(MemoryStream::new(), runtime.handle());

        // Publishing from a thread with no runtime entered must work.
        publisher.publish(
            uuid::Uuid::nil(),
            GameEvent::GameResumed(crate::GameResumed {}),
        );

        assert_eq!(publisher.over_cap_count(), 0);
    }
}
