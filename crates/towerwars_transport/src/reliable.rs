//! The reliable-ordered channel state machine, independent of sockets so it
//! can be driven directly in tests.
//!
//! Sequences start at 1 on both sides. The receiver delivers strictly in
//! order, buffering out-of-order segments; the sender keeps a bounded
//! in-flight window, resending on a doubling timer until acknowledged.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;
use thiserror::Error;

use crate::datagram::AckPayload;

/// Maximum unacknowledged datagrams in flight before sends queue locally.
pub const SEND_WINDOW: usize = 256;

/// Base resend delay; doubles per attempt.
pub const RESEND_TIMEOUT: Duration = Duration::from_millis(200);

/// A datagram resent this many times without an ack tears the peer down.
pub const MAX_RESEND_ATTEMPTS: u32 = 10;

#[derive(Copy, Clone, PartialEq, Eq, Debug, Error)]
#[error("reliable delivery failed after {MAX_RESEND_ATTEMPTS} attempts")]
pub struct DeliveryFailed;

#[derive(Debug)]
struct InFlight {
    seq: u32,
    payload: Bytes,
    last_sent: Instant,
    attempts: u32,
}

/// One direction pair of the reliable channel for a single peer.
#[derive(Debug)]
pub struct ReliableChannel {
    next_send_seq: u32,
    in_flight: VecDeque<InFlight>,
    /// Sends beyond the window, waiting for acks to free slots.
    queued: VecDeque<Bytes>,

    /// Next sequence to deliver to the application.
    expected_seq: u32,
    out_of_order: BTreeMap<u32, Bytes>,
    ack_dirty: bool,
}

impl Default for ReliableChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ReliableChannel {
    pub fn new() -> Self {
        Self {
            next_send_seq: 1,
            in_flight: VecDeque::new(),
            queued: VecDeque::new(),
            expected_seq: 1,
            out_of_order: BTreeMap::new(),
            ack_dirty: false,
        }
    }

    /// Queues `payload` for delivery. Returns the datagrams (seq, payload)
    /// to put on the wire right now.
    pub fn send(&mut self, payload: Bytes, now: Instant) -> Vec<(u32, Bytes)> {
        self.queued.push_back(payload);
        self.fill_window(now)
    }

    fn fill_window(&mut self, now: Instant) -> Vec<(u32, Bytes)> {
        let mut out = Vec::new();
        while self.in_flight.len() < SEND_WINDOW {
            let Some(payload) = self.queued.pop_front() else {
                break;
            };
            let seq = self.next_send_seq;
            self.next_send_seq += 1;
            self.in_flight.push_back(InFlight {
                seq,
                payload: payload.clone(),
                last_sent: now,
                attempts: 1,
            });
            out.push((seq, payload));
        }
        out
    }

    /// Handles an incoming reliable datagram. Returns the payloads now
    /// deliverable in order.
    pub fn on_datagram(&mut self, seq: u32, payload: Bytes) -> Vec<Bytes> {
        self.ack_dirty = true;

        if seq < self.expected_seq {
            // Duplicate; the ack we owe will quiet the sender.
            return Vec::new();
        }

        if seq > self.expected_seq {
            self.out_of_order.entry(seq).or_insert(payload);
            return Vec::new();
        }

        let mut delivered = vec![payload];
        self.expected_seq += 1;
        while let Some(next) = self.out_of_order.remove(&self.expected_seq) {
            delivered.push(next);
            self.expected_seq += 1;
        }
        delivered
    }

    /// Handles an acknowledgement. Returns datagrams released from the
    /// local queue into the freed window.
    pub fn on_ack(&mut self, ack: AckPayload, now: Instant) -> Vec<(u32, Bytes)> {
        self.in_flight.retain(|f| !ack.covers(f.seq));
        self.fill_window(now)
    }

    /// Scans for datagrams due for resend. Errors if any datagram has
    /// exhausted its attempts.
    pub fn poll_resend(&mut self, now: Instant) -> Result<Vec<(u32, Bytes)>, DeliveryFailed> {
        let mut out = Vec::new();
        for f in &mut self.in_flight {
            let backoff = RESEND_TIMEOUT * 2u32.pow(f.attempts.min(6) - 1);
            if now.duration_since(f.last_sent) >= backoff {
                if f.attempts >= MAX_RESEND_ATTEMPTS {
                    return Err(DeliveryFailed);
                }
                f.attempts += 1;
                f.last_sent = now;
                out.push((f.seq, f.payload.clone()));
            }
        }
        Ok(out)
    }

    /// The acknowledgement owed to the remote, if receipt state changed
    /// since the last call.
    pub fn take_ack(&mut self) -> Option<AckPayload> {
        if !self.ack_dirty {
            return None;
        }
        self.ack_dirty = false;

        let cumulative = self.expected_seq - 1;
        let mut bits = 0u32;
        for seq in self.out_of_order.keys() {
            let offset = seq - cumulative;
            if (1..=32).contains(&offset) {
                bits |= 1 << (offset - 1);
            }
        }

        Some(AckPayload { cumulative, bits })
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }
}

/// Stale-drop filter for the unreliable channel.
#[derive(Debug, Default)]
pub struct UnreliableChannel {
    next_send_seq: u32,
    latest_recv_seq: u32,
}

impl UnreliableChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_seq(&mut self) -> u32 {
        self.next_send_seq += 1;
        self.next_send_seq
    }

    /// True if the datagram is fresh; stale (reordered-behind) sequences
    /// are dropped.
    pub fn accept(&mut self, seq: u32) -> bool {
        if seq > self.latest_recv_seq {
            self.latest_recv_seq = seq;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(n: u8) -> Bytes {
        Bytes::from(vec![n])
    }

    #[test]
    fn in_order_delivery() {
        let mut ch = ReliableChannel::new();

        assert_eq!(ch.on_datagram(1, payload(1)), vec![payload(1)]);
        assert_eq!(ch.on_datagram(2, payload(2)), vec![payload(2)]);
    }

    #[test]
    fn reorder_buffers_until_gap_fills() {
        let mut ch = ReliableChannel::new();

        assert!(ch.on_datagram(2, payload(2)).is_empty());
        assert!(ch.on_datagram(3, payload(3)).is_empty());
        assert_eq!(
            ch.on_datagram(1, payload(1)),
            vec![payload(1), payload(2), payload(3)]
        );
    }

    #[test]
    fn duplicates_are_suppressed() {
        let mut ch = ReliableChannel::new();

        assert_eq!(ch.on_datagram(1, payload(1)).len(), 1);
        assert!(ch.on_datagram(1, payload(1)).is_empty());

        let ack = ch.take_ack().unwrap();
        assert_eq!(ack.cumulative, 1);
        assert_eq!(ack.bits, 0);
    }

    #[test]
    fn ack_reports_out_of_order_bits() {
        let mut ch = ReliableChannel::new();

        ch.on_datagram(1, payload(1));
        ch.on_datagram(3, payload(3));
        ch.on_datagram(5, payload(5));

        let ack = ch.take_ack().unwrap();
        assert_eq!(ack.cumulative, 1);
        assert!(ack.covers(3));
        assert!(ack.covers(5));
        assert!(!ack.covers(2));
        assert!(!ack.covers(4));
    }

    #[test]
    fn window_limits_in_flight() {
        let mut ch = ReliableChannel::new();
        let now = Instant::now();

        for i in 0..SEND_WINDOW + 10 {
            ch.send(payload(i as u8), now);
        }
        assert_eq!(ch.in_flight_len(), SEND_WINDOW);

        // Acking the first 10 releases the queued tail.
        let released = ch.on_ack(
            AckPayload {
                cumulative: 10,
                bits: 0,
            },
            now,
        );
        assert_eq!(released.len(), 10);
        assert_eq!(ch.in_flight_len(), SEND_WINDOW);
    }

    #[test]
    fn resend_after_timeout_then_give_up() {
        let mut ch = ReliableChannel::new();
        let start = Instant::now();

        ch.send(payload(1), start);
        assert!(ch.poll_resend(start).unwrap().is_empty());

        let mut t = start;
        for _ in 1..MAX_RESEND_ATTEMPTS {
            t += Duration::from_secs(60);
            assert_eq!(ch.poll_resend(t).unwrap().len(), 1);
        }

        t += Duration::from_secs(60);
        assert!(ch.poll_resend(t).is_err());
    }

    #[test]
    fn ack_stops_resends(){
        let mut ch = ReliableChannel::new();
        let start = Instant::now();

        ch.send(payload(1), start);
        ch.on_ack(
            AckPayload {
                cumulative: 1,
                bits: 0,
            },
            start,
        );

        assert!(ch
            .poll_resend(start + Duration::from_secs(5))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn unreliable_drops_stale() {
        let mut ch = UnreliableChannel::new();

        assert!(ch.accept(1));
        assert!(ch.accept(5));
        assert!(!ch.accept(3));
        assert!(!ch.accept(5));
        assert!(ch.accept(6));
    }
}
