//! The send/broadcast capabilities handed to sessions.
//!
//! Sessions never name the transport type; they hold a [`PacketSink`] and
//! nothing else. The real implementation forwards to the UDP transport;
//! tests substitute a recorder.

use towerwars_protocol::Message;
use towerwars_transport::{PeerId, UdpTransport};

pub trait PacketSink: Send + Sync + 'static {
    fn send(&self, peer: PeerId, msg: Message);
    fn send_unreliable(&self, peer: PeerId, msg: Message);
    fn broadcast(&self, peers: &[PeerId], msg: Message);
    fn broadcast_unreliable(&self, peers: &[PeerId], msg: Message);
}

impl PacketSink for UdpTransport {
    fn send(&self, peer: PeerId, msg: Message) {
        UdpTransport::send(self, peer, &msg);
    }

    fn send_unreliable(&self, peer: PeerId, msg: Message) {
        UdpTransport::send_unreliable(self, peer, &msg);
    }

    fn broadcast(&self, peers: &[PeerId], msg: Message) {
        UdpTransport::broadcast(self, peers, &msg);
    }

    fn broadcast_unreliable(&self, peers: &[PeerId], msg: Message) {
        UdpTransport::broadcast_unreliable(self, peers, &msg);
    }
}

/// Test doubles shared by the unit tests here and the integration suite.
pub mod testing {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use towerwars_protocol::Message;
    use towerwars_transport::PeerId;

    use super::PacketSink;

    /// One captured outbound packet.
    #[derive(Clone, Debug)]
    pub struct SentPacket {
        pub peer: PeerId,
        pub msg: Message,
        pub reliable: bool,
    }

    /// Records everything sent through it.
    #[derive(Clone, Default)]
    pub struct RecordingSink {
        sent: Arc<Mutex<Vec<SentPacket>>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sent(&self) -> Vec<SentPacket> {
            self.sent.lock().clone()
        }

        pub fn clear(&self) {
            self.sent.lock().clear();
        }

        /// Packets delivered to `peer`, in order.
        pub fn sent_to(&self, peer: PeerId) -> Vec<Message> {
            self.sent
                .lock()
                .iter()
                .filter(|p| p.peer == peer)
                .map(|p| p.msg.clone())
                .collect()
        }

        fn push(&self, peer: PeerId, msg: Message, reliable: bool) {
            self.sent.lock().push(SentPacket {
                peer,
                msg,
                reliable,
            });
        }
    }

    impl PacketSink for RecordingSink {
        fn send(&self, peer: PeerId, msg: Message) {
            self.push(peer, msg, true);
        }

        fn send_unreliable(&self, peer: PeerId, msg: Message) {
            self.push(peer, msg, false);
        }

        fn broadcast(&self, peers: &[PeerId], msg: Message) {
            for &peer in peers {
                self.push(peer, msg.clone(), true);
            }
        }

        fn broadcast_unreliable(&self, peers: &[PeerId], msg: Message) {
            for &peer in peers {
                self.push(peer, msg.clone(), false);
            }
        }
    }
}
