//! Connection-oriented UDP transport for the zone server.
//!
//! A single tokio task owns the socket, the peer table and every
//! retransmission timer. The game loop thread never touches the socket: it
//! pushes commands and drains [`TransportEvent`]s over flume channels, once
//! per outer loop iteration, via [`UdpTransport::poll`].
//!
//! Reliable datagrams are delivered in order per peer; unreliable datagrams
//! may be dropped or reordered and carry only the high-rate state
//! broadcasts.

pub mod datagram;
pub mod reliable;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use flume::{Receiver, Sender};
use tokio::net::UdpSocket;
use tracing::{debug, error, info, trace, warn};

use towerwars_protocol::types::DisconnectReason;
use towerwars_protocol::{Decode, Encode, Message, PacketDecoder, PacketEncoder};

use crate::datagram::{AckPayload, Channel, Control, DatagramHeader, SOFT_MTU};
use crate::reliable::{ReliableChannel, UnreliableChannel};

/// Disconnect peers that have been silent this long.
pub const PEER_TIMEOUT: Duration = Duration::from_secs(10);

/// Send a transport keep-alive after this much send silence.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(2500);

/// Interval of the resend / keep-alive / timeout sweep.
const SWEEP_INTERVAL: Duration = Duration::from_millis(50);

/// A connected UDP endpoint, stable for the peer's lifetime.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct PeerId(pub u32);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// What the transport surfaces to the game loop.
#[derive(Clone, Debug)]
pub enum TransportEvent {
    PeerConnected(PeerId),
    PeerDisconnected(PeerId, DisconnectReason),
    Packet(PeerId, Message),
}

enum Command {
    Send {
        peer: PeerId,
        reliable: bool,
        frame: Bytes,
    },
    SendMany {
        peers: Vec<PeerId>,
        reliable: bool,
        frame: Bytes,
    },
    Disconnect {
        peer: PeerId,
        reason: DisconnectReason,
    },
    Shutdown,
}

/// Handle to the transport, owned by the game loop thread.
pub struct UdpTransport {
    cmd_tx: Sender<Command>,
    event_rx: Receiver<TransportEvent>,
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Binds the socket and spawns the socket task on `handle`.
    pub fn bind(addr: SocketAddr, handle: &tokio::runtime::Handle) -> anyhow::Result<Self> {
        let socket = std::net::UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;

        let (cmd_tx, cmd_rx) = flume::unbounded();
        let (event_tx, event_rx) = flume::unbounded();

        handle.spawn(socket_task(socket, cmd_rx, event_tx));

        info!(%local_addr, "transport bound");

        Ok(Self {
            cmd_tx,
            event_rx,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Drains every event surfaced since the last poll. Non-blocking.
    pub fn poll(&self) -> Vec<TransportEvent> {
        self.event_rx.drain().collect()
    }

    /// Sends `msg` on the reliable-ordered channel.
    pub fn send(&self, peer: PeerId, msg: &Message) {
        if let Some(frame) = encode_frame(msg) {
            self.command(Command::Send {
                peer,
                reliable: true,
                frame,
            });
        }
    }

    /// Sends `msg` fire-and-forget.
    pub fn send_unreliable(&self, peer: PeerId, msg: &Message) {
        if let Some(frame) = encode_frame(msg) {
            self.command(Command::Send {
                peer,
                reliable: false,
                frame,
            });
        }
    }

    /// Sends `msg` reliably to every peer in `peers`, encoding once.
    pub fn broadcast(&self, peers: &[PeerId], msg: &Message) {
        if peers.is_empty() {
            return;
        }
        if let Some(frame) = encode_frame(msg) {
            self.command(Command::SendMany {
                peers: peers.to_vec(),
                reliable: true,
                frame,
            });
        }
    }

    /// Sends `msg` unreliably to every peer in `peers`, encoding once.
    pub fn broadcast_unreliable(&self, peers: &[PeerId], msg: &Message) {
        if peers.is_empty() {
            return;
        }
        if let Some(frame) = encode_frame(msg) {
            self.command(Command::SendMany {
                peers: peers.to_vec(),
                reliable: false,
                frame,
            });
        }
    }

    /// Tears a peer down, notifying it of `reason`. Idempotent: unknown
    /// peers are ignored. A `PeerDisconnected` event is surfaced on the
    /// next poll.
    pub fn disconnect(&self, peer: PeerId, reason: DisconnectReason) {
        self.command(Command::Disconnect { peer, reason });
    }

    /// Notifies every peer of shutdown and stops the socket task.
    pub fn shutdown(&self) {
        self.command(Command::Shutdown);
    }

    fn command(&self, cmd: Command) {
        if self.cmd_tx.send(cmd).is_err() {
            debug!("socket task is gone; command dropped");
        }
    }
}

fn encode_frame(msg: &Message) -> Option<Bytes> {
    let mut enc = PacketEncoder::new();
    match enc.append_message(msg) {
        Ok(()) => Some(enc.take().freeze()),
        Err(e) => {
            error!("failed to encode {}: {e:#}", msg.name());
            None
        }
    }
}

struct PeerState {
    addr: SocketAddr,
    reliable: ReliableChannel,
    unreliable: UnreliableChannel,
    last_recv: Instant,
    last_send: Instant,
}

impl PeerState {
    fn new(addr: SocketAddr, now: Instant) -> Self {
        Self {
            addr,
            reliable: ReliableChannel::new(),
            unreliable: UnreliableChannel::new(),
            last_recv: now,
            last_send: now,
        }
    }
}

struct SocketTask {
    socket: UdpSocket,
    event_tx: Sender<TransportEvent>,
    peers: HashMap<u32, PeerState>,
    by_addr: HashMap<SocketAddr, u32>,
    next_peer_id: u32,
}

async fn socket_task(
    socket: std::net::UdpSocket,
    cmd_rx: Receiver<Command>,
    event_tx: Sender<TransportEvent>,
) {
    let socket = match UdpSocket::from_std(socket) {
        Ok(socket) => socket,
        Err(e) => {
            error!("failed to register socket with the runtime: {e}");
            return;
        }
    };

    let mut task = SocketTask {
        socket,
        event_tx,
        peers: HashMap::new(),
        by_addr: HashMap::new(),
        next_peer_id: 1,
    };

    let mut buf = vec![0u8; 65536];
    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);

    loop {
        tokio::select! {
            recv = task.socket.recv_from(&mut buf) => match recv {
                Ok((len, addr)) => task.handle_datagram(addr, &buf[..len]).await,
                // Spurious errors (e.g. ICMP port unreachable on some
                // platforms) must not kill the socket.
                Err(e) => trace!("recv_from error: {e}"),
            },
            cmd = cmd_rx.recv_async() => match cmd {
                Ok(Command::Send { peer, reliable, frame }) => {
                    task.send_frame(peer, reliable, frame).await;
                }
                Ok(Command::SendMany { peers, reliable, frame }) => {
                    for peer in peers {
                        task.send_frame(peer, reliable, frame.clone()).await;
                    }
                }
                Ok(Command::Disconnect { peer, reason }) => {
                    task.disconnect(peer, reason).await;
                }
                Ok(Command::Shutdown) | Err(_) => break,
            },
            _ = sweep.tick() => task.sweep().await,
        }
    }

    let ids: Vec<u32> = task.peers.keys().copied().collect();
    for id in ids {
        task.disconnect(PeerId(id), DisconnectReason::ServerShutdown)
            .await;
    }
    info!("socket task stopped");
}

impl SocketTask {
    async fn handle_datagram(&mut self, addr: SocketAddr, data: &[u8]) {
        let mut r = data;
        let header = match DatagramHeader::decode(&mut r) {
            Ok(header) => header,
            Err(e) => {
                trace!(%addr, "dropping malformed datagram: {e}");
                return;
            }
        };

        if header.channel == Channel::Control {
            self.handle_control(addr, header, r).await;
            return;
        }

        let Some(&peer_id) = self.by_addr.get(&addr) else {
            trace!(%addr, "dropping datagram from unknown address");
            return;
        };

        // Clients echo their assigned id once they have it; zero is legal
        // only until the syn-ack arrives.
        if header.conn_id != 0 && header.conn_id != peer_id {
            trace!(%addr, "dropping datagram with mismatched connection id");
            return;
        }

        let now = Instant::now();
        let Some(peer) = self.peers.get_mut(&peer_id) else {
            return;
        };
        peer.last_recv = now;

        match header.channel {
            Channel::Reliable => {
                let payloads = peer
                    .reliable
                    .on_datagram(header.seq, Bytes::copy_from_slice(r));
                let ack = peer.reliable.take_ack();

                if let Some(ack) = ack {
                    self.send_ack(peer_id, ack).await;
                }
                for payload in payloads {
                    self.deliver(peer_id, &payload).await;
                }
            }
            Channel::Unreliable => {
                if peer.unreliable.accept(header.seq) {
                    let payload = Bytes::copy_from_slice(r);
                    self.deliver(peer_id, &payload).await;
                }
            }
            Channel::Ack => {
                let Ok(ack) = AckPayload::decode(&mut r) else {
                    trace!(%addr, "dropping malformed ack");
                    return;
                };
                let released = peer.reliable.on_ack(ack, now);
                for (seq, payload) in released {
                    self.send_raw(peer_id, Channel::Reliable, seq, &payload)
                        .await;
                }
            }
            Channel::Control => unreachable!(),
        }
    }

    async fn handle_control(&mut self, addr: SocketAddr, header: DatagramHeader, mut r: &[u8]) {
        let control = match Control::decode(&mut r) {
            Ok(control) => control,
            Err(e) => {
                trace!(%addr, "dropping malformed control datagram: {e}");
                return;
            }
        };

        match control {
            Control::Syn => {
                let peer_id = match self.by_addr.get(&addr) {
                    // Retransmitted syn; our syn-ack was lost.
                    Some(&id) => id,
                    None => {
                        let id = self.next_peer_id;
                        self.next_peer_id += 1;
                        self.peers.insert(id, PeerState::new(addr, Instant::now()));
                        self.by_addr.insert(addr, id);
                        debug!(%addr, peer = %PeerId(id), "peer connected");
                        self.emit(TransportEvent::PeerConnected(PeerId(id)));
                        id
                    }
                };
                self.send_control(PeerId(peer_id), Control::SynAck { peer_id })
                    .await;
            }
            Control::SynAck { .. } => {
                trace!(%addr, "ignoring syn-ack on the accepting side");
            }
            Control::Disconnect { reason } => {
                let Some(&peer_id) = self.by_addr.get(&addr) else {
                    return;
                };
                if header.conn_id != 0 && header.conn_id != peer_id {
                    return;
                }
                self.remove_peer(PeerId(peer_id), reason);
            }
            Control::KeepAlive => {
                if let Some(&peer_id) = self.by_addr.get(&addr) {
                    if let Some(peer) = self.peers.get_mut(&peer_id) {
                        peer.last_recv = Instant::now();
                    }
                }
            }
        }
    }

    /// Decodes every frame in a delivered payload and surfaces it.
    async fn deliver(&mut self, peer_id: u32, payload: &[u8]) {
        let mut dec = PacketDecoder::new();
        dec.queue_slice(payload);

        loop {
            match dec.try_next_packet() {
                Ok(Some(frame)) => match frame.decode_message() {
                    Ok(msg) => self.emit(TransportEvent::Packet(PeerId(peer_id), msg)),
                    Err(e) => {
                        warn!(peer = %PeerId(peer_id), "malformed packet: {e:#}");
                        self.disconnect(PeerId(peer_id), DisconnectReason::Kicked)
                            .await;
                        return;
                    }
                },
                Ok(None) => return,
                Err(e) => {
                    warn!(peer = %PeerId(peer_id), "malformed frame: {e:#}");
                    self.disconnect(PeerId(peer_id), DisconnectReason::Kicked)
                        .await;
                    return;
                }
            }
        }
    }

    async fn send_frame(&mut self, peer: PeerId, reliable: bool, frame: Bytes) {
        let now = Instant::now();
        let Some(state) = self.peers.get_mut(&peer.0) else {
            trace!(%peer, "send to unknown peer dropped");
            return;
        };

        if reliable {
            let to_wire = state.reliable.send(frame, now);
            for (seq, payload) in to_wire {
                self.send_raw(peer.0, Channel::Reliable, seq, &payload).await;
            }
        } else {
            let seq = state.unreliable.next_seq();
            self.send_raw(peer.0, Channel::Unreliable, seq, &frame).await;
        }
    }

    async fn send_ack(&mut self, peer_id: u32, ack: AckPayload) {
        let mut payload = Vec::with_capacity(8);
        if ack.encode(&mut payload).is_ok() {
            self.send_raw(peer_id, Channel::Ack, 0, &payload).await;
        }
    }

    async fn send_control(&mut self, peer: PeerId, control: Control) {
        let mut payload = Vec::with_capacity(8);
        if control.encode(&mut payload).is_ok() {
            self.send_raw(peer.0, Channel::Control, 0, &payload).await;
        }
    }

    async fn send_raw(&mut self, peer_id: u32, channel: Channel, seq: u32, payload: &[u8]) {
        let Some(state) = self.peers.get_mut(&peer_id) else {
            return;
        };

        let header = DatagramHeader {
            conn_id: peer_id,
            channel,
            seq,
        };

        let mut buf = Vec::with_capacity(DatagramHeader::SIZE + payload.len());
        if let Err(e) = header.encode(&mut buf) {
            error!("failed to encode datagram header: {e:#}");
            return;
        }
        buf.extend_from_slice(payload);

        if buf.len() > SOFT_MTU {
            debug!(
                peer = %PeerId(peer_id),
                len = buf.len(),
                "datagram exceeds soft MTU; relying on IP fragmentation"
            );
        }

        state.last_send = Instant::now();
        let addr = state.addr;
        if let Err(e) = self.socket.send_to(&buf, addr).await {
            trace!(peer = %PeerId(peer_id), "send_to failed: {e}");
        }
    }

    async fn sweep(&mut self) {
        let now = Instant::now();
        let mut resends: Vec<(u32, u32, Bytes)> = Vec::new();
        let mut keepalives: Vec<PeerId> = Vec::new();
        let mut dead: Vec<PeerId> = Vec::new();
        let mut acks: Vec<(u32, AckPayload)> = Vec::new();

        for (&id, peer) in &mut self.peers {
            if now.duration_since(peer.last_recv) > PEER_TIMEOUT {
                dead.push(PeerId(id));
                continue;
            }

            match peer.reliable.poll_resend(now) {
                Ok(due) => {
                    for (seq, payload) in due {
                        resends.push((id, seq, payload));
                    }
                }
                Err(_) => {
                    dead.push(PeerId(id));
                    continue;
                }
            }

            if let Some(ack) = peer.reliable.take_ack() {
                acks.push((id, ack));
            }

            if now.duration_since(peer.last_send) > KEEPALIVE_INTERVAL {
                keepalives.push(PeerId(id));
            }
        }

        for peer in dead {
            debug!(%peer, "peer timed out");
            self.disconnect(peer, DisconnectReason::Timeout).await;
        }
        for (id, seq, payload) in resends {
            self.send_raw(id, Channel::Reliable, seq, &payload).await;
        }
        for (id, ack) in acks {
            self.send_ack(id, ack).await;
        }
        for peer in keepalives {
            self.send_control(peer, Control::KeepAlive).await;
        }
    }

    async fn disconnect(&mut self, peer: PeerId, reason: DisconnectReason) {
        if !self.peers.contains_key(&peer.0) {
            return;
        }
        self.send_control(peer, Control::Disconnect { reason }).await;
        self.remove_peer(peer, reason);
    }

    fn remove_peer(&mut self, peer: PeerId, reason: DisconnectReason) {
        if let Some(state) = self.peers.remove(&peer.0) {
            self.by_addr.remove(&state.addr);
            debug!(%peer, ?reason, "peer disconnected");
            self.emit(TransportEvent::PeerDisconnected(peer, reason));
        }
    }

    fn emit(&self, event: TransportEvent) {
        if self.event_tx.send(event).is_err() {
            trace!("event receiver is gone");
        }
    }
}
