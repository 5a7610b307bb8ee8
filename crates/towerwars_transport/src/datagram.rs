//! Datagram layout: `[conn_id: u32][channel: u8][seq: u32]` followed by the
//! channel payload. Packet frames ride the unreliable and reliable
//! channels; the ack and control channels carry their own tiny payloads.

use std::io::Write;

use anyhow::bail;
use towerwars_protocol::types::DisconnectReason;
use towerwars_protocol::{Decode, Encode};

/// Soft MTU budget for one datagram. Larger datagrams are still sent (IP
/// fragmentation carries them) but are logged, since loss probability
/// rises with fragment count.
pub const SOFT_MTU: usize = 1200;

/// Delivery channel of a datagram.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Channel {
    /// Fire-and-forget packet frames. Stale sequences are dropped.
    Unreliable = 0,
    /// Ordered packet frames, acknowledged and resent until acked.
    Reliable = 1,
    /// Acknowledgement for the reliable channel.
    Ack = 2,
    /// Connection control: syn / syn-ack / disconnect / keep-alive.
    Control = 3,
}

impl Encode for Channel {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        (*self as u8).encode(w)
    }
}

impl Decode<'_> for Channel {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        match u8::decode(r)? {
            0 => Ok(Channel::Unreliable),
            1 => Ok(Channel::Reliable),
            2 => Ok(Channel::Ack),
            3 => Ok(Channel::Control),
            n => bail!("invalid channel byte {n}"),
        }
    }
}

/// The fixed datagram header.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct DatagramHeader {
    /// The receiver-assigned connection id; zero before `SynAck`.
    pub conn_id: u32,
    pub channel: Channel,
    /// Channel sequence number; zero on the ack and control channels.
    pub seq: u32,
}

impl DatagramHeader {
    pub const SIZE: usize = 9;
}

impl Encode for DatagramHeader {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.conn_id.encode(&mut w)?;
        self.channel.encode(&mut w)?;
        self.seq.encode(w)
    }
}

impl Decode<'_> for DatagramHeader {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            conn_id: u32::decode(r)?,
            channel: Channel::decode(r)?,
            seq: u32::decode(r)?,
        })
    }
}

/// Payload of a [`Channel::Control`] datagram.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Control {
    Syn,
    SynAck { peer_id: u32 },
    Disconnect { reason: DisconnectReason },
    KeepAlive,
}

impl Encode for Control {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        match self {
            Control::Syn => 0u8.encode(w),
            Control::SynAck { peer_id } => {
                1u8.encode(&mut w)?;
                peer_id.encode(w)
            }
            Control::Disconnect { reason } => {
                2u8.encode(&mut w)?;
                reason.encode(w)
            }
            Control::KeepAlive => 3u8.encode(w),
        }
    }
}

impl Decode<'_> for Control {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        match u8::decode(r)? {
            0 => Ok(Control::Syn),
            1 => Ok(Control::SynAck {
                peer_id: u32::decode(r)?,
            }),
            2 => Ok(Control::Disconnect {
                reason: DisconnectReason::decode(r)?,
            }),
            3 => Ok(Control::KeepAlive),
            n => bail!("invalid control byte {n}"),
        }
    }
}

/// Payload of a [`Channel::Ack`] datagram: the highest sequence delivered
/// in order, plus a bitfield for the 32 sequences after it.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct AckPayload {
    pub cumulative: u32,
    pub bits: u32,
}

impl AckPayload {
    /// True if `seq` is covered by this acknowledgement.
    pub fn covers(&self, seq: u32) -> bool {
        if seq <= self.cumulative {
            return seq > 0;
        }
        let offset = seq - self.cumulative;
        offset <= 32 && self.bits & (1 << (offset - 1)) != 0
    }
}

impl Encode for AckPayload {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.cumulative.encode(&mut w)?;
        self.bits.encode(w)
    }
}

impl Decode<'_> for AckPayload {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            cumulative: u32::decode(r)?,
            bits: u32::decode(r)?,
        })
    }
}
