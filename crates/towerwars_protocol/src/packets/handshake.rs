//! Handshake and keep-alive packets, legal in any peer state.

use std::io::Write;

use crate::{Decode, Encode};

/// Opens a connection. The token was issued by the gateway over HTTP and is
/// redeemed against the shared store; the protocol version is checked
/// before anything else.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ConnectC2s {
    pub protocol_version: u16,
    pub connection_token: String,
}

impl Encode for ConnectC2s {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.protocol_version.encode(&mut w)?;
        self.connection_token.encode(w)
    }
}

impl Decode<'_> for ConnectC2s {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            protocol_version: u16::decode(r)?,
            connection_token: String::decode(r)?,
        })
    }
}

/// Accepts a connection, telling the peer its transport-assigned id and the
/// server's simulation cadence.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ConnectAckS2c {
    pub peer_id: u32,
    pub server_tick: u64,
    pub tick_rate: u8,
}

impl Encode for ConnectAckS2c {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.peer_id.encode(&mut w)?;
        self.server_tick.encode(&mut w)?;
        self.tick_rate.encode(w)
    }
}

impl Decode<'_> for ConnectAckS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            peer_id: u32::decode(r)?,
            server_tick: u64::decode(r)?,
            tick_rate: u8::decode(r)?,
        })
    }
}

/// The outcome of token validation.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AuthResponseS2c {
    pub success: bool,
    pub error: Option<String>,
}

impl Encode for AuthResponseS2c {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.success.encode(&mut w)?;
        self.error.encode(w)
    }
}

impl Decode<'_> for AuthResponseS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            success: bool::decode(r)?,
            error: Option::<String>::decode(r)?,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PingC2s {
    pub client_time: u64,
}

impl Encode for PingC2s {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        self.client_time.encode(w)
    }
}

impl Decode<'_> for PingC2s {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            client_time: u64::decode(r)?,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PongS2c {
    pub client_time: u64,
    pub server_time: u64,
}

impl Encode for PongS2c {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.client_time.encode(&mut w)?;
        self.server_time.encode(w)
    }
}

impl Decode<'_> for PongS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            client_time: u64::decode(r)?,
            server_time: u64::decode(r)?,
        })
    }
}
