//! Packet framing: `[tag: u8][len: VarUint][body]`.

use anyhow::{bail, ensure};
use bytes::{Buf, BufMut, BytesMut};

use crate::packet::Message;
use crate::var_uint::{VarUint, VarUintDecodeError};
use crate::{Decode, Encode, Packet, MAX_FRAME_SIZE};

/// Encodes packets into a contiguous byte buffer, one frame per packet.
#[derive(Default)]
pub struct PacketEncoder {
    buf: BytesMut,
    scratch: Vec<u8>,
}

impl PacketEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_packet<P>(&mut self, pkt: &P) -> anyhow::Result<()>
    where
        P: Packet + Encode,
    {
        self.scratch.clear();
        pkt.encode(&mut self.scratch)?;
        self.append_frame(P::TAG)
    }

    pub fn append_message(&mut self, msg: &Message) -> anyhow::Result<()> {
        self.scratch.clear();
        msg.encode_body(&mut self.scratch)?;
        self.append_frame(msg.tag())
    }

    fn append_frame(&mut self, tag: u8) -> anyhow::Result<()> {
        ensure!(
            self.scratch.len() <= MAX_FRAME_SIZE,
            "frame of {} bytes exceeds maximum length",
            self.scratch.len()
        );

        let mut writer = (&mut self.buf).writer();
        tag.encode(&mut writer)?;
        VarUint(self.scratch.len() as u32).encode(&mut writer)?;
        self.buf.extend_from_slice(&self.scratch);
        Ok(())
    }

    /// Takes all the frames written so far.
    pub fn take(&mut self) -> BytesMut {
        self.buf.split()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Splits a byte stream back into packet frames, tolerating partial input.
#[derive(Default)]
pub struct PacketDecoder {
    buf: BytesMut,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next complete frame, or `None` if more bytes are needed.
    pub fn try_next_packet(&mut self) -> anyhow::Result<Option<PacketFrame>> {
        let mut r = &self.buf[..];

        let Some(tag) = r.first().copied() else {
            return Ok(None);
        };
        r = &r[1..];

        let body_len = match VarUint::decode_partial(&mut r) {
            Ok(len) => len as usize,
            Err(VarUintDecodeError::Incomplete) => return Ok(None),
            Err(VarUintDecodeError::TooLarge) => bail!("malformed frame length"),
        };

        ensure!(
            body_len <= MAX_FRAME_SIZE,
            "frame length of {body_len} is out of bounds"
        );

        if r.len() < body_len {
            // Not enough data arrived yet.
            return Ok(None);
        }

        let header_len = 1 + VarUint(body_len as u32).written_size();
        self.buf.advance(header_len);
        let body = self.buf.split_to(body_len);

        Ok(Some(PacketFrame { tag, body }))
    }

    pub fn queue_bytes(&mut self, bytes: BytesMut) {
        self.buf.unsplit(bytes);
    }

    pub fn queue_slice(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn take_capacity(&mut self) -> BytesMut {
        self.buf.split_off(self.buf.len())
    }

    pub fn reserve(&mut self, additional: usize) {
        self.buf.reserve(additional);
    }
}

/// One decoded frame: the leading tag and the undecoded body.
#[derive(Clone, Debug)]
pub struct PacketFrame {
    pub tag: u8,
    pub body: BytesMut,
}

impl PacketFrame {
    /// Attempts to decode this frame as packet type `P`. An error is
    /// returned if the tag does not match, the body fails to decode, or
    /// some input was missed.
    pub fn decode<'a, P>(&'a self) -> anyhow::Result<P>
    where
        P: Packet + Decode<'a>,
    {
        ensure!(
            P::TAG == self.tag,
            "packet tag mismatch while decoding '{}': expected {}, got {}",
            P::NAME,
            P::TAG,
            self.tag
        );

        let mut r = &self.body[..];
        let pkt = P::decode(&mut r)?;

        ensure!(
            r.is_empty(),
            "missed {} bytes while decoding '{}'",
            r.len(),
            P::NAME
        );

        Ok(pkt)
    }

    /// Decodes this frame through the full catalog dispatch table.
    pub fn decode_message(&self) -> anyhow::Result<Message> {
        let mut r = &self.body[..];
        let msg = Message::decode_body(self.tag, &mut r)?;

        ensure!(
            r.is_empty(),
            "missed {} bytes while decoding '{}'",
            r.len(),
            msg.name()
        );

        Ok(msg)
    }
}
