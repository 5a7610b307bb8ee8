//! Wire codec and packet catalog for the TowerWars zone protocol.
//!
//! Everything on the wire is little-endian. A packet is framed as a one-byte
//! type tag, a [`VarUint`] body length, and the body itself. Packet bodies
//! have a fixed, hand-defined layout: every packet struct in [`packets`]
//! implements [`Encode`] and [`Decode`] by hand, and the tagged [`Message`]
//! enum is the dispatch table over the whole catalog.

use std::io::Write;

pub mod codec;
pub mod delta;
mod impls;
pub mod packet;
pub mod packets;
pub mod stats;
pub mod types;
pub mod var_uint;

pub use codec::{PacketDecoder, PacketEncoder, PacketFrame};
pub use delta::{DeltaFlags, EntityDelta};
pub use packet::{Message, Packet, PacketSide};
pub use types::{
    DamageType, DestroyReason, DisconnectReason, EntityData, EntityState, ErrorCode, GameMode,
    ItemType, MatchResult, Rarity, TowerKind, UnitKind, UnitModifiers,
};
pub use var_uint::VarUint;
pub use {anyhow, bytes, uuid};

/// The maximum number of bytes in a single packet frame (tag and length
/// prefix excluded).
pub const MAX_FRAME_SIZE: usize = 65536;

/// The maximum encoded byte length of any string field.
pub const MAX_STRING_SIZE: usize = 4096;

/// The zone protocol version this library currently targets. Exchanged in
/// `Connect`; a mismatch is terminal.
pub const PROTOCOL_VERSION: u16 = 3;

/// The UDP port the zone server binds by default.
pub const DEFAULT_PORT: u16 = 7100;

/// Fixed simulation ticks per second.
pub const TICK_RATE: u32 = 20;

/// The `Encode` trait allows objects to be written to the zone protocol.
/// It is the inverse of [`Decode`].
///
/// Fields are encoded in the order they appear in the type definition, with
/// no padding or alignment. If a type also implements [`Decode`], a
/// successful `encode` must round-trip through `decode`, consuming exactly
/// the bytes that were written.
pub trait Encode {
    /// Writes this object to the provided writer.
    fn encode(&self, w: impl Write) -> anyhow::Result<()>;
}

/// The `Decode` trait allows objects to be read from the zone protocol. It
/// is the inverse of [`Encode`].
///
/// `Decode` is parameterized by a lifetime so decoded values can borrow from
/// the byte slice they were read from.
pub trait Decode<'a>: Sized {
    /// Reads this object from the provided byte slice.
    ///
    /// Implementations are expected to shrink the slice from the front as
    /// bytes are read.
    fn decode(r: &mut &'a [u8]) -> anyhow::Result<Self>;
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use glam::Vec2;
    use uuid::Uuid;

    use super::*;
    use crate::packets::game_s2c::{EntitySpawnS2c, ErrorS2c};
    use crate::packets::handshake::{ConnectAckS2c, ConnectC2s, PongS2c};
    use crate::types::{EntityData, EntityState, ErrorCode, Rarity, UnitKind, UnitModifiers};

    fn roundtrip(msg: &Message) -> Message {
        let mut enc = PacketEncoder::new();
        enc.append_message(msg).unwrap();

        let mut dec = PacketDecoder::new();
        dec.queue_bytes(enc.take());

        let frame = dec.try_next_packet().unwrap().unwrap();
        frame.decode_message().unwrap()
    }

    #[test]
    fn connect_round_trip() {
        let msg = Message::Connect(ConnectC2s {
            protocol_version: PROTOCOL_VERSION,
            connection_token: "sixteen-byte-token-of-fate".into(),
        });

        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn partial_frames_wait_for_more_data() {
        let mut enc = PacketEncoder::new();
        enc.append_message(&Message::Pong(PongS2c {
            client_time: 7,
            server_time: 9,
        }))
        .unwrap();
        let bytes = enc.take();

        let mut dec = PacketDecoder::new();
        for (i, chunk) in bytes.chunks(3).enumerate() {
            if i > 0 {
                assert!(dec.try_next_packet().unwrap().is_none());
            }
            dec.queue_slice(chunk);
        }

        let frame = dec.try_next_packet().unwrap().unwrap();
        let msg = frame.decode_message().unwrap();
        assert!(matches!(msg, Message::Pong(p) if p.client_time == 7 && p.server_time == 9));
    }

    #[test]
    fn multiple_frames_in_one_buffer() {
        let mut enc = PacketEncoder::new();
        let first = Message::ConnectAck(ConnectAckS2c {
            peer_id: 1,
            server_tick: 42,
            tick_rate: TICK_RATE as u8,
        });
        let second = Message::Error(ErrorS2c {
            code: ErrorCode::InsufficientGold,
            message: "not enough gold".into(),
            request_id: Some(3),
        });
        enc.append_message(&first).unwrap();
        enc.append_message(&second).unwrap();

        let mut dec = PacketDecoder::new();
        dec.queue_bytes(enc.take());

        let a = dec.try_next_packet().unwrap().unwrap();
        let b = dec.try_next_packet().unwrap().unwrap();
        assert!(dec.try_next_packet().unwrap().is_none());

        assert_eq!(a.decode_message().unwrap(), first);
        assert_eq!(b.decode_message().unwrap(), second);
    }

    #[test]
    fn entity_spawn_round_trip() {
        let msg = Message::EntitySpawn(EntitySpawnS2c {
            tick: 1200,
            entity: EntityState {
                entity_id: 17,
                position: Vec2::new(3.5, 2.5),
                hp: 80.0,
                max_hp: 120.0,
                data: EntityData::Unit {
                    kind: UnitKind::Tank,
                    rarity: Rarity::Magic,
                    modifiers: UnitModifiers::new().with_armored(true).with_shielded(true),
                    speed: 0.8,
                    direction: Vec2::new(1.0, 0.0),
                },
            },
        });

        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut body = Vec::new();
        Uuid::nil().encode(&mut body).unwrap();

        let frame = PacketFrame {
            tag: packet::tag::PLAYER_DATA_REQUEST,
            body: BytesMut::from(&body[..]),
        };

        assert!(frame.decode_message().is_err());
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let frame = PacketFrame {
            tag: 0xEE,
            body: BytesMut::new(),
        };

        assert!(frame.decode_message().is_err());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut dec = PacketDecoder::new();
        let mut bytes = vec![packet::tag::CHAT_MESSAGE];
        VarUint((MAX_FRAME_SIZE + 1) as u32)
            .encode(&mut bytes)
            .unwrap();
        dec.queue_slice(&bytes);

        assert!(dec.try_next_packet().is_err());
    }
}
