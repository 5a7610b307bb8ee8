//! The tagged packet catalog: tag constants, the [`Packet`] trait, and the
//! [`Message`] enum that dispatches decoding over the whole catalog.

use std::io::Write;

use anyhow::bail;

use crate::packets::game_c2s::*;
use crate::packets::game_s2c::*;
use crate::packets::handshake::*;
use crate::packets::lobby::*;
use crate::{Decode, Encode};

/// The side a packet is intended for.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PacketSide {
    /// Server -> Client
    Clientbound,
    /// Client -> Server
    Serverbound,
}

/// Types considered to be zone protocol packets.
///
/// The [`Encode`] and [`Decode`] impls on `Self` cover only the packet
/// _body_; the leading tag and length prefix are the frame codec's job.
pub trait Packet: std::fmt::Debug {
    /// The leading tag byte of this packet.
    const TAG: u8;
    /// The name of this packet for debugging purposes.
    const NAME: &'static str;
    /// The side this packet is intended for.
    const SIDE: PacketSide;
}

macro_rules! packet_catalog {
    ($($const_name:ident = $tag:literal => $variant:ident($ty:ty): $side:ident;)+) => {
        /// Stable tag bytes, one per packet in the catalog.
        pub mod tag {
            $(pub const $const_name: u8 = $tag;)+
        }

        $(
            impl Packet for $ty {
                const TAG: u8 = tag::$const_name;
                const NAME: &'static str = stringify!($ty);
                const SIDE: PacketSide = PacketSide::$side;
            }

            impl From<$ty> for Message {
                fn from(pkt: $ty) -> Self {
                    Self::$variant(pkt)
                }
            }
        )+

        /// Every packet in the catalog as a tagged variant.
        #[derive(Clone, PartialEq, Debug)]
        pub enum Message {
            $($variant($ty),)+
        }

        impl Message {
            pub fn tag(&self) -> u8 {
                match self {
                    $(Self::$variant(_) => tag::$const_name,)+
                }
            }

            pub fn name(&self) -> &'static str {
                match self {
                    $(Self::$variant(_) => <$ty as Packet>::NAME,)+
                }
            }

            pub fn side(&self) -> PacketSide {
                match self {
                    $(Self::$variant(_) => <$ty as Packet>::SIDE,)+
                }
            }

            /// Encodes the packet body without the frame header.
            pub fn encode_body(&self, mut w: impl Write) -> anyhow::Result<()> {
                match self {
                    $(Self::$variant(pkt) => pkt.encode(&mut w),)+
                }
            }

            /// The dispatch table: decodes a frame body by tag.
            pub fn decode_body(tag: u8, r: &mut &[u8]) -> anyhow::Result<Self> {
                match tag {
                    $($tag => Ok(Self::$variant(<$ty>::decode(r)?)),)+
                    n => bail!("unknown packet tag {n}"),
                }
            }
        }
    };
}

packet_catalog! {
    // Handshake / keep-alive, peer state agnostic.
    CONNECT = 1 => Connect(ConnectC2s): Serverbound;
    CONNECT_ACK = 2 => ConnectAck(ConnectAckS2c): Clientbound;
    AUTH_RESPONSE = 3 => AuthResponse(AuthResponseS2c): Clientbound;
    PING = 4 => Ping(PingC2s): Serverbound;
    PONG = 5 => Pong(PongS2c): Clientbound;

    // Lobby, authenticated peers only.
    PLAYER_DATA_REQUEST = 16 => PlayerDataRequest(PlayerDataRequestC2s): Serverbound;
    PLAYER_TOWERS_RESPONSE = 17 => PlayerTowersResponse(PlayerTowersResponseS2c): Clientbound;
    PLAYER_ITEMS_RESPONSE = 18 => PlayerItemsResponse(PlayerItemsResponseS2c): Clientbound;
    REQUEST_MATCH = 19 => RequestMatch(RequestMatchC2s): Serverbound;
    REQUEST_MATCH_ACK = 20 => RequestMatchAck(RequestMatchAckS2c): Clientbound;
    RETURN_TO_LOBBY = 21 => ReturnToLobby(ReturnToLobbyS2c): Clientbound;

    // In-game, client to server.
    PLAYER_INPUT = 32 => PlayerInput(PlayerInputC2s): Serverbound;
    TOWER_BUILD = 33 => TowerBuild(TowerBuildC2s): Serverbound;
    TOWER_UPGRADE = 34 => TowerUpgrade(TowerUpgradeC2s): Serverbound;
    TOWER_SELL = 35 => TowerSell(TowerSellC2s): Serverbound;
    ABILITY_USE = 36 => AbilityUse(AbilityUseC2s): Serverbound;
    READY_STATE = 37 => ReadyState(ReadyStateC2s): Serverbound;
    CHAT_MESSAGE = 38 => ChatMessage(ChatMessageC2s): Serverbound;
    ITEM_COLLECT = 39 => ItemCollect(ItemCollectC2s): Serverbound;

    // In-game, server to clients.
    MATCH_START = 64 => MatchStart(MatchStartS2c): Clientbound;
    MATCH_END = 65 => MatchEnd(MatchEndS2c): Clientbound;
    WAVE_START = 66 => WaveStart(WaveStartS2c): Clientbound;
    WAVE_END = 67 => WaveEnd(WaveEndS2c): Clientbound;
    ENTITY_SPAWN = 68 => EntitySpawn(EntitySpawnS2c): Clientbound;
    ENTITY_DESTROY = 69 => EntityDestroy(EntityDestroyS2c): Clientbound;
    ENTITY_UPDATE = 70 => EntityUpdate(EntityUpdateS2c): Clientbound;
    STATE_SNAPSHOT = 71 => StateSnapshot(StateSnapshotS2c): Clientbound;
    CHAT_BROADCAST = 72 => ChatBroadcast(ChatBroadcastS2c): Clientbound;
    ERROR = 73 => Error(ErrorS2c): Clientbound;
    ITEM_DROP = 74 => ItemDrop(ItemDropS2c): Clientbound;
    ITEM_COLLECT_ACK = 75 => ItemCollectAck(ItemCollectAckS2c): Clientbound;
    GAME_PAUSE = 76 => GamePause(GamePauseS2c): Clientbound;
    PLAYER_INPUT_ACK = 77 => PlayerInputAck(PlayerInputAckS2c): Clientbound;
}

impl Message {
    /// True for the high-rate broadcasts that ride the unreliable channel.
    pub fn prefers_unreliable(&self) -> bool {
        matches!(self, Self::EntityUpdate(_) | Self::StateSnapshot(_))
    }
}
