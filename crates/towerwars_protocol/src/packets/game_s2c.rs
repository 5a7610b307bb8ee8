//! In-game packets, server to clients.

use std::io::Write;

use glam::Vec2;
use uuid::Uuid;

use crate::delta::EntityDelta;
use crate::types::{
    ChatChannel, DestroyReason, EntityState, ErrorCode, GameMode, ItemType, MatchResult,
    PlayerState, Rarity, UnitKind,
};
use crate::{Decode, Encode};

/// Identity of one participant, sent once at match start.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PlayerInfo {
    pub player_id: u32,
    pub user_id: Uuid,
    pub character_id: Uuid,
    pub team_id: u8,
}

impl Encode for PlayerInfo {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.player_id.encode(&mut w)?;
        self.user_id.encode(&mut w)?;
        self.character_id.encode(&mut w)?;
        self.team_id.encode(w)
    }
}

impl Decode<'_> for PlayerInfo {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            player_id: u32::decode(r)?,
            user_id: Uuid::decode(r)?,
            character_id: Uuid::decode(r)?,
            team_id: u8::decode(r)?,
        })
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct MatchStartS2c {
    pub match_id: Uuid,
    pub mode: GameMode,
    pub grid_width: u8,
    pub grid_height: u8,
    pub players: Vec<PlayerInfo>,
}

impl Encode for MatchStartS2c {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.match_id.encode(&mut w)?;
        self.mode.encode(&mut w)?;
        self.grid_width.encode(&mut w)?;
        self.grid_height.encode(&mut w)?;
        self.players.encode(w)
    }
}

impl Decode<'_> for MatchStartS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            match_id: Uuid::decode(r)?,
            mode: GameMode::decode(r)?,
            grid_width: u8::decode(r)?,
            grid_height: u8::decode(r)?,
            players: Vec::<PlayerInfo>::decode(r)?,
        })
    }
}

/// Final per-player tallies carried in `MatchEnd`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PlayerMatchStats {
    pub player_id: u32,
    pub score: u32,
    pub units_killed: u32,
    pub towers_built: u32,
    pub gold_earned: u32,
}

impl Encode for PlayerMatchStats {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.player_id.encode(&mut w)?;
        self.score.encode(&mut w)?;
        self.units_killed.encode(&mut w)?;
        self.towers_built.encode(&mut w)?;
        self.gold_earned.encode(w)
    }
}

impl Decode<'_> for PlayerMatchStats {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            player_id: u32::decode(r)?,
            score: u32::decode(r)?,
            units_killed: u32::decode(r)?,
            towers_built: u32::decode(r)?,
            gold_earned: u32::decode(r)?,
        })
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct MatchEndS2c {
    pub result: MatchResult,
    pub waves_completed: u32,
    pub stats: Vec<PlayerMatchStats>,
}

impl Encode for MatchEndS2c {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.result.encode(&mut w)?;
        self.waves_completed.encode(&mut w)?;
        self.stats.encode(w)
    }
}

impl Decode<'_> for MatchEndS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            result: MatchResult::decode(r)?,
            waves_completed: u32::decode(r)?,
            stats: Vec::<PlayerMatchStats>::decode(r)?,
        })
    }
}

/// What the upcoming wave holds.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct WaveInfo {
    pub kind: UnitKind,
    pub count: u32,
}

impl Encode for WaveInfo {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.kind.encode(&mut w)?;
        self.count.encode(w)
    }
}

impl Decode<'_> for WaveInfo {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            kind: UnitKind::decode(r)?,
            count: u32::decode(r)?,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct WaveStartS2c {
    pub wave_number: u32,
    pub wave_info: WaveInfo,
}

impl Encode for WaveStartS2c {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.wave_number.encode(&mut w)?;
        self.wave_info.encode(w)
    }
}

impl Decode<'_> for WaveStartS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            wave_number: u32::decode(r)?,
            wave_info: WaveInfo::decode(r)?,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct WaveEndS2c {
    pub wave_number: u32,
    pub success: bool,
    pub bonus_gold: u32,
}

impl Encode for WaveEndS2c {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.wave_number.encode(&mut w)?;
        self.success.encode(&mut w)?;
        self.bonus_gold.encode(w)
    }
}

impl Decode<'_> for WaveEndS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            wave_number: u32::decode(r)?,
            success: bool::decode(r)?,
            bonus_gold: u32::decode(r)?,
        })
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct EntitySpawnS2c {
    pub tick: u64,
    pub entity: EntityState,
}

impl Encode for EntitySpawnS2c {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.tick.encode(&mut w)?;
        self.entity.encode(w)
    }
}

impl Decode<'_> for EntitySpawnS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            tick: u64::decode(r)?,
            entity: EntityState::decode(r)?,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct EntityDestroyS2c {
    pub tick: u64,
    pub entity_id: u32,
    pub reason: DestroyReason,
}

impl Encode for EntityDestroyS2c {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.tick.encode(&mut w)?;
        self.entity_id.encode(&mut w)?;
        self.reason.encode(w)
    }
}

impl Decode<'_> for EntityDestroyS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            tick: u64::decode(r)?,
            entity_id: u32::decode(r)?,
            reason: DestroyReason::decode(r)?,
        })
    }
}

/// High-rate partial state broadcast, sent unreliably.
#[derive(Clone, PartialEq, Debug)]
pub struct EntityUpdateS2c {
    pub tick: u64,
    pub deltas: Vec<EntityDelta>,
}

impl Encode for EntityUpdateS2c {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.tick.encode(&mut w)?;
        self.deltas.encode(w)
    }
}

impl Decode<'_> for EntityUpdateS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            tick: u64::decode(r)?,
            deltas: Vec::<EntityDelta>::decode(r)?,
        })
    }
}

/// Full authoritative state, sent reliably on join and wave start.
#[derive(Clone, PartialEq, Debug)]
pub struct StateSnapshotS2c {
    pub tick: u64,
    pub entities: Vec<EntityState>,
    pub players: Vec<PlayerState>,
}

impl Encode for StateSnapshotS2c {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.tick.encode(&mut w)?;
        self.entities.encode(&mut w)?;
        self.players.encode(w)
    }
}

impl Decode<'_> for StateSnapshotS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            tick: u64::decode(r)?,
            entities: Vec::<EntityState>::decode(r)?,
            players: Vec::<PlayerState>::decode(r)?,
        })
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ChatBroadcastS2c {
    pub channel: ChatChannel,
    pub sender_player_id: u32,
    pub text: String,
}

impl Encode for ChatBroadcastS2c {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.channel.encode(&mut w)?;
        self.sender_player_id.encode(&mut w)?;
        self.text.encode(w)
    }
}

impl Decode<'_> for ChatBroadcastS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            channel: ChatChannel::decode(r)?,
            sender_player_id: u32::decode(r)?,
            text: String::decode(r)?,
        })
    }
}

/// A request-scoped failure. The session keeps running; only the
/// originator hears about it.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ErrorS2c {
    pub code: ErrorCode,
    pub message: String,
    pub request_id: Option<u32>,
}

impl Encode for ErrorS2c {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.code.encode(&mut w)?;
        self.message.encode(&mut w)?;
        self.request_id.encode(w)
    }
}

impl Decode<'_> for ErrorS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            code: ErrorCode::decode(r)?,
            message: String::decode(r)?,
            request_id: Option::<u32>::decode(r)?,
        })
    }
}

/// Announces a fresh item drop on the field.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct ItemDropS2c {
    pub tick: u64,
    pub drop_id: u32,
    pub entity_id: u32,
    pub position: Vec2,
    pub owner_player_id: u32,
    pub item_type: ItemType,
    pub rarity: Rarity,
    pub item_level: u32,
}

impl Encode for ItemDropS2c {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.tick.encode(&mut w)?;
        self.drop_id.encode(&mut w)?;
        self.entity_id.encode(&mut w)?;
        self.position.encode(&mut w)?;
        self.owner_player_id.encode(&mut w)?;
        self.item_type.encode(&mut w)?;
        self.rarity.encode(&mut w)?;
        self.item_level.encode(w)
    }
}

impl Decode<'_> for ItemDropS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            tick: u64::decode(r)?,
            drop_id: u32::decode(r)?,
            entity_id: u32::decode(r)?,
            position: Vec2::decode(r)?,
            owner_player_id: u32::decode(r)?,
            item_type: ItemType::decode(r)?,
            rarity: Rarity::decode(r)?,
            item_level: u32::decode(r)?,
        })
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ItemCollectAckS2c {
    pub request_id: u32,
    pub success: bool,
    pub item_id: Option<Uuid>,
    pub error: Option<ErrorCode>,
}

impl Encode for ItemCollectAckS2c {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.request_id.encode(&mut w)?;
        self.success.encode(&mut w)?;
        self.item_id.encode(&mut w)?;
        self.error.encode(w)
    }
}

impl Decode<'_> for ItemCollectAckS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            request_id: u32::decode(r)?,
            success: bool::decode(r)?,
            item_id: Option::<Uuid>::decode(r)?,
            error: Option::<ErrorCode>::decode(r)?,
        })
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct GamePauseS2c {
    pub is_paused: bool,
    pub reason: Option<String>,
}

impl Encode for GamePauseS2c {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.is_paused.encode(&mut w)?;
        self.reason.encode(w)
    }
}

impl Decode<'_> for GamePauseS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            is_paused: bool::decode(r)?,
            reason: Option::<String>::decode(r)?,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PlayerInputAckS2c {
    pub last_processed_sequence: u32,
}

impl Encode for PlayerInputAckS2c {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        self.last_processed_sequence.encode(w)
    }
}

impl Decode<'_> for PlayerInputAckS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            last_processed_sequence: u32::decode(r)?,
        })
    }
}
