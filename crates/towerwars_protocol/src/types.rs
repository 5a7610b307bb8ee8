//! Shared protocol types used across the packet catalog.

use std::io::Write;

use bitfield_struct::bitfield;
use glam::Vec2;

use crate::{Decode, Encode};

/// Implements `Encode`/`Decode` for a fieldless enum as a single byte with
/// explicit discriminants.
macro_rules! byte_enum {
    ($name:ty { $($variant:ident = $tag:literal),+ $(,)? }) => {
        impl Encode for $name {
            fn encode(&self, w: impl Write) -> anyhow::Result<()> {
                (*self as u8).encode(w)
            }
        }

        impl Decode<'_> for $name {
            fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
                match u8::decode(r)? {
                    $($tag => Ok(<$name>::$variant),)+
                    n => anyhow::bail!("invalid {} byte {n}", stringify!($name)),
                }
            }
        }
    };
}

pub(crate) use byte_enum;

/// The mode a match is played in.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
#[repr(u8)]
pub enum GameMode {
    #[default]
    Solo = 0,
    Coop = 1,
    Pvp = 2,
}

byte_enum!(GameMode { Solo = 0, Coop = 1, Pvp = 2 });

/// Damage typing for towers, weapons and abilities.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
#[repr(u8)]
pub enum DamageType {
    #[default]
    Physical = 0,
    Fire = 1,
    Cold = 2,
    Lightning = 3,
    Chaos = 4,
    Holy = 5,
}

byte_enum!(DamageType {
    Physical = 0,
    Fire = 1,
    Cold = 2,
    Lightning = 3,
    Chaos = 4,
    Holy = 5,
});

/// The buildable tower archetypes.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum TowerKind {
    Arrow = 0,
    Cannon = 1,
    Frost = 2,
    Fire = 3,
    Storm = 4,
}

byte_enum!(TowerKind {
    Arrow = 0,
    Cannon = 1,
    Frost = 2,
    Fire = 3,
    Storm = 4,
});

impl TowerKind {
    pub const ALL: [TowerKind; 5] = [
        TowerKind::Arrow,
        TowerKind::Cannon,
        TowerKind::Frost,
        TowerKind::Fire,
        TowerKind::Storm,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TowerKind::Arrow => "Arrow",
            TowerKind::Cannon => "Cannon",
            TowerKind::Frost => "Frost",
            TowerKind::Fire => "Fire",
            TowerKind::Storm => "Storm",
        }
    }
}

/// The wave unit archetypes.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum UnitKind {
    Basic = 0,
    Fast = 1,
    Tank = 2,
    Boss = 3,
}

byte_enum!(UnitKind { Basic = 0, Fast = 1, Tank = 2, Boss = 3 });

impl UnitKind {
    pub fn name(self) -> &'static str {
        match self {
            UnitKind::Basic => "Basic",
            UnitKind::Fast => "Fast",
            UnitKind::Tank => "Tank",
            UnitKind::Boss => "Boss",
        }
    }
}

/// Severity tier for enemy units and item drops.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[repr(u8)]
pub enum Rarity {
    #[default]
    Normal = 0,
    Magic = 1,
    Rare = 2,
}

byte_enum!(Rarity { Normal = 0, Magic = 1, Rare = 2 });

impl Rarity {
    pub fn name(self) -> &'static str {
        match self {
            Rarity::Normal => "Normal",
            Rarity::Magic => "Magic",
            Rarity::Rare => "Rare",
        }
    }
}

/// Per-unit modifier flags granting resistances or special behaviour.
#[bitfield(u16)]
#[derive(PartialEq, Eq, Hash)]
pub struct UnitModifiers {
    pub phys_res: bool,
    pub fire_res: bool,
    pub cold_res: bool,
    pub lightning_res: bool,
    pub poison_res: bool,
    pub swift: bool,
    pub hasted: bool,
    pub tough: bool,
    pub armored: bool,
    pub regenerating: bool,
    pub shielded: bool,
    pub vampiric: bool,
    pub explosive: bool,
    pub splitting: bool,
    #[bits(2)]
    _padding: u8,
}

impl Encode for UnitModifiers {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        u16::from(*self).encode(w)
    }
}

impl Decode<'_> for UnitModifiers {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(UnitModifiers::from(u16::decode(r)?))
    }
}

/// Types an item drop can roll as.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum ItemType {
    Sword = 0,
    Bow = 1,
    Staff = 2,
    Shield = 3,
    Ring = 4,
    Amulet = 5,
}

byte_enum!(ItemType {
    Sword = 0,
    Bow = 1,
    Staff = 2,
    Shield = 3,
    Ring = 4,
    Amulet = 5,
});

impl ItemType {
    pub const ALL: [ItemType; 6] = [
        ItemType::Sword,
        ItemType::Bow,
        ItemType::Staff,
        ItemType::Shield,
        ItemType::Ring,
        ItemType::Amulet,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ItemType::Sword => "Sword",
            ItemType::Bow => "Bow",
            ItemType::Staff => "Staff",
            ItemType::Shield => "Shield",
            ItemType::Ring => "Ring",
            ItemType::Amulet => "Amulet",
        }
    }
}

/// Player-castable abilities.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum AbilityKind {
    Meteor = 0,
    FrostNova = 1,
}

byte_enum!(AbilityKind { Meteor = 0, FrostNova = 1 });

impl AbilityKind {
    pub fn name(self) -> &'static str {
        match self {
            AbilityKind::Meteor => "Meteor",
            AbilityKind::FrostNova => "FrostNova",
        }
    }
}

/// Chat routing requested by the sender.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
#[repr(u8)]
pub enum ChatChannel {
    #[default]
    Match = 0,
    Team = 1,
}

byte_enum!(ChatChannel { Match = 0, Team = 1 });

/// Why an entity left the session.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum DestroyReason {
    Killed = 0,
    ReachedEnd = 1,
    Sold = 2,
    Expired = 3,
    Collected = 4,
}

byte_enum!(DestroyReason {
    Killed = 0,
    ReachedEnd = 1,
    Sold = 2,
    Expired = 3,
    Collected = 4,
});

/// The outcome of a match, from the perspective of the whole session.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum MatchResult {
    Victory = 0,
    Defeat = 1,
    Aborted = 2,
    ServerShutdown = 3,
}

byte_enum!(MatchResult {
    Victory = 0,
    Defeat = 1,
    Aborted = 2,
    ServerShutdown = 3,
});

impl MatchResult {
    pub fn name(self) -> &'static str {
        match self {
            MatchResult::Victory => "Victory",
            MatchResult::Defeat => "Defeat",
            MatchResult::Aborted => "Aborted",
            MatchResult::ServerShutdown => "ServerShutdown",
        }
    }
}

/// Error taxonomy surfaced to clients in `Error` packets.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum ErrorCode {
    InvalidToken = 0,
    ProtocolMismatch = 1,
    NotAuthenticated = 2,
    WrongState = 3,
    TowerNotFound = 4,
    InsufficientGold = 5,
    InvalidPlacement = 6,
    ItemNotFound = 7,
    ItemAlreadyCollected = 8,
    NotItemOwner = 9,
    InternalError = 10,
}

byte_enum!(ErrorCode {
    InvalidToken = 0,
    ProtocolMismatch = 1,
    NotAuthenticated = 2,
    WrongState = 3,
    TowerNotFound = 4,
    InsufficientGold = 5,
    InvalidPlacement = 6,
    ItemNotFound = 7,
    ItemAlreadyCollected = 8,
    NotItemOwner = 9,
    InternalError = 10,
});

/// Why a peer was (or is being) disconnected.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum DisconnectReason {
    ByClient = 0,
    Timeout = 1,
    InvalidToken = 2,
    ProtocolMismatch = 3,
    ServerShutdown = 4,
    Kicked = 5,
}

byte_enum!(DisconnectReason {
    ByClient = 0,
    Timeout = 1,
    InvalidToken = 2,
    ProtocolMismatch = 3,
    ServerShutdown = 4,
    Kicked = 5,
});

impl DisconnectReason {
    pub fn message(self) -> &'static str {
        match self {
            DisconnectReason::ByClient => "Disconnected by client",
            DisconnectReason::Timeout => "Timed out",
            DisconnectReason::InvalidToken => "Invalid token",
            DisconnectReason::ProtocolMismatch => "Protocol version mismatch",
            DisconnectReason::ServerShutdown => "Server shutting down",
            DisconnectReason::Kicked => "Kicked",
        }
    }
}

/// Full spawn-time description of a session entity.
#[derive(Clone, PartialEq, Debug)]
pub struct EntityState {
    pub entity_id: u32,
    pub position: Vec2,
    pub hp: f32,
    pub max_hp: f32,
    pub data: EntityData,
}

/// The per-kind payload of an [`EntityState`].
#[derive(Clone, PartialEq, Debug)]
pub enum EntityData {
    Tower {
        owner_player_id: u32,
        tower_type: TowerKind,
        gx: u8,
        gy: u8,
        upgrade_level: u8,
        range: f32,
        attack_speed: f32,
    },
    Unit {
        kind: UnitKind,
        rarity: Rarity,
        modifiers: UnitModifiers,
        speed: f32,
        direction: Vec2,
    },
    ItemDrop {
        drop_id: u32,
        owner_player_id: u32,
        item_type: ItemType,
        rarity: Rarity,
        item_level: u32,
    },
}

impl Encode for EntityState {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.entity_id.encode(&mut w)?;
        self.position.encode(&mut w)?;
        self.hp.encode(&mut w)?;
        self.max_hp.encode(&mut w)?;

        match &self.data {
            EntityData::Tower {
                owner_player_id,
                tower_type,
                gx,
                gy,
                upgrade_level,
                range,
                attack_speed,
            } => {
                0u8.encode(&mut w)?;
                owner_player_id.encode(&mut w)?;
                tower_type.encode(&mut w)?;
                gx.encode(&mut w)?;
                gy.encode(&mut w)?;
                upgrade_level.encode(&mut w)?;
                range.encode(&mut w)?;
                attack_speed.encode(&mut w)?;
            }
            EntityData::Unit {
                kind,
                rarity,
                modifiers,
                speed,
                direction,
            } => {
                1u8.encode(&mut w)?;
                kind.encode(&mut w)?;
                rarity.encode(&mut w)?;
                modifiers.encode(&mut w)?;
                speed.encode(&mut w)?;
                direction.encode(&mut w)?;
            }
            EntityData::ItemDrop {
                drop_id,
                owner_player_id,
                item_type,
                rarity,
                item_level,
            } => {
                2u8.encode(&mut w)?;
                drop_id.encode(&mut w)?;
                owner_player_id.encode(&mut w)?;
                item_type.encode(&mut w)?;
                rarity.encode(&mut w)?;
                item_level.encode(&mut w)?;
            }
        }

        Ok(())
    }
}

impl Decode<'_> for EntityState {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let entity_id = u32::decode(r)?;
        let position = Vec2::decode(r)?;
        let hp = f32::decode(r)?;
        let max_hp = f32::decode(r)?;

        let data = match u8::decode(r)? {
            0 => EntityData::Tower {
                owner_player_id: u32::decode(r)?,
                tower_type: TowerKind::decode(r)?,
                gx: u8::decode(r)?,
                gy: u8::decode(r)?,
                upgrade_level: u8::decode(r)?,
                range: f32::decode(r)?,
                attack_speed: f32::decode(r)?,
            },
            1 => EntityData::Unit {
                kind: UnitKind::decode(r)?,
                rarity: Rarity::decode(r)?,
                modifiers: UnitModifiers::decode(r)?,
                speed: f32::decode(r)?,
                direction: Vec2::decode(r)?,
            },
            2 => EntityData::ItemDrop {
                drop_id: u32::decode(r)?,
                owner_player_id: u32::decode(r)?,
                item_type: ItemType::decode(r)?,
                rarity: Rarity::decode(r)?,
                item_level: u32::decode(r)?,
            },
            n => anyhow::bail!("invalid entity data tag {n}"),
        };

        Ok(Self {
            entity_id,
            position,
            hp,
            max_hp,
            data,
        })
    }
}

/// Public, per-player state mirrored to clients in snapshots.
#[derive(Clone, PartialEq, Debug)]
pub struct PlayerState {
    pub player_id: u32,
    pub user_id: uuid::Uuid,
    pub gold: u32,
    pub lives: u32,
    pub score: u32,
    pub team_id: u8,
    pub is_ready: bool,
    pub connected: bool,
}

impl Encode for PlayerState {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.player_id.encode(&mut w)?;
        self.user_id.encode(&mut w)?;
        self.gold.encode(&mut w)?;
        self.lives.encode(&mut w)?;
        self.score.encode(&mut w)?;
        self.team_id.encode(&mut w)?;
        self.is_ready.encode(&mut w)?;
        self.connected.encode(w)
    }
}

impl Decode<'_> for PlayerState {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            player_id: u32::decode(r)?,
            user_id: uuid::Uuid::decode(r)?,
            gold: u32::decode(r)?,
            lives: u32::decode(r)?,
            score: u32::decode(r)?,
            team_id: u8::decode(r)?,
            is_ready: bool::decode(r)?,
            connected: bool::decode(r)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modifiers_round_trip() {
        let m = UnitModifiers::new()
            .with_fire_res(true)
            .with_swift(true)
            .with_shielded(true);

        let mut buf = vec![];
        m.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), 2);

        let mut r = buf.as_slice();
        let back = UnitModifiers::decode(&mut r).unwrap();
        assert_eq!(m, back);
        assert!(back.fire_res());
        assert!(back.shielded());
        assert!(!back.armored());
    }

    #[test]
    fn unknown_enum_bytes_error() {
        let mut r: &[u8] = &[9];
        assert!(TowerKind::decode(&mut r).is_err());

        let mut r: &[u8] = &[200];
        assert!(ErrorCode::decode(&mut r).is_err());
    }
}
