//! Lobby packets, legal once a peer is authenticated.

use std::io::Write;

use uuid::Uuid;

use crate::stats::{TowerBonusSummary, WeaponAttackStyle};
use crate::types::{GameMode, ItemType, Rarity, TowerKind};
use crate::{Decode, Encode};

/// Asks for the durable loadout view: player-towers and stash items.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct PlayerDataRequestC2s;

impl Encode for PlayerDataRequestC2s {
    fn encode(&self, _w: impl Write) -> anyhow::Result<()> {
        Ok(())
    }
}

impl Decode<'_> for PlayerDataRequestC2s {
    fn decode(_r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

/// One durable player-tower loadout.
#[derive(Clone, PartialEq, Debug)]
pub struct PlayerTowerEntry {
    pub player_tower_id: Uuid,
    pub tower_type: TowerKind,
    pub level: u32,
    pub bonuses: TowerBonusSummary,
    pub weapon: Option<WeaponAttackStyle>,
}

impl Encode for PlayerTowerEntry {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.player_tower_id.encode(&mut w)?;
        self.tower_type.encode(&mut w)?;
        self.level.encode(&mut w)?;
        self.bonuses.encode(&mut w)?;
        self.weapon.encode(w)
    }
}

impl Decode<'_> for PlayerTowerEntry {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            player_tower_id: Uuid::decode(r)?,
            tower_type: TowerKind::decode(r)?,
            level: u32::decode(r)?,
            bonuses: TowerBonusSummary::decode(r)?,
            weapon: Option::<WeaponAttackStyle>::decode(r)?,
        })
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct PlayerTowersResponseS2c {
    pub towers: Vec<PlayerTowerEntry>,
}

impl Encode for PlayerTowersResponseS2c {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        self.towers.encode(w)
    }
}

impl Decode<'_> for PlayerTowersResponseS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            towers: Vec::<PlayerTowerEntry>::decode(r)?,
        })
    }
}

/// One durable stash item.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PlayerItemEntry {
    pub item_id: Uuid,
    pub item_type: ItemType,
    pub rarity: Rarity,
    pub item_level: u32,
    pub name: String,
}

impl Encode for PlayerItemEntry {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.item_id.encode(&mut w)?;
        self.item_type.encode(&mut w)?;
        self.rarity.encode(&mut w)?;
        self.item_level.encode(&mut w)?;
        self.name.encode(w)
    }
}

impl Decode<'_> for PlayerItemEntry {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            item_id: Uuid::decode(r)?,
            item_type: ItemType::decode(r)?,
            rarity: Rarity::decode(r)?,
            item_level: u32::decode(r)?,
            name: String::decode(r)?,
        })
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PlayerItemsResponseS2c {
    pub items: Vec<PlayerItemEntry>,
}

impl Encode for PlayerItemsResponseS2c {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        self.items.encode(w)
    }
}

impl Decode<'_> for PlayerItemsResponseS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            items: Vec::<PlayerItemEntry>::decode(r)?,
        })
    }
}

/// Asks to be placed into a match of the given mode.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RequestMatchC2s {
    pub mode: GameMode,
}

impl Encode for RequestMatchC2s {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        self.mode.encode(w)
    }
}

impl Decode<'_> for RequestMatchC2s {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            mode: GameMode::decode(r)?,
        })
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RequestMatchAckS2c {
    pub success: bool,
    pub match_id: Option<Uuid>,
    pub error: Option<String>,
}

impl Encode for RequestMatchAckS2c {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.success.encode(&mut w)?;
        self.match_id.encode(&mut w)?;
        self.error.encode(w)
    }
}

impl Decode<'_> for RequestMatchAckS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            success: bool::decode(r)?,
            match_id: Option::<Uuid>::decode(r)?,
            error: Option::<String>::decode(r)?,
        })
    }
}

/// Sent when a peer's session ends and it is back in the lobby.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct ReturnToLobbyS2c;

impl Encode for ReturnToLobbyS2c {
    fn encode(&self, _w: impl Write) -> anyhow::Result<()> {
        Ok(())
    }
}

impl Decode<'_> for ReturnToLobbyS2c {
    fn decode(_r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self)
    }
}
