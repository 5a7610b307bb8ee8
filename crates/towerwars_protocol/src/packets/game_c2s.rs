//! In-game packets, client to server. Legal only for peers in a session.

use std::io::Write;

use glam::Vec2;
use uuid::Uuid;

use crate::types::{AbilityKind, ChatChannel, TowerKind};
use crate::{Decode, Encode};

/// Client input heartbeat carrying the client-side sequence number, acked
/// with `PlayerInputAck` for reconciliation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PlayerInputC2s {
    pub sequence: u32,
}

impl Encode for PlayerInputC2s {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        self.sequence.encode(w)
    }
}

impl Decode<'_> for PlayerInputC2s {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            sequence: u32::decode(r)?,
        })
    }
}

/// Asks to place a tower. `request_id` correlates the eventual
/// spawn or `Error` with this request.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TowerBuildC2s {
    pub request_id: u32,
    pub player_tower_id: Uuid,
    pub tower_type: TowerKind,
    pub gx: u8,
    pub gy: u8,
}

impl Encode for TowerBuildC2s {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.request_id.encode(&mut w)?;
        self.player_tower_id.encode(&mut w)?;
        self.tower_type.encode(&mut w)?;
        self.gx.encode(&mut w)?;
        self.gy.encode(w)
    }
}

impl Decode<'_> for TowerBuildC2s {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            request_id: u32::decode(r)?,
            player_tower_id: Uuid::decode(r)?,
            tower_type: TowerKind::decode(r)?,
            gx: u8::decode(r)?,
            gy: u8::decode(r)?,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TowerUpgradeC2s {
    pub request_id: u32,
    pub entity_id: u32,
}

impl Encode for TowerUpgradeC2s {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.request_id.encode(&mut w)?;
        self.entity_id.encode(w)
    }
}

impl Decode<'_> for TowerUpgradeC2s {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            request_id: u32::decode(r)?,
            entity_id: u32::decode(r)?,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TowerSellC2s {
    pub request_id: u32,
    pub entity_id: u32,
}

impl Encode for TowerSellC2s {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.request_id.encode(&mut w)?;
        self.entity_id.encode(w)
    }
}

impl Decode<'_> for TowerSellC2s {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            request_id: u32::decode(r)?,
            entity_id: u32::decode(r)?,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct AbilityUseC2s {
    pub ability: AbilityKind,
    pub target: Vec2,
}

impl Encode for AbilityUseC2s {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.ability.encode(&mut w)?;
        self.target.encode(w)
    }
}

impl Decode<'_> for AbilityUseC2s {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            ability: AbilityKind::decode(r)?,
            target: Vec2::decode(r)?,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ReadyStateC2s {
    pub is_ready: bool,
}

impl Encode for ReadyStateC2s {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        self.is_ready.encode(w)
    }
}

impl Decode<'_> for ReadyStateC2s {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            is_ready: bool::decode(r)?,
        })
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ChatMessageC2s {
    pub channel: ChatChannel,
    pub text: String,
}

impl Encode for ChatMessageC2s {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.channel.encode(&mut w)?;
        self.text.encode(w)
    }
}

impl Decode<'_> for ChatMessageC2s {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            channel: ChatChannel::decode(r)?,
            text: String::decode(r)?,
        })
    }
}

/// Asks to pick up a dropped item. Only the drop's owner may collect it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ItemCollectC2s {
    pub request_id: u32,
    pub drop_id: u32,
}

impl Encode for ItemCollectC2s {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.request_id.encode(&mut w)?;
        self.drop_id.encode(w)
    }
}

impl Decode<'_> for ItemCollectC2s {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            request_id: u32::decode(r)?,
            drop_id: u32::decode(r)?,
        })
    }
}
