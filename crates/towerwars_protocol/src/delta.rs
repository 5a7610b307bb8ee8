//! Partial entity updates for the high-rate broadcast channel.

use std::io::Write;

use bitfield_struct::bitfield;
use glam::Vec2;

use crate::{Decode, Encode};

/// Which fields of an [`EntityDelta`] are present. Absent fields are
/// unchanged on the client.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct DeltaFlags {
    pub position: bool,
    pub health: bool,
    pub rotation: bool,
    pub owner: bool,
    #[bits(4)]
    _padding: u8,
}

impl Encode for DeltaFlags {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        u8::from(*self).encode(w)
    }
}

impl Decode<'_> for DeltaFlags {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(DeltaFlags::from(u8::decode(r)?))
    }
}

/// One entity's changed fields for a single tick.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct EntityDelta {
    pub entity_id: u32,
    pub position: Option<Vec2>,
    pub health: Option<f32>,
    pub rotation: Option<f32>,
    pub owner: Option<u32>,
}

impl EntityDelta {
    pub fn new(entity_id: u32) -> Self {
        Self {
            entity_id,
            ..Self::default()
        }
    }

    pub fn with_position(mut self, position: Vec2) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_health(mut self, health: f32) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_rotation(mut self, rotation: f32) -> Self {
        self.rotation = Some(rotation);
        self
    }

    pub fn with_owner(mut self, owner: u32) -> Self {
        self.owner = Some(owner);
        self
    }

    fn flags(&self) -> DeltaFlags {
        DeltaFlags::new()
            .with_position(self.position.is_some())
            .with_health(self.health.is_some())
            .with_rotation(self.rotation.is_some())
            .with_owner(self.owner.is_some())
    }
}

impl Encode for EntityDelta {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.entity_id.encode(&mut w)?;
        self.flags().encode(&mut w)?;

        if let Some(position) = self.position {
            position.encode(&mut w)?;
        }
        if let Some(health) = self.health {
            health.encode(&mut w)?;
        }
        if let Some(rotation) = self.rotation {
            rotation.encode(&mut w)?;
        }
        if let Some(owner) = self.owner {
            owner.encode(&mut w)?;
        }

        Ok(())
    }
}

impl Decode<'_> for EntityDelta {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let entity_id = u32::decode(r)?;
        let flags = DeltaFlags::decode(r)?;

        Ok(Self {
            entity_id,
            position: flags.position().then(|| Vec2::decode(r)).transpose()?,
            health: flags.health().then(|| f32::decode(r)).transpose()?,
            rotation: flags.rotation().then(|| f32::decode(r)).transpose()?,
            owner: flags.owner().then(|| u32::decode(r)).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_delta_round_trip() {
        let delta = EntityDelta::new(42)
            .with_position(Vec2::new(1.0, 2.0))
            .with_health(55.5);

        let mut buf = vec![];
        delta.encode(&mut buf).unwrap();

        // entity_id + flags + position + health, nothing else.
        assert_eq!(buf.len(), 4 + 1 + 8 + 4);

        let mut r = buf.as_slice();
        assert_eq!(EntityDelta::decode(&mut r).unwrap(), delta);
        assert!(r.is_empty());
    }

    #[test]
    fn empty_delta_is_two_fields_wide() {
        let delta = EntityDelta::new(7);

        let mut buf = vec![];
        delta.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), 5);

        let mut r = buf.as_slice();
        assert_eq!(EntityDelta::decode(&mut r).unwrap(), delta);
    }
}
