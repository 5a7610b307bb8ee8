//! Player-tower stat modifiers: the bonus summary aggregated from skill
//! allocations and equipped items, and the optional weapon attack style.
//!
//! These types are a cross-service contract: the progression service owns
//! the durable loadout, the zone server consumes the aggregate at build
//! time.

use std::io::Write;

use crate::types::byte_enum;
use crate::{Decode, Encode, VarUint};

/// A single kind of stat bonus. Elemental bonuses apply to the tower's own
/// damage type.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum BonusKind {
    DamagePercent = 0,
    DamageFlat = 1,
    AttackSpeedPercent = 2,
    RangePercent = 3,
    CritChance = 4,
    CritMultiplier = 5,
    TowerHpFlat = 6,
    TowerHpPercent = 7,
    DamageReductionPercent = 8,
    GoldFindPercent = 9,
    XpGainPercent = 10,
    ElementalDamageFlat = 11,
    ElementalDamagePercent = 12,
    SplashRadius = 13,
    SlowAmount = 14,
    SlowDuration = 15,
}

byte_enum!(BonusKind {
    DamagePercent = 0,
    DamageFlat = 1,
    AttackSpeedPercent = 2,
    RangePercent = 3,
    CritChance = 4,
    CritMultiplier = 5,
    TowerHpFlat = 6,
    TowerHpPercent = 7,
    DamageReductionPercent = 8,
    GoldFindPercent = 9,
    XpGainPercent = 10,
    ElementalDamageFlat = 11,
    ElementalDamagePercent = 12,
    SplashRadius = 13,
    SlowAmount = 14,
    SlowDuration = 15,
});

/// Sparse aggregate of stat bonuses for one player-tower. Values are summed
/// per kind across every skill allocation and equipped item.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct TowerBonusSummary {
    entries: Vec<(BonusKind, f64)>,
}

impl TowerBonusSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `value` to the running total for `kind`.
    pub fn add(&mut self, kind: BonusKind, value: f64) {
        match self.entries.iter_mut().find(|(k, _)| *k == kind) {
            Some((_, v)) => *v += value,
            None => self.entries.push((kind, value)),
        }
    }

    /// The summed value for `kind`, zero if absent.
    pub fn value(&self, kind: BonusKind) -> f64 {
        self.entries
            .iter()
            .find(|(k, _)| *k == kind)
            .map_or(0.0, |(_, v)| *v)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BonusKind, f64)> + '_ {
        self.entries.iter().copied()
    }
}

impl FromIterator<(BonusKind, f64)> for TowerBonusSummary {
    fn from_iter<I: IntoIterator<Item = (BonusKind, f64)>>(iter: I) -> Self {
        let mut summary = Self::new();
        for (kind, value) in iter {
            summary.add(kind, value);
        }
        summary
    }
}

impl Encode for TowerBonusSummary {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        VarUint(self.entries.len() as u32).encode(&mut w)?;
        for (kind, value) in &self.entries {
            kind.encode(&mut w)?;
            value.encode(&mut w)?;
        }
        Ok(())
    }
}

impl Decode<'_> for TowerBonusSummary {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let len = VarUint::decode(r)?.0 as usize;
        anyhow::ensure!(
            len <= r.len(),
            "not enough data remaining to decode {len} bonus entries"
        );

        let mut summary = Self::new();
        for _ in 0..len {
            let kind = BonusKind::decode(r)?;
            let value = f64::decode(r)?;
            summary.add(kind, value);
        }
        Ok(summary)
    }
}

/// The broad shape of an equipped weapon's attack.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum WeaponSubtype {
    Sword = 0,
    Bow = 1,
    Staff = 2,
}

byte_enum!(WeaponSubtype { Sword = 0, Bow = 1, Staff = 2 });

/// Attack overrides granted by an equipped weapon. Base damage, range and
/// attack speed replace the tower's intrinsic stats before percentage and
/// flat bonuses apply.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct WeaponAttackStyle {
    pub subtype: WeaponSubtype,
    pub damage: f32,
    pub range: f32,
    pub attack_speed: f32,
    pub hits_multiple: bool,
    pub max_targets: u8,
    pub is_projectile: bool,
}

impl WeaponAttackStyle {
    /// The conventional style for each weapon subtype: swords cleave
    /// several adjacent targets instantly, bows and staves launch a single
    /// projectile.
    pub fn for_subtype(subtype: WeaponSubtype, damage: f32, range: f32, attack_speed: f32) -> Self {
        let (hits_multiple, max_targets, is_projectile) = match subtype {
            WeaponSubtype::Sword => (true, 3, false),
            WeaponSubtype::Bow => (false, 1, true),
            WeaponSubtype::Staff => (false, 1, true),
        };

        Self {
            subtype,
            damage,
            range,
            attack_speed,
            hits_multiple,
            max_targets,
            is_projectile,
        }
    }
}

impl Encode for WeaponAttackStyle {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.subtype.encode(&mut w)?;
        self.damage.encode(&mut w)?;
        self.range.encode(&mut w)?;
        self.attack_speed.encode(&mut w)?;
        self.hits_multiple.encode(&mut w)?;
        self.max_targets.encode(&mut w)?;
        self.is_projectile.encode(w)
    }
}

impl Decode<'_> for WeaponAttackStyle {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            subtype: WeaponSubtype::decode(r)?,
            damage: f32::decode(r)?,
            range: f32::decode(r)?,
            attack_speed: f32::decode(r)?,
            hits_multiple: bool::decode(r)?,
            max_targets: u8::decode(r)?,
            is_projectile: bool::decode(r)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_sums_per_kind() {
        let mut s = TowerBonusSummary::new();
        s.add(BonusKind::DamagePercent, 30.0);
        s.add(BonusKind::DamagePercent, 20.0);
        s.add(BonusKind::CritChance, 5.0);

        assert_eq!(s.value(BonusKind::DamagePercent), 50.0);
        assert_eq!(s.value(BonusKind::CritChance), 5.0);
        assert_eq!(s.value(BonusKind::RangePercent), 0.0);
    }

    #[test]
    fn summary_round_trip() {
        let s: TowerBonusSummary = [
            (BonusKind::DamageFlat, 2.0),
            (BonusKind::GoldFindPercent, 15.0),
            (BonusKind::SlowAmount, -5.0),
        ]
        .into_iter()
        .collect();

        let mut buf = vec![];
        s.encode(&mut buf).unwrap();

        let mut r = buf.as_slice();
        assert_eq!(TowerBonusSummary::decode(&mut r).unwrap(), s);
        assert!(r.is_empty());
    }
}
