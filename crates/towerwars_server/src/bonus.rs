//! Tower-bonus resolution and stat composition.
//!
//! The progression service owns skills and equipment; the zone server asks
//! it (through [`TowerBonusProvider`]) for the aggregated modifier set of a
//! player-tower at build time, then composes the tower's resolved combat
//! stats locally. Results are deterministic per player-tower and cached for
//! the session, so a build never resolves twice.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use towerwars_protocol::packets::lobby::{PlayerItemEntry, PlayerTowerEntry};
use towerwars_protocol::stats::{BonusKind, TowerBonusSummary, WeaponAttackStyle};
use towerwars_protocol::types::DamageType;
use uuid::Uuid;

use crate::catalog::TowerSpec;
use crate::token::BoxFuture;

/// Wall-clock budget for one resolution, timer applied by the caller.
pub const BONUS_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything the progression service knows about one player-tower.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct TowerLoadout {
    pub bonuses: TowerBonusSummary,
    pub weapon: Option<WeaponAttackStyle>,
}

/// The durable loadout view served to lobby `PlayerDataRequest`s.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct PlayerData {
    pub towers: Vec<PlayerTowerEntry>,
    pub items: Vec<PlayerItemEntry>,
}

/// Source of per-player-tower modifier aggregates.
pub trait TowerBonusProvider: Send + Sync + 'static {
    fn resolve(&self, player_tower_id: Uuid) -> BoxFuture<'_, anyhow::Result<TowerLoadout>>;

    /// The character's durable towers and stash, for the lobby view.
    fn player_data(&self, character_id: Uuid) -> BoxFuture<'_, anyhow::Result<PlayerData>> {
        let _ = character_id;
        Box::pin(async { Ok(PlayerData::default()) })
    }
}

/// In-process provider: a fixed table, empty loadout for unknown towers.
/// The default wiring and the test double.
#[derive(Clone, Default)]
pub struct StaticBonusProvider {
    loadouts: Arc<Mutex<HashMap<Uuid, TowerLoadout>>>,
    player_data: Arc<Mutex<HashMap<Uuid, PlayerData>>>,
}

impl StaticBonusProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, player_tower_id: Uuid, loadout: TowerLoadout) {
        self.loadouts.lock().insert(player_tower_id, loadout);
    }

    pub fn insert_player_data(&self, character_id: Uuid, data: PlayerData) {
        self.player_data.lock().insert(character_id, data);
    }

    pub fn loadout(&self, player_tower_id: Uuid) -> TowerLoadout {
        self.loadouts
            .lock()
            .get(&player_tower_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl TowerBonusProvider for StaticBonusProvider {
    fn resolve(&self, player_tower_id: Uuid) -> BoxFuture<'_, anyhow::Result<TowerLoadout>> {
        let loadout = self.loadout(player_tower_id);
        Box::pin(async move { Ok(loadout) })
    }

    fn player_data(&self, character_id: Uuid) -> BoxFuture<'_, anyhow::Result<PlayerData>> {
        let data = self
            .player_data
            .lock()
            .get(&character_id)
            .cloned()
            .unwrap_or_default();
        Box::pin(async move { Ok(data) })
    }
}

/// A tower's fully resolved combat stats.
#[derive(Clone, PartialEq, Debug)]
pub struct TowerStats {
    pub damage: f64,
    pub range: f64,
    pub attack_speed: f64,
    pub damage_type: DamageType,
    pub projectile_speed: f64,
    pub splash_radius: f64,
    pub slow_amount: f64,
    pub slow_duration: f64,
    /// Percent chance per attack.
    pub crit_chance: f64,
    /// Percent of base damage dealt on crit.
    pub crit_multiplier: f64,
    pub max_hp: f64,
    pub hits_multiple: bool,
    pub max_targets: u8,
    pub is_projectile: bool,
    pub gold_find_percent: f64,
    pub xp_gain_percent: f64,
    pub damage_reduction_percent: f64,
}

/// Composes resolved stats from the tower archetype and the player-tower
/// loadout.
///
/// An equipped weapon replaces the intrinsic damage, range and attack
/// speed before bonuses apply; percentage bonuses then scale
/// multiplicatively and flat bonuses add. Elemental bonuses only apply to
/// towers dealing non-physical damage, which keep the tower's own damage
/// type regardless of weapon.
pub fn compose_tower_stats(spec: &TowerSpec, loadout: &TowerLoadout) -> TowerStats {
    let bonuses = &loadout.bonuses;

    let (base_damage, base_range, base_attack_speed) = match &loadout.weapon {
        Some(weapon) => (
            f64::from(weapon.damage),
            f64::from(weapon.range),
            f64::from(weapon.attack_speed),
        ),
        None => (spec.damage, spec.range, spec.attack_speed),
    };

    let elemental = spec.damage_type != DamageType::Physical;

    let mut damage_percent = bonuses.value(BonusKind::DamagePercent);
    let mut damage_flat = bonuses.value(BonusKind::DamageFlat);
    if elemental {
        damage_percent += bonuses.value(BonusKind::ElementalDamagePercent);
        damage_flat += bonuses.value(BonusKind::ElementalDamageFlat);
    }

    let damage = (base_damage * (1.0 + damage_percent / 100.0)).floor() + damage_flat;
    let range = base_range * (1.0 + bonuses.value(BonusKind::RangePercent) / 100.0);
    let attack_speed =
        base_attack_speed * (1.0 + bonuses.value(BonusKind::AttackSpeedPercent) / 100.0);

    let max_hp = 100.0
        + bonuses.value(BonusKind::TowerHpFlat)
        + 100.0 * bonuses.value(BonusKind::TowerHpPercent) / 100.0;

    let (hits_multiple, max_targets, is_projectile) = match &loadout.weapon {
        Some(weapon) => (weapon.hits_multiple, weapon.max_targets.max(1), weapon.is_projectile),
        None => (false, 1, true),
    };

    TowerStats {
        damage,
        range,
        attack_speed,
        damage_type: spec.damage_type,
        projectile_speed: spec.projectile_speed,
        splash_radius: spec.splash_radius + bonuses.value(BonusKind::SplashRadius),
        slow_amount: spec.slow_amount + bonuses.value(BonusKind::SlowAmount) / 100.0,
        slow_duration: spec.slow_duration + bonuses.value(BonusKind::SlowDuration),
        crit_chance: bonuses.value(BonusKind::CritChance),
        crit_multiplier: 150.0 + bonuses.value(BonusKind::CritMultiplier),
        max_hp,
        hits_multiple,
        max_targets,
        is_projectile,
        gold_find_percent: bonuses.value(BonusKind::GoldFindPercent),
        xp_gain_percent: bonuses.value(BonusKind::XpGainPercent),
        damage_reduction_percent: bonuses.value(BonusKind::DamageReductionPercent),
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use towerwars_protocol::stats::WeaponSubtype;
    use towerwars_protocol::types::TowerKind;

    use super::*;
    use crate::catalog::tower_spec;

    #[test]
    fn bare_tower_uses_intrinsic_stats() {
        let stats = compose_tower_stats(tower_spec(TowerKind::Arrow), &TowerLoadout::default());

        assert_eq!(stats.damage, 10.0);
        assert_eq!(stats.range, 3.0);
        assert_eq!(stats.attack_speed, 1.0);
        assert_eq!(stats.max_hp, 100.0);
        assert_eq!(stats.crit_multiplier, 150.0);
        assert_eq!(stats.max_targets, 1);
        assert!(stats.is_projectile);
    }

    #[test]
    fn percent_applies_before_flat() {
        let loadout = TowerLoadout {
            bonuses: [
                (BonusKind::DamagePercent, 50.0),
                (BonusKind::DamageFlat, 2.0),
            ]
            .into_iter()
            .collect(),
            weapon: None,
        };

        let stats = compose_tower_stats(tower_spec(TowerKind::Arrow), &loadout);
        assert_eq!(stats.damage, 17.0);
        assert_eq!(stats.range, 3.0);
        assert_eq!(stats.max_hp, 100.0);
    }

    #[test]
    fn weapon_replaces_base_attack() {
        let loadout = TowerLoadout {
            bonuses: [(BonusKind::DamagePercent, 100.0)].into_iter().collect(),
            weapon: Some(WeaponAttackStyle::for_subtype(
                WeaponSubtype::Sword,
                40.0,
                1.5,
                2.0,
            )),
        };

        let stats = compose_tower_stats(tower_spec(TowerKind::Arrow), &loadout);
        assert_eq!(stats.damage, 80.0);
        assert_relative_eq!(stats.range, 1.5);
        assert_relative_eq!(stats.attack_speed, 2.0);
        assert!(stats.hits_multiple);
        assert_eq!(stats.max_targets, 3);
        assert!(!stats.is_projectile);
        // Damage type is inherited from the tower, not the weapon.
        assert_eq!(stats.damage_type, DamageType::Physical);
    }

    #[test]
    fn elemental_bonuses_skip_physical_towers() {
        let loadout = TowerLoadout {
            bonuses: [(BonusKind::ElementalDamageFlat, 5.0)].into_iter().collect(),
            weapon: None,
        };

        let physical = compose_tower_stats(tower_spec(TowerKind::Arrow), &loadout);
        assert_eq!(physical.damage, 10.0);

        let fire = compose_tower_stats(tower_spec(TowerKind::Fire), &loadout);
        assert_eq!(fire.damage, 19.0);
    }

    #[test]
    fn hp_composition() {
        let loadout = TowerLoadout {
            bonuses: [
                (BonusKind::TowerHpFlat, 20.0),
                (BonusKind::TowerHpPercent, 50.0),
            ]
            .into_iter()
            .collect(),
            weapon: None,
        };

        let stats = compose_tower_stats(tower_spec(TowerKind::Arrow), &loadout);
        assert_eq!(stats.max_hp, 170.0);
    }

    #[tokio::test]
    async fn static_provider_returns_empty_for_unknown() {
        let provider = StaticBonusProvider::new();
        let loadout = provider.resolve(Uuid::new_v4()).await.unwrap();
        assert!(loadout.bonuses.is_empty());
        assert!(loadout.weapon.is_none());
    }
}
