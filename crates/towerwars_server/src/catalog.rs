//! Gameplay tuning: tower, unit and ability base stats, reward and XP
//! tables, and the fixed timings of the match flow.

use towerwars_protocol::types::{AbilityKind, DamageType, TowerKind, UnitKind};

/// World units per grid cell.
pub const GRID_CELL_SIZE: f32 = 1.0;

/// Seconds between ready-up / wave clear and the next wave.
pub const PREPARATION_DELAY: f32 = 5.0;

/// Seconds an uncollected drop stays on the field.
pub const DROP_EXPIRY: f32 = 60.0;

/// Clearing this wave ends the match in victory.
pub const VICTORY_WAVE: u32 = 50;

/// Entity deltas go out every this many ticks.
pub const BROADCAST_INTERVAL_TICKS: u64 = 3;

pub const STARTING_GOLD: u32 = 10;
pub const STARTING_LIVES: u32 = 20;

/// Build cost grows by this fraction per prior purchase of the same
/// player-tower within a session.
pub const REPEAT_PURCHASE_MARKUP: f64 = 0.2;

/// Fraction of invested gold returned on sell.
pub const SELL_REFUND: f64 = 0.7;

pub const MAX_UPGRADE_LEVEL: u8 = 3;
pub const UPGRADE_DAMAGE_BONUS: f64 = 0.30;
pub const UPGRADE_RANGE_BONUS: f64 = 0.10;

/// Hard cap on summed damage resistance.
pub const RESISTANCE_CAP: f64 = 0.75;
pub const ELEMENTAL_RESISTANCE: f64 = 0.30;
pub const ARMORED_RESISTANCE: f64 = 0.15;

/// Seconds of per-player cooldown shared by all abilities.
pub const ABILITY_COOLDOWN: f32 = 10.0;

pub mod xp {
    pub const UNIT_KILL: u64 = 1;
    pub const BOSS_BONUS: u64 = 25;
    pub const WAVE_CLEAR: u64 = 10;
    pub const PERFECT_WAVE: u64 = 5;
    pub const MATCH_COMPLETION: u64 = 50;
    pub const VICTORY_BONUS: u64 = 100;
}

/// Reward multipliers by unit rarity: (gold, xp, drop chance).
pub fn rarity_multipliers(rarity: towerwars_protocol::types::Rarity) -> (f64, f64, f64) {
    use towerwars_protocol::types::Rarity;
    match rarity {
        Rarity::Normal => (1.0, 1.0, 1.0),
        Rarity::Magic => (1.5, 2.0, 2.0),
        Rarity::Rare => (2.5, 3.0, 5.0),
    }
}

/// Gold granted to every player when a wave clears.
pub fn wave_completion_gold(wave: u32) -> u32 {
    5 + wave
}

/// Chance of the end-of-wave drop roll.
pub fn wave_drop_chance(wave: u32) -> f64 {
    0.10 + 0.02 * f64::from(wave.saturating_sub(1))
}

#[derive(Clone, Copy, Debug)]
pub struct TowerSpec {
    pub kind: TowerKind,
    pub cost: u32,
    pub damage: f64,
    pub range: f64,
    pub attack_speed: f64,
    pub damage_type: DamageType,
    pub projectile_speed: f64,
    pub splash_radius: f64,
    pub slow_amount: f64,
    pub slow_duration: f64,
}

pub fn tower_spec(kind: TowerKind) -> &'static TowerSpec {
    match kind {
        TowerKind::Arrow => &TowerSpec {
            kind: TowerKind::Arrow,
            cost: 1,
            damage: 10.0,
            range: 3.0,
            attack_speed: 1.0,
            damage_type: DamageType::Physical,
            projectile_speed: 8.0,
            splash_radius: 0.0,
            slow_amount: 0.0,
            slow_duration: 0.0,
        },
        TowerKind::Cannon => &TowerSpec {
            kind: TowerKind::Cannon,
            cost: 3,
            damage: 25.0,
            range: 2.5,
            attack_speed: 0.5,
            damage_type: DamageType::Physical,
            projectile_speed: 6.0,
            splash_radius: 1.2,
            slow_amount: 0.0,
            slow_duration: 0.0,
        },
        TowerKind::Frost => &TowerSpec {
            kind: TowerKind::Frost,
            cost: 2,
            damage: 6.0,
            range: 2.8,
            attack_speed: 0.8,
            damage_type: DamageType::Cold,
            projectile_speed: 8.0,
            splash_radius: 0.0,
            slow_amount: 0.4,
            slow_duration: 2.0,
        },
        TowerKind::Fire => &TowerSpec {
            kind: TowerKind::Fire,
            cost: 2,
            damage: 14.0,
            range: 2.6,
            attack_speed: 0.9,
            damage_type: DamageType::Fire,
            projectile_speed: 8.0,
            splash_radius: 0.0,
            slow_amount: 0.0,
            slow_duration: 0.0,
        },
        TowerKind::Storm => &TowerSpec {
            kind: TowerKind::Storm,
            cost: 4,
            damage: 18.0,
            range: 3.5,
            attack_speed: 1.1,
            damage_type: DamageType::Lightning,
            projectile_speed: 12.0,
            splash_radius: 0.0,
            slow_amount: 0.0,
            slow_duration: 0.0,
        },
    }
}

#[derive(Clone, Copy, Debug)]
pub struct UnitSpec {
    pub kind: UnitKind,
    pub base_hp: f64,
    pub base_speed: f32,
    pub gold_reward: f64,
    pub lives_cost: u32,
    pub drop_chance: f64,
}

pub fn unit_spec(kind: UnitKind) -> &'static UnitSpec {
    match kind {
        UnitKind::Basic => &UnitSpec {
            kind: UnitKind::Basic,
            base_hp: 30.0,
            base_speed: 1.0,
            gold_reward: 2.0,
            lives_cost: 1,
            drop_chance: 0.05,
        },
        UnitKind::Fast => &UnitSpec {
            kind: UnitKind::Fast,
            base_hp: 20.0,
            base_speed: 1.8,
            gold_reward: 2.0,
            lives_cost: 1,
            drop_chance: 0.08,
        },
        UnitKind::Tank => &UnitSpec {
            kind: UnitKind::Tank,
            base_hp: 90.0,
            base_speed: 0.6,
            gold_reward: 4.0,
            lives_cost: 2,
            drop_chance: 0.15,
        },
        UnitKind::Boss => &UnitSpec {
            kind: UnitKind::Boss,
            base_hp: 600.0,
            base_speed: 0.45,
            gold_reward: 25.0,
            lives_cost: 5,
            drop_chance: 0.5,
        },
    }
}

/// Per-wave hp scaling applied to the unit base.
pub fn wave_hp(kind: UnitKind, wave: u32) -> f64 {
    unit_spec(kind).base_hp * (1.0 + 0.25 * f64::from(wave.saturating_sub(1)))
}

#[derive(Clone, Copy, Debug)]
pub struct AbilitySpec {
    pub kind: AbilityKind,
    pub gold_cost: u32,
    pub radius: f64,
    pub damage: f64,
    pub damage_type: DamageType,
    pub slow_amount: f64,
    pub slow_duration: f64,
}

pub fn ability_spec(kind: AbilityKind) -> &'static AbilitySpec {
    match kind {
        AbilityKind::Meteor => &AbilitySpec {
            kind: AbilityKind::Meteor,
            gold_cost: 5,
            radius: 1.5,
            damage: 50.0,
            damage_type: DamageType::Fire,
            slow_amount: 0.0,
            slow_duration: 0.0,
        },
        AbilityKind::FrostNova => &AbilitySpec {
            kind: AbilityKind::FrostNova,
            gold_cost: 4,
            radius: 2.0,
            damage: 0.0,
            damage_type: DamageType::Cold,
            slow_amount: 0.5,
            slow_duration: 3.0,
        },
    }
}

#[cfg(test)]
mod tests {
    use towerwars_protocol::types::Rarity;

    use super::*;

    #[test]
    fn wave_scaling_starts_at_base() {
        assert_eq!(wave_hp(UnitKind::Basic, 1), 30.0);
        assert_eq!(wave_hp(UnitKind::Basic, 5), 60.0);
    }

    #[test]
    fn rare_units_reward_most() {
        let (g_normal, ..) = rarity_multipliers(Rarity::Normal);
        let (g_magic, ..) = rarity_multipliers(Rarity::Magic);
        let (g_rare, ..) = rarity_multipliers(Rarity::Rare);
        assert!(g_normal < g_magic && g_magic < g_rare);
    }
}
