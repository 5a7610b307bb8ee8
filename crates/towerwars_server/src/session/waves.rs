//! Wave composition and unit rolls.

use glam::Vec2;
use rand::rngs::StdRng;
use rand::Rng;
use towerwars_protocol::types::{Rarity, UnitKind, UnitModifiers};

use super::entities::Unit;
use crate::catalog::{unit_spec, wave_hp, GRID_CELL_SIZE};

/// Spawn-time spacing between units of a wave, in world units.
const SPAWN_SPACING: f32 = 0.6;

/// Units start this far off-map.
const SPAWN_OFFSET: f32 = 1.5;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct WavePlan {
    pub number: u32,
    pub kind: UnitKind,
    pub count: u32,
}

/// Fixed composition schedule: bosses every 10th wave, tanks every 5th,
/// fast runners every 3rd, basics otherwise.
pub fn plan_wave(number: u32) -> WavePlan {
    let kind = if number % 10 == 0 {
        UnitKind::Boss
    } else if number % 5 == 0 {
        UnitKind::Tank
    } else if number % 3 == 0 {
        UnitKind::Fast
    } else {
        UnitKind::Basic
    };

    let count = match kind {
        UnitKind::Boss => 1,
        _ => 5 + 2 * number,
    };

    WavePlan {
        number,
        kind,
        count,
    }
}

/// Early waves are all Normal; from wave 3 on, 5% Rare / 15% Magic.
pub fn roll_rarity(rng: &mut StdRng, wave: u32) -> Rarity {
    if wave < 3 {
        return Rarity::Normal;
    }

    let roll: f64 = rng.gen();
    if roll < 0.05 {
        Rarity::Rare
    } else if roll < 0.20 {
        Rarity::Magic
    } else {
        Rarity::Normal
    }
}

fn with_modifier(modifiers: UnitModifiers, index: u8) -> UnitModifiers {
    match index {
        0 => modifiers.with_phys_res(true),
        1 => modifiers.with_fire_res(true),
        2 => modifiers.with_cold_res(true),
        3 => modifiers.with_lightning_res(true),
        4 => modifiers.with_poison_res(true),
        5 => modifiers.with_swift(true),
        6 => modifiers.with_hasted(true),
        7 => modifiers.with_tough(true),
        8 => modifiers.with_armored(true),
        9 => modifiers.with_regenerating(true),
        10 => modifiers.with_shielded(true),
        11 => modifiers.with_vampiric(true),
        12 => modifiers.with_explosive(true),
        _ => modifiers.with_splitting(true),
    }
}

/// Magic units roll 1-2 modifiers, rare units 2-4, normals none. Bosses
/// are always at least Tough.
pub fn roll_modifiers(rng: &mut StdRng, rarity: Rarity, kind: UnitKind) -> UnitModifiers {
    let count = match rarity {
        Rarity::Normal => 0,
        Rarity::Magic => rng.gen_range(1..=2),
        Rarity::Rare => rng.gen_range(2..=4),
    };

    let mut modifiers = UnitModifiers::new();
    for _ in 0..count {
        modifiers = with_modifier(modifiers, rng.gen_range(0..14));
    }

    if kind == UnitKind::Boss {
        modifiers = modifiers.with_tough(true);
    }

    modifiers
}

/// Rolls one unit of a wave. `index` staggers the spawn column so units
/// enter the map in file.
pub fn roll_unit(
    rng: &mut StdRng,
    entity_id: u32,
    plan: WavePlan,
    index: u32,
    path_row: u8,
) -> Unit {
    let spec = unit_spec(plan.kind);
    let rarity = roll_rarity(rng, plan.number);
    let modifiers = roll_modifiers(rng, rarity, plan.kind);

    let mut max_hp = wave_hp(plan.kind, plan.number);
    if modifiers.tough() {
        max_hp *= 1.5;
    }

    let x = -SPAWN_OFFSET * GRID_CELL_SIZE - SPAWN_SPACING * index as f32;
    let y = (f32::from(path_row) + 0.5) * GRID_CELL_SIZE;

    Unit {
        entity_id,
        kind: plan.kind,
        rarity,
        modifiers,
        position: Vec2::new(x, y),
        direction: Vec2::X,
        base_speed: spec.base_speed,
        hp: max_hp,
        max_hp,
        shield_active: modifiers.shielded(),
        slow_amount: 0.0,
        slow_remaining: 0.0,
        lives_cost: spec.lives_cost,
        gold_reward: spec.gold_reward,
        drop_chance: spec.drop_chance,
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn wave_one_is_seven_basics() {
        let plan = plan_wave(1);
        assert_eq!(plan.kind, UnitKind::Basic);
        assert_eq!(plan.count, 7);
    }

    #[test]
    fn schedule_priorities() {
        assert_eq!(plan_wave(3).kind, UnitKind::Fast);
        assert_eq!(plan_wave(5).kind, UnitKind::Tank);
        assert_eq!(plan_wave(10).kind, UnitKind::Boss);
        assert_eq!(plan_wave(10).count, 1);
        assert_eq!(plan_wave(15).kind, UnitKind::Tank);
        assert_eq!(plan_wave(30).kind, UnitKind::Boss);
    }

    #[test]
    fn early_waves_roll_normal() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            assert_eq!(roll_rarity(&mut rng, 1), Rarity::Normal);
            assert_eq!(roll_rarity(&mut rng, 2), Rarity::Normal);
        }
    }

    #[test]
    fn bosses_are_always_tough() {
        let mut rng = StdRng::seed_from_u64(7);
        let modifiers = roll_modifiers(&mut rng, Rarity::Normal, UnitKind::Boss);
        assert!(modifiers.tough());
    }

    #[test]
    fn shielded_units_start_with_shield_up() {
        let mut rng = StdRng::seed_from_u64(11);
        let plan = plan_wave(4);

        // Roll until a shielded unit shows up; the seed makes it stable.
        let unit = (0..)
            .map(|i| roll_unit(&mut rng, i, plan, 0, 2))
            .find(|u| u.modifiers.shielded())
            .unwrap();
        assert!(unit.shield_active);
    }

    #[test]
    fn spawns_stagger_off_map() {
        let mut rng = StdRng::seed_from_u64(3);
        let plan = plan_wave(1);
        let first = roll_unit(&mut rng, 1, plan, 0, 2);
        let second = roll_unit(&mut rng, 2, plan, 1, 2);

        assert!(first.position.x < 0.0);
        assert!(second.position.x < first.position.x);
        assert_eq!(first.position.y, 2.5);
    }
}
