//! Session-owned entity state: players, towers, units, item drops, and the
//! build grid.

use glam::Vec2;
use towerwars_protocol::packets::game_s2c::PlayerInfo;
use towerwars_protocol::types::{
    DamageType, EntityData, EntityState, ItemType, PlayerState, Rarity, TowerKind, UnitKind,
    UnitModifiers,
};
use towerwars_transport::PeerId;
use uuid::Uuid;

use crate::bonus::TowerStats;
use crate::catalog::{
    ARMORED_RESISTANCE, ELEMENTAL_RESISTANCE, GRID_CELL_SIZE, STARTING_GOLD, STARTING_LIVES,
    UPGRADE_DAMAGE_BONUS, UPGRADE_RANGE_BONUS,
};

/// The build grid. Towers occupy whole cells; the unit path runs along the
/// middle row and cannot be built on.
#[derive(Debug)]
pub struct Grid {
    width: u8,
    height: u8,
    occupied: std::collections::HashMap<(u8, u8), u32>,
}

impl Grid {
    pub fn new(width: u8, height: u8) -> Self {
        Self {
            width,
            height,
            occupied: Default::default(),
        }
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    pub fn height(&self) -> u8 {
        self.height
    }

    /// The row units walk along.
    pub fn path_row(&self) -> u8 {
        self.height / 2
    }

    /// World position of the centre of a cell.
    pub fn cell_center(&self, gx: u8, gy: u8) -> Vec2 {
        Vec2::new(
            (f32::from(gx) + 0.5) * GRID_CELL_SIZE,
            (f32::from(gy) + 0.5) * GRID_CELL_SIZE,
        )
    }

    /// World x beyond which a unit has leaked off the map.
    pub fn leak_x(&self) -> f32 {
        f32::from(self.width) * GRID_CELL_SIZE
    }

    /// In bounds, off the path, and unoccupied.
    pub fn is_buildable(&self, gx: u8, gy: u8) -> bool {
        gx < self.width
            && gy < self.height
            && gy != self.path_row()
            && !self.occupied.contains_key(&(gx, gy))
    }

    pub fn occupy(&mut self, gx: u8, gy: u8, entity_id: u32) {
        self.occupied.insert((gx, gy), entity_id);
    }

    pub fn free(&mut self, gx: u8, gy: u8) {
        self.occupied.remove(&(gx, gy));
    }

    pub fn occupant(&self, gx: u8, gy: u8) -> Option<u32> {
        self.occupied.get(&(gx, gy)).copied()
    }
}

/// Per-player state inside a session.
#[derive(Debug)]
pub struct Player {
    pub player_id: u32,
    pub peer: Option<PeerId>,
    pub user_id: Uuid,
    pub character_id: Uuid,
    pub team_id: u8,
    pub gold: u32,
    pub lives: u32,
    pub score: u32,
    pub is_ready: bool,
    pub connected: bool,
    pub last_input_sequence: u32,
    /// Shared ability cooldown, seconds remaining.
    pub ability_cooldown: f32,
    pub units_killed: u32,
    pub towers_built: u32,
    pub gold_earned: u32,
}

impl Player {
    pub fn new(
        player_id: u32,
        peer: PeerId,
        user_id: Uuid,
        character_id: Uuid,
        team_id: u8,
    ) -> Self {
        Self {
            player_id,
            peer: Some(peer),
            user_id,
            character_id,
            team_id,
            gold: STARTING_GOLD,
            lives: STARTING_LIVES,
            score: 0,
            is_ready: false,
            connected: true,
            last_input_sequence: 0,
            ability_cooldown: 0.0,
            units_killed: 0,
            towers_built: 0,
            gold_earned: 0,
        }
    }

    pub fn to_state(&self) -> PlayerState {
        PlayerState {
            player_id: self.player_id,
            user_id: self.user_id,
            gold: self.gold,
            lives: self.lives,
            score: self.score,
            team_id: self.team_id,
            is_ready: self.is_ready,
            connected: self.connected,
        }
    }

    pub fn to_info(&self) -> PlayerInfo {
        PlayerInfo {
            player_id: self.player_id,
            user_id: self.user_id,
            character_id: self.character_id,
            team_id: self.team_id,
        }
    }
}

/// A placed tower.
#[derive(Debug)]
pub struct Tower {
    pub entity_id: u32,
    /// Durable identity the stats were resolved for.
    pub player_tower_id: Uuid,
    pub owner_player_id: u32,
    pub owner_user_id: Uuid,
    pub kind: TowerKind,
    pub gx: u8,
    pub gy: u8,
    pub position: Vec2,
    pub hp: f64,
    pub upgrade_level: u8,
    /// Seconds until the next attack may fire.
    pub attack_cooldown: f64,
    pub stats: TowerStats,
    /// Total gold sunk into this tower (build plus upgrades).
    pub invested_gold: u32,
}

impl Tower {
    pub fn effective_damage(&self) -> f64 {
        self.stats.damage * (1.0 + UPGRADE_DAMAGE_BONUS * f64::from(self.upgrade_level))
    }

    pub fn effective_range(&self) -> f64 {
        self.stats.range * (1.0 + UPGRADE_RANGE_BONUS * f64::from(self.upgrade_level))
    }

    /// Attack reach in world units.
    pub fn reach(&self) -> f32 {
        self.effective_range() as f32 * GRID_CELL_SIZE
    }

    pub fn to_entity_state(&self) -> EntityState {
        EntityState {
            entity_id: self.entity_id,
            position: self.position,
            hp: self.hp as f32,
            max_hp: self.stats.max_hp as f32,
            data: EntityData::Tower {
                owner_player_id: self.owner_player_id,
                tower_type: self.kind,
                gx: self.gx,
                gy: self.gy,
                upgrade_level: self.upgrade_level,
                range: self.effective_range() as f32,
                attack_speed: self.stats.attack_speed as f32,
            },
        }
    }
}

/// A wave unit walking the path.
#[derive(Debug)]
pub struct Unit {
    pub entity_id: u32,
    pub kind: UnitKind,
    pub rarity: Rarity,
    pub modifiers: UnitModifiers,
    pub position: Vec2,
    pub direction: Vec2,
    pub base_speed: f32,
    pub hp: f64,
    pub max_hp: f64,
    /// True until the Shielded modifier has absorbed a hit.
    pub shield_active: bool,
    pub slow_amount: f32,
    pub slow_remaining: f32,
    pub lives_cost: u32,
    pub gold_reward: f64,
    pub drop_chance: f64,
}

impl Unit {
    /// Current speed after innate modifiers and any active slow.
    pub fn speed(&self) -> f32 {
        let mut speed = self.base_speed;
        if self.modifiers.swift() {
            speed *= 1.3;
        }
        if self.modifiers.hasted() {
            speed *= 1.5;
        }
        if self.slow_remaining > 0.0 {
            speed *= 1.0 - self.slow_amount;
        }
        speed
    }

    /// Innate resistance against `damage_type`, before the global cap.
    /// Chaos damage is resisted by poison resistance; nothing innately
    /// resists holy.
    pub fn resistance(&self, damage_type: DamageType) -> f64 {
        let elemental = match damage_type {
            DamageType::Physical => self.modifiers.phys_res(),
            DamageType::Fire => self.modifiers.fire_res(),
            DamageType::Cold => self.modifiers.cold_res(),
            DamageType::Lightning => self.modifiers.lightning_res(),
            DamageType::Chaos => self.modifiers.poison_res(),
            DamageType::Holy => false,
        };

        let mut resistance = if elemental { ELEMENTAL_RESISTANCE } else { 0.0 };
        if self.modifiers.armored() {
            resistance += ARMORED_RESISTANCE;
        }
        resistance
    }

    /// Applies a slow, keeping whichever effect is strongest.
    pub fn apply_slow(&mut self, amount: f32, duration: f32) {
        if amount >= self.slow_amount {
            self.slow_amount = amount;
            self.slow_remaining = self.slow_remaining.max(duration);
        }
    }

    pub fn to_entity_state(&self) -> EntityState {
        EntityState {
            entity_id: self.entity_id,
            position: self.position,
            hp: self.hp as f32,
            max_hp: self.max_hp as f32,
            data: EntityData::Unit {
                kind: self.kind,
                rarity: self.rarity,
                modifiers: self.modifiers,
                speed: self.speed(),
                direction: self.direction,
            },
        }
    }
}

/// A transient pickup created on a kill or wave clear.
#[derive(Debug)]
pub struct ItemDrop {
    pub entity_id: u32,
    /// Session-scoped monotonic drop identity, used in collect requests.
    pub drop_id: u32,
    pub position: Vec2,
    pub item_type: ItemType,
    pub rarity: Rarity,
    pub item_level: u32,
    pub name: String,
    pub owner_player_id: u32,
    pub owner_user_id: Uuid,
    pub is_collected: bool,
    /// Seconds since the drop appeared.
    pub age: f32,
}

impl ItemDrop {
    pub fn to_entity_state(&self) -> EntityState {
        EntityState {
            entity_id: self.entity_id,
            position: self.position,
            hp: 0.0,
            max_hp: 0.0,
            data: EntityData::ItemDrop {
                drop_id: self.drop_id,
                owner_player_id: self.owner_player_id,
                item_type: self.item_type,
                rarity: self.rarity,
                item_level: self.item_level,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_row_is_not_buildable() {
        let grid = Grid::new(10, 5);
        assert_eq!(grid.path_row(), 2);
        assert!(!grid.is_buildable(3, 2));
        assert!(grid.is_buildable(3, 1));
        assert!(!grid.is_buildable(10, 1));
    }

    #[test]
    fn occupancy_blocks_and_frees() {
        let mut grid = Grid::new(10, 5);
        grid.occupy(1, 1, 42);
        assert!(!grid.is_buildable(1, 1));
        assert_eq!(grid.occupant(1, 1), Some(42));
        grid.free(1, 1);
        assert!(grid.is_buildable(1, 1));
    }

    #[test]
    fn slow_keeps_strongest_effect() {
        let mut unit = Unit {
            entity_id: 1,
            kind: UnitKind::Basic,
            rarity: Rarity::Normal,
            modifiers: UnitModifiers::new(),
            position: Vec2::ZERO,
            direction: Vec2::X,
            base_speed: 1.0,
            hp: 30.0,
            max_hp: 30.0,
            shield_active: false,
            slow_amount: 0.0,
            slow_remaining: 0.0,
            lives_cost: 1,
            gold_reward: 2.0,
            drop_chance: 0.05,
        };

        unit.apply_slow(0.5, 2.0);
        unit.apply_slow(0.3, 10.0);
        assert_eq!(unit.slow_amount, 0.5);
        assert_eq!(unit.slow_remaining, 2.0);
        assert_eq!(unit.speed(), 0.5);
    }

    #[test]
    fn chaos_is_resisted_by_poison_res() {
        let unit = Unit {
            entity_id: 1,
            kind: UnitKind::Basic,
            rarity: Rarity::Normal,
            modifiers: UnitModifiers::new().with_poison_res(true).with_armored(true),
            position: Vec2::ZERO,
            direction: Vec2::X,
            base_speed: 1.0,
            hp: 30.0,
            max_hp: 30.0,
            shield_active: false,
            slow_amount: 0.0,
            slow_remaining: 0.0,
            lives_cost: 1,
            gold_reward: 2.0,
            drop_chance: 0.05,
        };

        assert_eq!(unit.resistance(DamageType::Chaos), 0.45);
        assert_eq!(unit.resistance(DamageType::Fire), 0.15);
        assert_eq!(unit.resistance(DamageType::Holy), 0.15);
    }
}
