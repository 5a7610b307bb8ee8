//! Unit movement, tower targeting, damage resolution, the kill pipeline
//! and wave completion.

use glam::Vec2;
use rand::Rng;
use towerwars_events::GameEvent;
use towerwars_protocol::packets::game_c2s::AbilityUseC2s;
use towerwars_protocol::packets::game_s2c::{EntityDestroyS2c, WaveEndS2c};
use towerwars_protocol::types::{
    DamageType, DestroyReason, ErrorCode, GameMode, MatchResult, Rarity, UnitKind,
};
use towerwars_protocol::Message;
use tracing::debug;
use uuid::Uuid;

use super::game::{GameSession, SessionState};
use crate::catalog::{
    self, ability_spec, rarity_multipliers, wave_completion_gold, ABILITY_COOLDOWN, RESISTANCE_CAP,
    VICTORY_WAVE,
};

/// What applying damage to a unit did.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) enum DamageOutcome {
    /// The Shielded modifier absorbed the hit entirely.
    Absorbed,
    Damaged,
    /// Hit point total reached zero; the caller must run the kill pipeline.
    Killed,
}

/// Who gets the rewards for a kill.
#[derive(Copy, Clone, Debug)]
pub(crate) enum KillCredit {
    Tower(u32),
    /// Ability kills credit the casting player directly.
    Player(u32),
}

impl GameSession {
    /// Movement, regeneration and leak handling.
    ///
    /// The leak check runs against the position entering the tick, so a
    /// unit killed by a tower in the same step it crossed the edge counts
    /// as a kill, not a leak.
    pub(crate) fn update_units(&mut self, dt: f32) {
        let leak_x = self.grid.leak_x();
        let mut leaked = Vec::new();

        for unit in self.units.values_mut() {
            if unit.position.x >= leak_x {
                leaked.push(unit.entity_id);
                continue;
            }

            if unit.slow_remaining > 0.0 {
                unit.slow_remaining -= dt;
                if unit.slow_remaining <= 0.0 {
                    unit.slow_remaining = 0.0;
                    unit.slow_amount = 0.0;
                }
            }

            if unit.modifiers.regenerating() {
                unit.hp = (unit.hp + unit.max_hp * 0.02 * f64::from(dt)).min(unit.max_hp);
            }

            unit.position += unit.direction * unit.speed() * dt;
        }

        for entity_id in leaked {
            self.leak_unit(entity_id);
            if self.is_over() {
                return;
            }
        }
    }

    fn leak_unit(&mut self, entity_id: u32) {
        let Some(unit) = self.units.remove(&entity_id) else {
            return;
        };
        self.units_leaked_this_wave += 1;

        self.broadcast(Message::EntityDestroy(EntityDestroyS2c {
            tick: self.current_tick,
            entity_id,
            reason: DestroyReason::ReachedEnd,
        }));

        let player_ids: Vec<u32> = self.players.keys().copied().collect();
        for player_id in player_ids {
            self.damage_player(player_id, unit.lives_cost);
            if self.is_over() {
                return;
            }
        }
    }

    pub(crate) fn damage_player(&mut self, player_id: u32, damage: u32) {
        let Some(player) = self.players.get_mut(&player_id) else {
            return;
        };
        player.lives = player.lives.saturating_sub(damage);
        let remaining = player.lives;

        self.publisher.publish(
            self.match_id,
            GameEvent::PlayerDamaged(towerwars_events::PlayerDamaged {
                player_id,
                damage,
                remaining_lives: remaining,
            }),
        );

        if remaining == 0 {
            let defeated = match self.mode {
                GameMode::Solo => true,
                _ => self.players.values().all(|p| p.lives == 0),
            };
            if defeated {
                self.end_match(MatchResult::Defeat);
            }
        }
    }

    /// Cooldown bookkeeping and attacks for every tower.
    pub(crate) fn update_towers(&mut self, dt: f32) {
        let mut ready = Vec::new();
        for (&entity_id, tower) in self.towers.iter_mut() {
            tower.attack_cooldown = (tower.attack_cooldown - f64::from(dt)).max(0.0);
            if tower.attack_cooldown <= 0.0 {
                ready.push(entity_id);
            }
        }

        for tower_id in ready {
            self.tower_attack(tower_id);
            if self.is_over() {
                return;
            }
        }
    }

    fn tower_attack(&mut self, tower_id: u32) {
        let Some(tower) = self.towers.get(&tower_id) else {
            return;
        };
        let position = tower.position;
        let reach = tower.reach();
        let target_count = if tower.stats.hits_multiple {
            u32::from(tower.stats.max_targets.max(1))
        } else {
            1
        };

        let targets = self.select_targets(position, reach, target_count);
        if targets.is_empty() {
            return;
        }

        if let Some(tower) = self.towers.get_mut(&tower_id) {
            tower.attack_cooldown = 1.0 / tower.stats.attack_speed.max(0.01);
        }

        for unit_id in targets {
            self.strike(tower_id, unit_id);
            if self.towers.get(&tower_id).is_none() || self.is_over() {
                return;
            }
        }
    }

    /// Live units within `reach` of `position`, nearest first, ties broken
    /// by the smaller entity id. A unit at exactly `reach` is in range.
    pub(crate) fn select_targets(&self, position: Vec2, reach: f32, count: u32) -> Vec<u32> {
        let mut in_range: Vec<(f32, u32)> = self
            .units
            .values()
            .filter_map(|u| {
                let distance = u.position.distance(position);
                (distance <= reach).then_some((distance, u.entity_id))
            })
            .collect();

        in_range.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });

        in_range
            .into_iter()
            .take(count as usize)
            .map(|(_, id)| id)
            .collect()
    }

    /// One attack from a tower against one unit, including crit roll,
    /// splash and on-hit slow.
    fn strike(&mut self, tower_id: u32, unit_id: u32) {
        let Some(tower) = self.towers.get(&tower_id) else {
            return;
        };
        let damage = tower.effective_damage();
        let crit_chance = tower.stats.crit_chance;
        let crit_multiplier = tower.stats.crit_multiplier;
        let damage_type = tower.stats.damage_type;
        let splash_radius = tower.stats.splash_radius;
        let slow = (tower.stats.slow_amount, tower.stats.slow_duration);

        let is_crit = self.rng.gen::<f64>() < crit_chance / 100.0;
        let raw = if is_crit {
            damage * crit_multiplier / 100.0
        } else {
            damage
        };

        let splash_center = self.units.get(&unit_id).map(|u| u.position);
        let outcome = self.damage_unit(unit_id, raw, damage_type);

        if outcome == Some(DamageOutcome::Damaged) && slow.0 > 0.0 {
            if let Some(unit) = self.units.get_mut(&unit_id) {
                unit.apply_slow(slow.0 as f32, slow.1 as f32);
            }
        }
        if outcome == Some(DamageOutcome::Killed) {
            self.kill_unit(unit_id, KillCredit::Tower(tower_id), is_crit);
            if self.is_over() {
                return;
            }
        }

        // Splash damages everything else around the impact point, without
        // re-rolling the crit.
        if splash_radius > 0.0 {
            if let Some(center) = splash_center {
                let victims: Vec<u32> = self
                    .units
                    .values()
                    .filter(|u| {
                        u.entity_id != unit_id
                            && u.position.distance(center) <= splash_radius as f32
                    })
                    .map(|u| u.entity_id)
                    .collect();

                for victim in victims {
                    if self.damage_unit(victim, damage, damage_type)
                        == Some(DamageOutcome::Killed)
                    {
                        self.kill_unit(victim, KillCredit::Tower(tower_id), false);
                        if self.is_over() {
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Applies raw damage to a unit, honoring shield and resistances.
    /// Does not remove killed units; the caller runs the kill pipeline.
    pub(crate) fn damage_unit(
        &mut self,
        unit_id: u32,
        raw: f64,
        damage_type: DamageType,
    ) -> Option<DamageOutcome> {
        let unit = self.units.get_mut(&unit_id)?;

        if unit.shield_active && unit.modifiers.shielded() {
            unit.shield_active = false;
            return Some(DamageOutcome::Absorbed);
        }

        let resistance = unit.resistance(damage_type).min(RESISTANCE_CAP);
        let final_damage = (raw * (1.0 - resistance)).floor();
        unit.hp -= final_damage;

        if unit.hp <= 0.0 {
            Some(DamageOutcome::Killed)
        } else {
            Some(DamageOutcome::Damaged)
        }
    }

    /// Removes a dead unit and pays out gold, XP and the drop roll.
    pub(crate) fn kill_unit(&mut self, unit_id: u32, credit: KillCredit, is_crit: bool) {
        let Some(unit) = self.units.remove(&unit_id) else {
            return;
        };
        self.units_killed_this_wave += 1;

        self.broadcast(Message::EntityDestroy(EntityDestroyS2c {
            tick: self.current_tick,
            entity_id: unit_id,
            reason: DestroyReason::Killed,
        }));

        let (gold_mult, xp_mult, drop_mult) = rarity_multipliers(unit.rarity);

        let (player_id, killer_tower_uuid, gold_find, xp_gain) = match credit {
            KillCredit::Tower(tower_id) => match self.towers.get(&tower_id) {
                Some(tower) => (
                    tower.owner_player_id,
                    tower.player_tower_id,
                    tower.stats.gold_find_percent,
                    tower.stats.xp_gain_percent,
                ),
                None => return,
            },
            KillCredit::Player(player_id) => (player_id, Uuid::nil(), 0.0, 0.0),
        };

        let gold = (unit.gold_reward * gold_mult * (1.0 + gold_find / 100.0)).floor() as u32;
        if let Some(player) = self.players.get_mut(&player_id) {
            player.gold += gold;
            player.gold_earned += gold;
            player.score += gold;
            player.units_killed += 1;
        }

        if let KillCredit::Tower(_) = credit {
            let mut xp = catalog::xp::UNIT_KILL;
            if unit.kind == UnitKind::Boss {
                xp += catalog::xp::BOSS_BONUS;
            }
            let xp = (xp as f64 * xp_mult * (1.0 + xp_gain / 100.0)).floor() as u64;
            self.accumulate_xp(killer_tower_uuid, player_id, xp);
        }

        let drop_chance = unit.drop_chance * drop_mult;
        if self.rng.gen::<f64>() < drop_chance {
            self.spawn_drop(unit.position, player_id, Rarity::Normal, "kill");
        }

        self.publisher.publish(
            self.match_id,
            GameEvent::UnitKilled(towerwars_events::UnitKilled {
                player_id,
                unit_id,
                unit_type: unit.kind.name().to_owned(),
                unit_rarity: unit.rarity.name().to_owned(),
                killer_tower_id: killer_tower_uuid,
                gold_awarded: gold,
                is_critical: is_crit,
            }),
        );
    }

    pub(crate) fn handle_ability(&mut self, player_id: u32, pkt: &AbilityUseC2s) {
        if !matches!(
            self.state,
            SessionState::Preparation | SessionState::WaveActive
        ) {
            self.send_error(player_id, ErrorCode::WrongState, "cannot cast now", None);
            return;
        }

        let spec = ability_spec(pkt.ability);

        let Some(player) = self.players.get_mut(&player_id) else {
            return;
        };
        if player.ability_cooldown > 0.0 {
            self.send_error(player_id, ErrorCode::WrongState, "ability on cooldown", None);
            return;
        }
        if player.gold < spec.gold_cost {
            self.send_error(player_id, ErrorCode::InsufficientGold, "not enough gold", None);
            return;
        }
        player.gold -= spec.gold_cost;
        player.ability_cooldown = ABILITY_COOLDOWN;

        let victims: Vec<u32> = self
            .units
            .values()
            .filter(|u| u.position.distance(pkt.target) <= spec.radius as f32)
            .map(|u| u.entity_id)
            .collect();

        debug!(
            match_id = %self.match_id,
            ability = spec.kind.name(),
            victims = victims.len(),
            "ability cast"
        );

        for unit_id in victims {
            if spec.damage > 0.0 {
                if self.damage_unit(unit_id, spec.damage, spec.damage_type)
                    == Some(DamageOutcome::Killed)
                {
                    self.kill_unit(unit_id, KillCredit::Player(player_id), false);
                    if self.is_over() {
                        return;
                    }
                    continue;
                }
            }
            if spec.slow_amount > 0.0 {
                if let Some(unit) = self.units.get_mut(&unit_id) {
                    unit.apply_slow(spec.slow_amount as f32, spec.slow_duration as f32);
                }
            }
        }

        self.publisher.publish(
            self.match_id,
            GameEvent::AbilityUsed(towerwars_events::AbilityUsed {
                player_id,
                ability_type: spec.kind.name().to_owned(),
                target_x: pkt.target.x,
                target_y: pkt.target.y,
            }),
        );
    }

    /// Wave cleared: pay the completion bonus, accumulate wave XP, roll the
    /// end-of-wave drops, publish, and either advance or finish the match.
    pub(crate) fn complete_wave(&mut self) {
        let wave = self.current_wave;
        let perfect = self.units_leaked_this_wave == 0;
        let bonus = wave_completion_gold(wave);
        self.completed_waves = wave;

        for player in self.players.values_mut() {
            player.gold += bonus;
            player.gold_earned += bonus;
        }

        self.broadcast(Message::WaveEnd(WaveEndS2c {
            wave_number: wave,
            success: true,
            bonus_gold: bonus,
        }));

        let mut clear_xp = catalog::xp::WAVE_CLEAR;
        if perfect {
            clear_xp += catalog::xp::PERFECT_WAVE;
        }
        let awards: Vec<(Uuid, u32, u64)> = self
            .towers
            .values()
            .map(|t| {
                let scaled =
                    (clear_xp as f64 * (1.0 + t.stats.xp_gain_percent / 100.0)).floor() as u64;
                (t.player_tower_id, t.owner_player_id, scaled)
            })
            .collect();
        for (player_tower_id, player_id, amount) in awards {
            self.accumulate_xp(player_tower_id, player_id, amount);
        }

        let drop_chance = catalog::wave_drop_chance(wave);
        let center = Vec2::new(
            self.grid.leak_x() / 2.0,
            (f32::from(self.grid.path_row()) + 0.5) * catalog::GRID_CELL_SIZE,
        );
        let player_ids: Vec<u32> = self.players.keys().copied().collect();
        for player_id in player_ids {
            if perfect {
                // A perfect wave guarantees a drop of at least Magic rarity.
                self.spawn_drop(center, player_id, Rarity::Magic, "wave");
            } else if self.rng.gen::<f64>() < drop_chance {
                self.spawn_drop(center, player_id, Rarity::Normal, "wave");
            }
        }

        self.flush_tower_xp("wave");

        self.publisher.publish(
            self.match_id,
            GameEvent::WaveCompleted(towerwars_events::WaveCompleted {
                wave_number: wave,
                units_killed: self.units_killed_this_wave,
                units_leaked: self.units_leaked_this_wave,
                is_perfect: perfect,
            }),
        );

        if wave >= VICTORY_WAVE {
            self.end_match(MatchResult::Victory);
            return;
        }

        self.state = SessionState::Preparation;
        self.wave_timer = Some(catalog::PREPARATION_DELAY);
    }
}
