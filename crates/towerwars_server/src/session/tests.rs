//! End-to-end session scenarios driven through the public packet surface,
//! with internal access for the boundary cases.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use glam::Vec2;
use tokio::runtime::Runtime;
use towerwars_events::{spawn_publisher, EventRecord, MemoryStream};
use towerwars_protocol::packets::game_c2s::*;
use towerwars_protocol::stats::BonusKind;
use towerwars_protocol::types::{
    DestroyReason, ErrorCode, GameMode, MatchResult, Rarity, UnitKind, UnitModifiers,
};
use towerwars_protocol::Message;
use towerwars_transport::PeerId;
use uuid::Uuid;

use super::combat::{DamageOutcome, KillCredit};
use super::entities::Unit;
use super::{GameSession, SessionContext, SessionManager, SessionState};
use crate::bonus::{StaticBonusProvider, TowerLoadout};
use crate::catalog::{self, STARTING_GOLD};
use crate::scheduler::TICK_INTERVAL;
use crate::sink::testing::RecordingSink;
use crate::token::Credentials;

struct Harness {
    /// Kept alive for the spawned lookups and the publisher worker.
    _runtime: Runtime,
    sink: RecordingSink,
    stream: MemoryStream,
    provider: StaticBonusProvider,
    session: GameSession,
}

fn creds() -> Credentials {
    Credentials {
        user_id: Uuid::new_v4(),
        character_id: Uuid::new_v4(),
    }
}

fn harness(mode: GameMode, seed: u64) -> Harness {
    let runtime = Runtime::new().unwrap();
    let sink = RecordingSink::new();
    let stream = MemoryStream::new();
    let provider = StaticBonusProvider::new();
    let publisher = spawn_publisher(stream.clone(), runtime.handle());

    let session = GameSession::new(
        Uuid::new_v4(),
        mode,
        SessionContext {
            sink: Arc::new(sink.clone()),
            publisher,
            bonus_provider: Arc::new(provider.clone()),
            runtime: runtime.handle().clone(),
            rng_seed: seed,
        },
    );

    Harness {
        _runtime: runtime,
        sink,
        stream,
        provider,
        session,
    }
}

impl Harness {
    fn join(&mut self, peer: u32) -> u32 {
        self.session.join(PeerId(peer), creds()).unwrap()
    }

    fn packet(&mut self, peer: u32, msg: Message) {
        self.session.handle_packet(PeerId(peer), &msg);
    }

    /// Runs `seconds` of simulation at the fixed tick rate.
    fn advance(&mut self, seconds: f32) {
        let steps = (seconds / TICK_INTERVAL).round() as u32;
        for _ in 0..steps {
            self.session.update(TICK_INTERVAL);
            self.session.tick();
        }
    }

    /// Lets off-thread work (bonus lookups, the publisher drain) land.
    fn settle(&self) {
        std::thread::sleep(Duration::from_millis(80));
    }

    fn events(&self) -> Vec<EventRecord> {
        self.settle();
        self.stream.records()
    }

    fn events_of(&self, event_type: &str) -> Vec<EventRecord> {
        self.events()
            .into_iter()
            .filter(|r| r.event_type() == Some(event_type))
            .collect()
    }

    fn build(&mut self, peer: u32, request_id: u32, player_tower_id: Uuid, gx: u8, gy: u8) {
        self.packet(
            peer,
            Message::TowerBuild(TowerBuildC2s {
                request_id,
                player_tower_id,
                tower_type: towerwars_protocol::types::TowerKind::Arrow,
                gx,
                gy,
            }),
        );
        self.settle();
        // The continuation commits at the top of the next update.
        self.session.update(TICK_INTERVAL);
    }

    /// Drives a solo session to the Preparation phase.
    fn to_preparation(&mut self, peer: u32) {
        self.packet(peer, Message::ReadyState(ReadyStateC2s { is_ready: true }));
        self.advance(catalog::PREPARATION_DELAY + 0.1);
        assert_eq!(self.session.state(), SessionState::Preparation);
    }
}

fn check_invariants(session: &GameSession) {
    // Entity ids are unique across towers, units and drops.
    let mut seen = HashSet::new();
    for id in session
        .towers
        .keys()
        .chain(session.units.keys())
        .chain(session.drops.keys())
    {
        assert!(seen.insert(*id), "duplicate entity id {id}");
        assert!(*id < session.next_entity_id);
    }

    // At most one tower per cell.
    let mut cells = HashSet::new();
    for tower in session.towers.values() {
        assert!(
            cells.insert((tower.gx, tower.gy)),
            "two towers share cell ({}, {})",
            tower.gx,
            tower.gy
        );
        assert!(tower.attack_cooldown >= 0.0);
        assert!(tower.hp >= 0.0);
    }
}

#[test]
fn solo_first_wave_flow() {
    let mut h = harness(GameMode::Solo, 1);
    let peer = 7;
    h.join(peer);

    assert_eq!(h.session.state(), SessionState::WaitingForPlayers);
    h.packet(peer, Message::ReadyState(ReadyStateC2s { is_ready: true }));

    // Five seconds to match start...
    h.advance(catalog::PREPARATION_DELAY + 0.1);
    let sent = h.sink.sent_to(PeerId(peer));
    assert!(sent.iter().any(|m| matches!(m, Message::MatchStart(_))));
    assert_eq!(h.session.state(), SessionState::Preparation);

    // ...five more to the first wave.
    h.advance(catalog::PREPARATION_DELAY + 0.1);
    assert_eq!(h.session.state(), SessionState::WaveActive);

    let sent = h.sink.sent_to(PeerId(peer));
    let wave_start = sent
        .iter()
        .find_map(|m| match m {
            Message::WaveStart(w) => Some(*w),
            _ => None,
        })
        .expect("wave start announced");
    assert_eq!(wave_start.wave_number, 1);
    assert_eq!(wave_start.wave_info.kind, UnitKind::Basic);
    assert_eq!(wave_start.wave_info.count, 7);

    // Seven spawns with strictly increasing entity ids.
    let spawn_ids: Vec<u32> = sent
        .iter()
        .filter_map(|m| match m {
            Message::EntitySpawn(s) => Some(s.entity.entity_id),
            _ => None,
        })
        .collect();
    assert_eq!(spawn_ids.len(), 7);
    assert!(spawn_ids.windows(2).all(|w| w[0] < w[1]));

    assert_eq!(h.events_of("match.started").len(), 1);
    check_invariants(&h.session);
}

#[test]
fn build_composes_bonuses() {
    let mut h = harness(GameMode::Solo, 2);
    let peer = 1;
    let player_id = h.join(peer);

    let player_tower_id = Uuid::new_v4();
    h.provider.insert(
        player_tower_id,
        TowerLoadout {
            bonuses: [
                (BonusKind::DamagePercent, 50.0),
                (BonusKind::DamageFlat, 2.0),
            ]
            .into_iter()
            .collect(),
            weapon: None,
        },
    );

    h.to_preparation(peer);
    h.build(peer, 1, player_tower_id, 2, 0);

    let player = h.session.player(player_id).unwrap();
    assert_eq!(player.gold, STARTING_GOLD - 1);

    let tower = h.session.towers().next().expect("tower committed");
    assert_eq!(tower.stats.damage, 17.0);
    assert_eq!(tower.stats.range, 3.0);
    assert_eq!(tower.stats.max_hp, 100.0);

    let built = h.events_of("tower.built");
    assert_eq!(built.len(), 1);
    assert_eq!(built[0].field("GoldSpent"), Some("1"));
    check_invariants(&h.session);
}

#[test]
fn insufficient_gold_leaves_state_unchanged() {
    let mut h = harness(GameMode::Solo, 3);
    let peer = 1;
    let player_id = h.join(peer);
    h.to_preparation(peer);

    // Storm costs 4, then 4 again (floor of 4.8); the third (floor of
    // 5.6 = 5) exceeds the 2 gold left.
    for (request, gx) in [(1u32, 0u8), (2, 1)] {
        h.packet(
            peer,
            Message::TowerBuild(TowerBuildC2s {
                request_id: request,
                player_tower_id: Uuid::nil(),
                tower_type: towerwars_protocol::types::TowerKind::Storm,
                gx,
                gy: 0,
            }),
        );
        h.settle();
        h.session.update(TICK_INTERVAL);
    }
    assert_eq!(h.session.player(player_id).unwrap().gold, 2);
    assert_eq!(h.session.towers().count(), 2);

    h.packet(
        peer,
        Message::TowerBuild(TowerBuildC2s {
            request_id: 3,
            player_tower_id: Uuid::nil(),
            tower_type: towerwars_protocol::types::TowerKind::Storm,
            gx: 2,
            gy: 0,
        }),
    );
    h.settle();
    h.session.update(TICK_INTERVAL);

    assert_eq!(h.session.player(player_id).unwrap().gold, 2);
    assert_eq!(h.session.towers().count(), 2);

    let errors: Vec<_> = h
        .sink
        .sent_to(PeerId(peer))
        .into_iter()
        .filter_map(|m| match m {
            Message::Error(e) => Some(e),
            _ => None,
        })
        .collect();
    assert!(errors
        .iter()
        .any(|e| e.code == ErrorCode::InsufficientGold && e.request_id == Some(3)));

    assert_eq!(h.events_of("tower.built").len(), 2);
    check_invariants(&h.session);
}

#[test]
fn failed_bonus_lookup_refunds_gold() {
    struct FailingProvider;
    impl crate::bonus::TowerBonusProvider for FailingProvider {
        fn resolve(
            &self,
            _player_tower_id: Uuid,
        ) -> crate::token::BoxFuture<'_, anyhow::Result<TowerLoadout>> {
            Box::pin(async { anyhow::bail!("progression service down") })
        }
    }

    let runtime = Runtime::new().unwrap();
    let sink = RecordingSink::new();
    let stream = MemoryStream::new();
    let publisher = spawn_publisher(stream.clone(), runtime.handle());
    let mut session = GameSession::new(
        Uuid::new_v4(),
        GameMode::Solo,
        SessionContext {
            sink: Arc::new(sink.clone()),
            publisher,
            bonus_provider: Arc::new(FailingProvider),
            runtime: runtime.handle().clone(),
            rng_seed: 4,
        },
    );

    let peer = PeerId(1);
    let player_id = session.join(peer, creds()).unwrap();
    session.handle_packet(peer, &Message::ReadyState(ReadyStateC2s { is_ready: true }));
    for _ in 0..250 {
        session.update(TICK_INTERVAL);
    }
    assert_eq!(session.state(), SessionState::Preparation);

    session.handle_packet(
        peer,
        &Message::TowerBuild(TowerBuildC2s {
            request_id: 9,
            player_tower_id: Uuid::new_v4(),
            tower_type: towerwars_protocol::types::TowerKind::Arrow,
            gx: 1,
            gy: 0,
        }),
    );
    std::thread::sleep(Duration::from_millis(80));
    session.update(TICK_INTERVAL);

    // The tower is not committed and the gold came back in full.
    assert_eq!(session.towers.len(), 0);
    assert_eq!(session.player(player_id).unwrap().gold, STARTING_GOLD);
    assert!(sink.sent_to(peer).iter().any(|m| matches!(
        m,
        Message::Error(e) if e.code == ErrorCode::InternalError && e.request_id == Some(9)
    )));
}

#[test]
fn kill_drop_collect_ownership() {
    let mut h = harness(GameMode::Coop, 5);
    let owner_peer = 1;
    let thief_peer = 2;
    let owner = h.join(owner_peer);
    let thief = h.join(thief_peer);
    assert_ne!(owner, thief);

    // A drop owned by the first player lands on the field.
    h.session
        .spawn_drop(Vec2::new(3.0, 3.0), owner, Rarity::Normal, "kill");
    let drop_id = h.session.drops.values().next().unwrap().drop_id;

    // The wrong player cannot take it.
    h.packet(
        thief_peer,
        Message::ItemCollect(ItemCollectC2s {
            request_id: 1,
            drop_id,
        }),
    );
    let acks = h.sink.sent_to(PeerId(thief_peer));
    let ack = acks
        .iter()
        .find_map(|m| match m {
            Message::ItemCollectAck(a) => Some(a.clone()),
            _ => None,
        })
        .expect("collect rejected");
    assert!(!ack.success);
    assert_eq!(ack.error, Some(ErrorCode::NotItemOwner));

    // The owner can, exactly once.
    h.packet(
        owner_peer,
        Message::ItemCollect(ItemCollectC2s {
            request_id: 2,
            drop_id,
        }),
    );
    let acks = h.sink.sent_to(PeerId(owner_peer));
    let ack = acks
        .iter()
        .find_map(|m| match m {
            Message::ItemCollectAck(a) => Some(a.clone()),
            _ => None,
        })
        .expect("collect acked");
    assert!(ack.success);
    assert!(ack.item_id.is_some());

    let collected = h.events_of("item.collected");
    assert_eq!(collected.len(), 1);
    assert_eq!(
        collected[0].field("ItemId"),
        Some(ack.item_id.unwrap().to_string().as_str())
    );

    // Anyone retrying gets ItemAlreadyCollected.
    h.sink.clear();
    h.packet(
        owner_peer,
        Message::ItemCollect(ItemCollectC2s {
            request_id: 3,
            drop_id,
        }),
    );
    let acks = h.sink.sent_to(PeerId(owner_peer));
    assert!(acks.iter().any(|m| matches!(
        m,
        Message::ItemCollectAck(a)
            if !a.success && a.error == Some(ErrorCode::ItemAlreadyCollected)
    )));
}

#[test]
fn rare_kill_pays_rarity_scaled_gold() {
    let mut h = harness(GameMode::Solo, 6);
    let peer = 1;
    let player_id = h.join(peer);
    h.to_preparation(peer);
    h.build(peer, 1, Uuid::new_v4(), 2, 0);

    let tower_id = h.session.towers().next().unwrap().entity_id;
    let unit = Unit {
        entity_id: h.session.alloc_entity(),
        kind: UnitKind::Tank,
        rarity: Rarity::Rare,
        modifiers: UnitModifiers::new(),
        position: Vec2::new(2.5, 2.5),
        direction: Vec2::X,
        base_speed: 0.6,
        hp: 1.0,
        max_hp: 90.0,
        shield_active: false,
        slow_amount: 0.0,
        slow_remaining: 0.0,
        lives_cost: 2,
        gold_reward: 4.0,
        drop_chance: 0.15,
    };
    let unit_id = unit.entity_id;
    h.session.units.insert(unit_id, unit);

    let gold_before = h.session.player(player_id).unwrap().gold;
    h.session.kill_unit(unit_id, KillCredit::Tower(tower_id), false);

    // floor(4 * 2.5 * (1 + 0/100)) = 10.
    let player = h.session.player(player_id).unwrap();
    assert_eq!(player.gold, gold_before + 10);
    assert_eq!(player.units_killed, 1);

    let killed = h.events_of("unit.killed");
    assert_eq!(killed.len(), 1);
    assert_eq!(killed[0].field("GoldAwarded"), Some("10"));
    assert_eq!(killed[0].field("UnitRarity"), Some("Rare"));
}

#[test]
fn perfect_wave_awards_xp_and_guaranteed_drop() {
    let mut h = harness(GameMode::Solo, 7);
    let peer = 1;
    h.join(peer);
    h.to_preparation(peer);
    h.build(peer, 1, Uuid::new_v4(), 2, 0);

    h.advance(catalog::PREPARATION_DELAY + 0.1);
    assert_eq!(h.session.state(), SessionState::WaveActive);

    // Clear the wave without a single leak.
    let unit_ids: Vec<u32> = h.session.units.keys().copied().collect();
    let tower_id = h.session.towers().next().unwrap().entity_id;
    for unit_id in unit_ids {
        h.session.kill_unit(unit_id, KillCredit::Tower(tower_id), false);
    }
    h.session.update(TICK_INTERVAL);
    assert_eq!(h.session.state(), SessionState::Preparation);

    let completed = h.events_of("wave.completed");
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].field("IsPerfect"), Some("true"));
    assert_eq!(completed[0].field("UnitsLeaked"), Some("0"));

    // Wave clear plus perfect bonus, and the kill XP, all on the one
    // tower: 7 kills + 10 + 5 = 22.
    let xp = h.events_of("tower.xp_gained");
    assert_eq!(xp.len(), 1);
    assert_eq!(xp[0].field("XpAmount"), Some("22"));
    assert_eq!(xp[0].field("Source"), Some("wave"));

    // The guaranteed perfect-wave drop is at least Magic.
    let drops = h.events_of("item.dropped");
    assert!(!drops.is_empty());
    assert!(drops
        .iter()
        .any(|d| matches!(d.field("Rarity"), Some("Magic") | Some("Rare"))));

    check_invariants(&h.session);
}

#[test]
fn leaked_unit_damages_player() {
    let mut h = harness(GameMode::Solo, 8);
    let peer = 1;
    let player_id = h.join(peer);
    h.to_preparation(peer);
    h.advance(catalog::PREPARATION_DELAY + 0.1);
    assert_eq!(h.session.state(), SessionState::WaveActive);

    // Teleport one unit past the edge; the next update leaks it.
    let first_unit = *h.session.units.keys().next().unwrap();
    let leak_x = h.session.grid.leak_x();
    h.session.units.get_mut(&first_unit).unwrap().position = Vec2::new(leak_x + 1.0, 2.5);
    h.session.update(TICK_INTERVAL);

    assert!(!h.session.units.contains_key(&first_unit));
    assert_eq!(
        h.session.player(player_id).unwrap().lives,
        catalog::STARTING_LIVES - 1
    );
    assert_eq!(h.events_of("player.damaged").len(), 1);
}

#[test]
fn unit_killed_at_the_edge_is_a_kill_not_a_leak() {
    let mut h = harness(GameMode::Solo, 9);
    let peer = 1;
    let player_id = h.join(peer);
    h.to_preparation(peer);
    h.build(peer, 1, Uuid::new_v4(), 9, 1);

    h.advance(catalog::PREPARATION_DELAY + 0.1);

    // One unit about to cross this very tick, in tower range, at 1 hp;
    // everything else far away.
    let leak_x = h.session.grid.leak_x();
    let ids: Vec<u32> = h.session.units.keys().copied().collect();
    for (i, id) in ids.iter().enumerate() {
        let unit = h.session.units.get_mut(id).unwrap();
        if i == 0 {
            unit.position = Vec2::new(leak_x - 0.01, 2.5);
            unit.hp = 1.0;
        } else {
            unit.position = Vec2::new(-50.0, 2.5);
            unit.base_speed = 0.0;
        }
    }

    h.session.update(TICK_INTERVAL);

    // Killed by the tower, not leaked: full lives, one kill event, no
    // player.damaged.
    assert_eq!(
        h.session.player(player_id).unwrap().lives,
        catalog::STARTING_LIVES
    );
    assert_eq!(h.events_of("unit.killed").len(), 1);
    assert!(h.events_of("player.damaged").is_empty());
}

#[test]
fn shield_absorbs_a_crit_one_shot() {
    let mut h = harness(GameMode::Solo, 10);
    h.join(1);

    let unit = Unit {
        entity_id: h.session.alloc_entity(),
        kind: UnitKind::Basic,
        rarity: Rarity::Magic,
        modifiers: UnitModifiers::new().with_shielded(true),
        position: Vec2::new(2.5, 2.5),
        direction: Vec2::X,
        base_speed: 1.0,
        hp: 30.0,
        max_hp: 30.0,
        shield_active: true,
        slow_amount: 0.0,
        slow_remaining: 0.0,
        lives_cost: 1,
        gold_reward: 2.0,
        drop_chance: 0.05,
    };
    let unit_id = unit.entity_id;
    h.session.units.insert(unit_id, unit);

    // An absurdly large crit is absorbed outright.
    let outcome = h.session.damage_unit(
        unit_id,
        1_000_000.0,
        towerwars_protocol::types::DamageType::Physical,
    );
    assert_eq!(outcome, Some(DamageOutcome::Absorbed));

    let unit = &h.session.units[&unit_id];
    assert_eq!(unit.hp, 30.0);
    assert!(!unit.shield_active);

    // The second hit lands.
    let outcome = h.session.damage_unit(
        unit_id,
        10.0,
        towerwars_protocol::types::DamageType::Physical,
    );
    assert_eq!(outcome, Some(DamageOutcome::Damaged));
    assert_eq!(h.session.units[&unit_id].hp, 20.0);
}

#[test]
fn target_at_exact_range_is_acquired() {
    let mut h = harness(GameMode::Solo, 11);
    h.join(1);

    let unit = Unit {
        entity_id: h.session.alloc_entity(),
        kind: UnitKind::Basic,
        rarity: Rarity::Normal,
        modifiers: UnitModifiers::new(),
        position: Vec2::new(5.0, 2.5),
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
    let unit_id = unit.entity_id;
    h.session.units.insert(unit_id, unit);

    let origin = Vec2::new(2.0, 2.5);
    assert_eq!(h.session.select_targets(origin, 3.0, 1), vec![unit_id]);
    assert!(h.session.select_targets(origin, 2.999, 1).is_empty());
}

#[test]
fn pause_freezes_simulation_but_commits_pending_builds() {
    let mut h = harness(GameMode::Solo, 12);
    let peer = 1;
    h.join(peer);
    h.to_preparation(peer);
    h.advance(catalog::PREPARATION_DELAY + 0.1);
    assert_eq!(h.session.state(), SessionState::WaveActive);

    let positions: Vec<(u32, Vec2)> = h
        .session
        .units()
        .map(|u| (u.entity_id, u.position))
        .collect();

    // Start a build, then pause before the continuation lands.
    h.packet(
        peer,
        Message::TowerBuild(TowerBuildC2s {
            request_id: 1,
            player_tower_id: Uuid::new_v4(),
            tower_type: towerwars_protocol::types::TowerKind::Arrow,
            gx: 0,
            gy: 0,
        }),
    );
    h.session.set_paused(true, Some("operator hold".to_owned()));
    h.settle();
    h.advance(1.0);

    // Nothing moved, but the tower landed.
    for (id, position) in positions {
        assert_eq!(h.session.units[&id].position, position);
    }
    assert_eq!(h.session.towers().count(), 1);
    let tick_while_paused = h.session.current_tick();

    h.session.set_paused(false, None);
    h.advance(0.5);
    assert!(h.session.current_tick() > tick_while_paused);

    assert_eq!(h.events_of("game.paused").len(), 1);
    assert_eq!(h.events_of("game.resumed").len(), 1);
}

#[test]
fn force_end_returns_peers_to_lobby_exactly_once() {
    let runtime = Runtime::new().unwrap();
    let sink = RecordingSink::new();
    let stream = MemoryStream::new();
    let publisher = spawn_publisher(stream.clone(), runtime.handle());

    let mut manager = SessionManager::new(
        Arc::new(sink.clone()),
        publisher,
        Arc::new(StaticBonusProvider::new()),
        runtime.handle().clone(),
        99,
    );

    let peer = PeerId(4);
    let match_id = manager
        .request_match(peer, creds(), GameMode::Solo)
        .unwrap();
    assert_eq!(manager.len(), 1);

    manager
        .session_mut(match_id)
        .unwrap()
        .force_end(MatchResult::Aborted);
    manager.update_all(TICK_INTERVAL);
    let ended = manager.sweep_ended();

    assert_eq!(ended.len(), 1);
    assert_eq!(ended[0].0, match_id);
    assert_eq!(ended[0].1, vec![peer]);
    assert!(manager.is_empty());

    let sent = sink.sent_to(peer);
    let match_ends = sent
        .iter()
        .filter(|m| matches!(m, Message::MatchEnd(_)))
        .count();
    assert_eq!(match_ends, 1);
    assert!(sent
        .iter()
        .any(|m| matches!(m, Message::ReturnToLobby(_))));

    // A second force-end is a no-op.
    manager.update_all(TICK_INTERVAL);
    assert!(manager.sweep_ended().is_empty());

    std::thread::sleep(Duration::from_millis(80));
    let ended_events: Vec<EventRecord> = stream
        .records()
        .into_iter()
        .filter(|r| r.event_type() == Some("match.ended"))
        .collect();
    assert_eq!(ended_events.len(), 1);
    assert_eq!(ended_events[0].field("Result"), Some("Aborted"));
}

#[test]
fn all_players_disconnecting_ends_the_session() {
    let mut h = harness(GameMode::Coop, 13);
    h.join(1);
    h.join(2);

    h.session.handle_disconnect(PeerId(1));
    assert!(!h.session.is_over());

    h.session.handle_disconnect(PeerId(2));
    assert!(h.session.is_over());
}

#[test]
fn sell_refunds_and_frees_the_cell() {
    let mut h = harness(GameMode::Solo, 14);
    let peer = 1;
    let player_id = h.join(peer);
    h.to_preparation(peer);
    h.build(peer, 1, Uuid::new_v4(), 3, 1);

    let tower_id = h.session.towers().next().unwrap().entity_id;
    let gold_before = h.session.player(player_id).unwrap().gold;

    h.packet(
        peer,
        Message::TowerSell(TowerSellC2s {
            request_id: 2,
            entity_id: tower_id,
        }),
    );

    assert_eq!(h.session.towers().count(), 0);
    // 70% of the 1 gold invested, floored.
    assert_eq!(h.session.player(player_id).unwrap().gold, gold_before);
    assert!(h.session.grid.is_buildable(3, 1));

    assert!(h.sink.sent_to(PeerId(peer)).iter().any(|m| matches!(
        m,
        Message::EntityDestroy(d) if d.reason == DestroyReason::Sold
    )));
    assert_eq!(h.events_of("tower.sold").len(), 1);
}

#[test]
fn repeated_builds_get_more_expensive() {
    let mut h = harness(GameMode::Solo, 15);
    let peer = 1;
    let player_id = h.join(peer);
    h.to_preparation(peer);

    let player_tower_id = Uuid::new_v4();
    // Arrow: 1, then floor(1.2) = 1 ... until floor(1 * (1 + 0.2*5)) = 2.
    for (i, gx) in (0..6u32).zip(0..6u8) {
        h.build(peer, i, player_tower_id, gx, 0);
    }

    // 1+1+1+1+1+2 = 7 spent.
    assert_eq!(
        h.session.player(player_id).unwrap().gold,
        STARTING_GOLD - 7
    );
    assert_eq!(h.session.towers().count(), 6);
    check_invariants(&h.session);
}

#[test]
fn ticks_are_monotonic_and_skip_while_paused() {
    let mut h = harness(GameMode::Solo, 16);
    h.join(1);

    let mut last = h.session.current_tick();
    for _ in 0..50 {
        h.session.update(TICK_INTERVAL);
        assert!(h.session.current_tick() >= last);
        last = h.session.current_tick();
    }
}
