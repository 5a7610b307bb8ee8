//! The authoritative game session: one match, one owner thread.
//!
//! All mutation happens through three entry points driven by the game loop
//! thread: [`GameSession::handle_packet`], [`GameSession::update`] and
//! [`GameSession::tick`]. Off-thread work (the tower-bonus lookup) never
//! touches the session; its continuation re-enters through the pending
//! action queue and commits at the top of the next update.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use towerwars_events::{EventPublisher, GameEvent};
use towerwars_protocol::delta::EntityDelta;
use towerwars_protocol::packets::game_c2s::*;
use towerwars_protocol::packets::game_s2c::*;
use towerwars_protocol::types::{
    DestroyReason, EntityState, ErrorCode, GameMode, MatchResult, TowerKind,
};
use towerwars_protocol::Message;
use towerwars_transport::PeerId;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::entities::{Grid, ItemDrop, Player, Tower, Unit};
use super::waves::plan_wave;
use crate::bonus::{compose_tower_stats, TowerBonusProvider, TowerLoadout, BONUS_TIMEOUT};
use crate::catalog::{
    self, tower_spec, MAX_UPGRADE_LEVEL, PREPARATION_DELAY, REPEAT_PURCHASE_MARKUP, SELL_REFUND,
};
use crate::sink::PacketSink;
use crate::token::Credentials;

/// Maximum characters of a relayed chat line.
const CHAT_LIMIT: usize = 256;

/// Match-flow state. Terminal in `GameOver`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SessionState {
    WaitingForPlayers,
    Preparation,
    WaveActive,
    GameOver,
}

/// Deferred work re-entering the session on its owner thread.
pub(crate) enum PendingAction {
    CommitBuild {
        player_id: u32,
        request_id: u32,
        player_tower_id: Uuid,
        tower_type: TowerKind,
        gx: u8,
        gy: u8,
        gold_spent: u32,
        result: Result<TowerLoadout, String>,
    },
}

/// Accumulated XP for one player-tower, flushed at wave and match end.
pub(crate) struct XpEntry {
    pub(crate) player_id: u32,
    pub(crate) amount: u64,
}

/// External dependencies of a session, injected at creation.
#[derive(Clone)]
pub struct SessionContext {
    pub sink: Arc<dyn PacketSink>,
    pub publisher: EventPublisher,
    pub bonus_provider: Arc<dyn TowerBonusProvider>,
    pub runtime: tokio::runtime::Handle,
    pub rng_seed: u64,
}

pub struct GameSession {
    pub(crate) match_id: Uuid,
    pub(crate) mode: GameMode,
    pub(crate) state: SessionState,
    pub(crate) current_tick: u64,
    pub(crate) current_wave: u32,
    pub(crate) completed_waves: u32,
    pub(crate) is_paused: bool,
    pub(crate) pause_reason: Option<String>,

    pub(crate) grid: Grid,
    pub(crate) players: BTreeMap<u32, Player>,
    pub(crate) peer_players: HashMap<PeerId, u32>,
    pub(crate) towers: BTreeMap<u32, Tower>,
    pub(crate) units: BTreeMap<u32, Unit>,
    pub(crate) drops: BTreeMap<u32, ItemDrop>,
    pub(crate) collected_drops: HashSet<u32>,

    pub(crate) next_entity_id: u32,
    pub(crate) next_drop_id: u32,
    pub(crate) next_player_id: u32,

    pub(crate) purchase_counts: HashMap<(u32, Uuid), u32>,
    pub(crate) loadout_cache: HashMap<Uuid, TowerLoadout>,
    pub(crate) tower_xp: HashMap<Uuid, XpEntry>,

    pub(crate) match_start_timer: Option<f32>,
    pub(crate) wave_timer: Option<f32>,
    pub(crate) units_killed_this_wave: u32,
    pub(crate) units_leaked_this_wave: u32,

    pub(crate) pending_tx: mpsc::Sender<PendingAction>,
    pub(crate) pending_rx: mpsc::Receiver<PendingAction>,

    pub(crate) sink: Arc<dyn PacketSink>,
    pub(crate) publisher: EventPublisher,
    pub(crate) bonus_provider: Arc<dyn TowerBonusProvider>,
    pub(crate) runtime: tokio::runtime::Handle,
    pub(crate) rng: StdRng,

    pub(crate) started_at: Option<Instant>,
}

impl GameSession {
    pub fn new(match_id: Uuid, mode: GameMode, ctx: SessionContext) -> Self {
        let grid = match mode {
            GameMode::Solo => Grid::new(10, 5),
            GameMode::Coop | GameMode::Pvp => Grid::new(20, 15),
        };

        let (pending_tx, pending_rx) = mpsc::channel();

        Self {
            match_id,
            mode,
            state: SessionState::WaitingForPlayers,
            current_tick: 0,
            current_wave: 0,
            completed_waves: 0,
            is_paused: false,
            pause_reason: None,
            grid,
            players: BTreeMap::new(),
            peer_players: HashMap::new(),
            towers: BTreeMap::new(),
            units: BTreeMap::new(),
            drops: BTreeMap::new(),
            collected_drops: HashSet::new(),
            next_entity_id: 1,
            next_drop_id: 1,
            next_player_id: 0,
            purchase_counts: HashMap::new(),
            loadout_cache: HashMap::new(),
            tower_xp: HashMap::new(),
            match_start_timer: None,
            wave_timer: None,
            units_killed_this_wave: 0,
            units_leaked_this_wave: 0,
            pending_tx,
            pending_rx,
            sink: ctx.sink,
            publisher: ctx.publisher,
            bonus_provider: ctx.bonus_provider,
            runtime: ctx.runtime,
            rng: StdRng::seed_from_u64(ctx.rng_seed),
            started_at: None,
        }
    }

    pub fn match_id(&self) -> Uuid {
        self.match_id
    }

    pub fn mode(&self) -> GameMode {
        self.mode
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    pub fn current_wave(&self) -> u32 {
        self.current_wave
    }

    pub fn is_over(&self) -> bool {
        self.state == SessionState::GameOver
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    pub fn player(&self, player_id: u32) -> Option<&Player> {
        self.players.get(&player_id)
    }

    pub fn player_of_peer(&self, peer: PeerId) -> Option<&Player> {
        self.peer_players
            .get(&peer)
            .and_then(|id| self.players.get(id))
    }

    pub fn towers(&self) -> impl Iterator<Item = &Tower> {
        self.towers.values()
    }

    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.units.values()
    }

    pub fn drops(&self) -> impl Iterator<Item = &ItemDrop> {
        self.drops.values()
    }

    /// Peers that should receive session broadcasts.
    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.players
            .values()
            .filter(|p| p.connected)
            .filter_map(|p| p.peer)
            .collect()
    }

    /// Adds a player. Only legal while waiting for players; returns the
    /// dense, join-ordered player id.
    pub fn join(&mut self, peer: PeerId, credentials: Credentials) -> anyhow::Result<u32> {
        anyhow::ensure!(
            self.state == SessionState::WaitingForPlayers,
            "session is no longer accepting players"
        );
        anyhow::ensure!(
            !self.peer_players.contains_key(&peer),
            "peer already joined this session"
        );

        let player_id = self.next_player_id;
        self.next_player_id += 1;

        let team_id = match self.mode {
            GameMode::Pvp => (player_id % 2) as u8,
            _ => 0,
        };

        self.players.insert(
            player_id,
            Player::new(
                player_id,
                peer,
                credentials.user_id,
                credentials.character_id,
                team_id,
            ),
        );
        self.peer_players.insert(peer, player_id);

        info!(match_id = %self.match_id, player_id, %peer, "player joined");
        Ok(player_id)
    }

    /// Marks the peer's player disconnected. The session keeps simulating
    /// for the remaining players; with nobody left it ends itself.
    pub fn handle_disconnect(&mut self, peer: PeerId) {
        let Some(player_id) = self.peer_players.remove(&peer) else {
            return;
        };
        if let Some(player) = self.players.get_mut(&player_id) {
            player.connected = false;
            player.peer = None;
            info!(match_id = %self.match_id, player_id, "player disconnected");
        }

        if !self.is_over() && self.players.values().all(|p| !p.connected) {
            self.end_match(MatchResult::Aborted);
        }
    }

    /// Externally triggered termination.
    pub fn force_end(&mut self, result: MatchResult) {
        self.end_match(result);
    }

    /// Toggles the pause flag. While paused, updates still drain pending
    /// actions (an in-flight build commit lands) but skip simulation, and
    /// ticks skip broadcasts.
    pub fn set_paused(&mut self, paused: bool, reason: Option<String>) {
        if self.is_paused == paused || self.is_over() {
            return;
        }
        self.is_paused = paused;
        self.pause_reason = reason.clone();

        self.broadcast(Message::GamePause(GamePauseS2c {
            is_paused: paused,
            reason: reason.clone(),
        }));

        let event = if paused {
            GameEvent::GamePaused(towerwars_events::GamePaused { reason })
        } else {
            GameEvent::GameResumed(towerwars_events::GameResumed {})
        };
        self.publisher.publish(self.match_id, event);
    }

    /// One fixed simulation step.
    pub fn update(&mut self, dt: f32) {
        self.drain_pending();

        if self.is_over() || self.is_paused {
            return;
        }

        self.current_tick += 1;
        self.advance_timers(dt);
        if self.is_over() {
            return;
        }
        self.update_units(dt);
        if self.is_over() {
            return;
        }
        self.update_towers(dt);
        if self.is_over() {
            return;
        }
        self.update_drops(dt);
        self.update_players(dt);
        self.check_wave_completion();
    }

    /// The broadcast phase of a step, after every session updated.
    pub fn tick(&mut self) {
        if self.is_over() || self.is_paused {
            return;
        }

        if self.current_tick % catalog::BROADCAST_INTERVAL_TICKS == 0 {
            self.broadcast_deltas();
        }
    }

    /// Validates and applies one in-game packet from a session peer.
    pub fn handle_packet(&mut self, peer: PeerId, msg: &Message) {
        let Some(&player_id) = self.peer_players.get(&peer) else {
            debug!(%peer, "packet from peer not in this session");
            return;
        };

        match msg {
            Message::ReadyState(pkt) => self.handle_ready(player_id, pkt),
            Message::PlayerInput(pkt) => self.handle_input(player_id, pkt),
            Message::ChatMessage(pkt) => self.handle_chat(player_id, pkt),
            Message::TowerBuild(pkt) => self.handle_build(player_id, *pkt),
            Message::TowerUpgrade(pkt) => self.handle_upgrade(player_id, pkt),
            Message::TowerSell(pkt) => self.handle_sell(player_id, pkt),
            Message::AbilityUse(pkt) => self.handle_ability(player_id, pkt),
            Message::ItemCollect(pkt) => self.handle_item_collect(player_id, pkt),
            other => debug!(name = other.name(), "unroutable packet ignored"),
        }
    }

    fn handle_ready(&mut self, player_id: u32, pkt: &ReadyStateC2s) {
        if self.is_over() {
            return;
        }
        if let Some(player) = self.players.get_mut(&player_id) {
            player.is_ready = pkt.is_ready;
        }

        if self.state == SessionState::WaitingForPlayers
            && !self.players.is_empty()
            && self.players.values().all(|p| p.is_ready || !p.connected)
            && self.match_start_timer.is_none()
        {
            debug!(match_id = %self.match_id, "all players ready, match starting");
            self.match_start_timer = Some(PREPARATION_DELAY);
        }
    }

    fn handle_input(&mut self, player_id: u32, pkt: &PlayerInputC2s) {
        let Some(player) = self.players.get_mut(&player_id) else {
            return;
        };

        if pkt.sequence > player.last_input_sequence {
            player.last_input_sequence = pkt.sequence;
        }
        let ack = PlayerInputAckS2c {
            last_processed_sequence: player.last_input_sequence,
        };
        self.send_to_player(player_id, Message::PlayerInputAck(ack));
    }

    fn handle_chat(&mut self, player_id: u32, pkt: &ChatMessageC2s) {
        let mut text = pkt.text.clone();
        if let Some((cut, _)) = text.char_indices().nth(CHAT_LIMIT) {
            text.truncate(cut);
        }

        let broadcast = ChatBroadcastS2c {
            channel: pkt.channel,
            sender_player_id: player_id,
            text,
        };

        match pkt.channel {
            towerwars_protocol::types::ChatChannel::Match => {
                self.broadcast(Message::ChatBroadcast(broadcast));
            }
            towerwars_protocol::types::ChatChannel::Team => {
                let team = self.players.get(&player_id).map(|p| p.team_id);
                let peers: Vec<PeerId> = self
                    .players
                    .values()
                    .filter(|p| p.connected && Some(p.team_id) == team)
                    .filter_map(|p| p.peer)
                    .collect();
                self.sink.broadcast(&peers, Message::ChatBroadcast(broadcast));
            }
        }
    }

    /// The build path. Gold is deducted up front; the bonus lookup runs
    /// off-thread and the tower is committed (or the gold refunded) when
    /// the continuation drains on a later tick.
    fn handle_build(&mut self, player_id: u32, pkt: TowerBuildC2s) {
        if !matches!(
            self.state,
            SessionState::Preparation | SessionState::WaveActive
        ) {
            self.send_error(
                player_id,
                ErrorCode::WrongState,
                "cannot build right now",
                Some(pkt.request_id),
            );
            return;
        }

        if !self.grid.is_buildable(pkt.gx, pkt.gy) {
            self.send_error(
                player_id,
                ErrorCode::InvalidPlacement,
                "cell is out of bounds, on the path, or occupied",
                Some(pkt.request_id),
            );
            return;
        }

        let spec = tower_spec(pkt.tower_type);
        let purchases = self
            .purchase_counts
            .get(&(player_id, pkt.player_tower_id))
            .copied()
            .unwrap_or(0);
        let cost =
            (f64::from(spec.cost) * (1.0 + REPEAT_PURCHASE_MARKUP * f64::from(purchases))) as u32;

        let Some(player) = self.players.get_mut(&player_id) else {
            return;
        };
        if player.gold < cost {
            self.send_error(
                player_id,
                ErrorCode::InsufficientGold,
                "not enough gold",
                Some(pkt.request_id),
            );
            return;
        }
        player.gold -= cost;
        *self
            .purchase_counts
            .entry((player_id, pkt.player_tower_id))
            .or_insert(0) += 1;

        if let Some(loadout) = self.loadout_cache.get(&pkt.player_tower_id).cloned() {
            // Resolved earlier this session; commit without a round trip.
            self.commit_build(PendingAction::CommitBuild {
                player_id,
                request_id: pkt.request_id,
                player_tower_id: pkt.player_tower_id,
                tower_type: pkt.tower_type,
                gx: pkt.gx,
                gy: pkt.gy,
                gold_spent: cost,
                result: Ok(loadout),
            });
            return;
        }

        let provider = Arc::clone(&self.bonus_provider);
        let tx = self.pending_tx.clone();
        let player_tower_id = pkt.player_tower_id;
        self.runtime.spawn(async move {
            let result =
                match tokio::time::timeout(BONUS_TIMEOUT, provider.resolve(player_tower_id)).await
                {
                    Ok(Ok(loadout)) => Ok(loadout),
                    Ok(Err(e)) => Err(format!("bonus lookup failed: {e:#}")),
                    Err(_) => Err("bonus lookup timed out".to_owned()),
                };

            let _ = tx.send(PendingAction::CommitBuild {
                player_id,
                request_id: pkt.request_id,
                player_tower_id,
                tower_type: pkt.tower_type,
                gx: pkt.gx,
                gy: pkt.gy,
                gold_spent: cost,
                result,
            });
        });
    }

    /// Runs on the session thread once the bonus lookup resolved. The
    /// single point where a build mutates session state.
    fn commit_build(&mut self, action: PendingAction) {
        let PendingAction::CommitBuild {
            player_id,
            request_id,
            player_tower_id,
            tower_type,
            gx,
            gy,
            gold_spent,
            result,
        } = action;

        if self.is_over() {
            return;
        }

        let refund = |session: &mut Self, code: ErrorCode, message: &str| {
            if let Some(player) = session.players.get_mut(&player_id) {
                player.gold += gold_spent;
            }
            if let Some(count) = session
                .purchase_counts
                .get_mut(&(player_id, player_tower_id))
            {
                *count = count.saturating_sub(1);
            }
            session.send_error(player_id, code, message, Some(request_id));
        };

        let loadout = match result {
            Ok(loadout) => loadout,
            Err(e) => {
                warn!(match_id = %self.match_id, "build rolled back: {e}");
                refund(self, ErrorCode::InternalError, "tower bonuses unavailable");
                return;
            }
        };

        // The cell may have been taken while the lookup was in flight.
        if !self.grid.is_buildable(gx, gy) {
            refund(self, ErrorCode::InvalidPlacement, "cell taken");
            return;
        }

        self.loadout_cache.insert(player_tower_id, loadout.clone());

        let Some(player) = self.players.get_mut(&player_id) else {
            return;
        };
        player.towers_built += 1;
        let owner_user_id = player.user_id;

        let spec = tower_spec(tower_type);
        let stats = compose_tower_stats(spec, &loadout);
        let entity_id = self.alloc_entity();
        let tower = Tower {
            entity_id,
            player_tower_id,
            owner_player_id: player_id,
            owner_user_id,
            kind: tower_type,
            gx,
            gy,
            position: self.grid.cell_center(gx, gy),
            hp: stats.max_hp,
            upgrade_level: 0,
            attack_cooldown: 0.0,
            stats,
            invested_gold: gold_spent,
        };

        self.grid.occupy(gx, gy, entity_id);
        let state = tower.to_entity_state();
        self.towers.insert(entity_id, tower);

        self.broadcast(Message::EntitySpawn(EntitySpawnS2c {
            tick: self.current_tick,
            entity: state,
        }));

        self.publisher.publish(
            self.match_id,
            GameEvent::TowerBuilt(towerwars_events::TowerBuilt {
                player_id,
                tower_id: player_tower_id,
                tower_type: tower_type.name().to_owned(),
                grid_x: gx,
                grid_y: gy,
                gold_spent,
            }),
        );
    }

    fn handle_upgrade(&mut self, player_id: u32, pkt: &TowerUpgradeC2s) {
        let Some(tower) = self.towers.get(&pkt.entity_id) else {
            self.send_error(
                player_id,
                ErrorCode::TowerNotFound,
                "no such tower",
                Some(pkt.request_id),
            );
            return;
        };
        if tower.owner_player_id != player_id {
            self.send_error(
                player_id,
                ErrorCode::TowerNotFound,
                "not your tower",
                Some(pkt.request_id),
            );
            return;
        }
        if tower.upgrade_level >= MAX_UPGRADE_LEVEL {
            self.send_error(
                player_id,
                ErrorCode::WrongState,
                "tower is at maximum level",
                Some(pkt.request_id),
            );
            return;
        }

        let cost = tower_spec(tower.kind).cost * (u32::from(tower.upgrade_level) + 1);
        let Some(player) = self.players.get_mut(&player_id) else {
            return;
        };
        if player.gold < cost {
            self.send_error(
                player_id,
                ErrorCode::InsufficientGold,
                "not enough gold",
                Some(pkt.request_id),
            );
            return;
        }
        player.gold -= cost;

        let Some(tower) = self.towers.get_mut(&pkt.entity_id) else {
            return;
        };
        tower.upgrade_level += 1;
        tower.invested_gold += cost;
        let state = tower.to_entity_state();

        // Re-announce the entity so clients pick up the new level and
        // stats in one message.
        self.broadcast(Message::EntitySpawn(EntitySpawnS2c {
            tick: self.current_tick,
            entity: state,
        }));
    }

    fn handle_sell(&mut self, player_id: u32, pkt: &TowerSellC2s) {
        let Some(tower) = self.towers.get(&pkt.entity_id) else {
            self.send_error(
                player_id,
                ErrorCode::TowerNotFound,
                "no such tower",
                Some(pkt.request_id),
            );
            return;
        };
        if tower.owner_player_id != player_id {
            self.send_error(
                player_id,
                ErrorCode::TowerNotFound,
                "not your tower",
                Some(pkt.request_id),
            );
            return;
        }

        let Some(tower) = self.towers.remove(&pkt.entity_id) else {
            return;
        };
        self.grid.free(tower.gx, tower.gy);

        let refund = (f64::from(tower.invested_gold) * SELL_REFUND).floor() as u32;
        if let Some(player) = self.players.get_mut(&player_id) {
            player.gold += refund;
        }

        self.broadcast(Message::EntityDestroy(EntityDestroyS2c {
            tick: self.current_tick,
            entity_id: tower.entity_id,
            reason: DestroyReason::Sold,
        }));

        self.publisher.publish(
            self.match_id,
            GameEvent::TowerSold(towerwars_events::TowerSold {
                player_id,
                tower_id: tower.player_tower_id,
                gold_received: refund,
            }),
        );
    }

    fn drain_pending(&mut self) {
        while let Ok(action) = self.pending_rx.try_recv() {
            self.commit_build(action);
        }
    }

    fn advance_timers(&mut self, dt: f32) {
        if let Some(t) = &mut self.match_start_timer {
            *t -= dt;
            if *t <= 0.0 {
                self.match_start_timer = None;
                self.start_match();
            }
        }

        if self.state == SessionState::Preparation {
            if let Some(t) = &mut self.wave_timer {
                *t -= dt;
                if *t <= 0.0 {
                    self.wave_timer = None;
                    self.start_wave();
                }
            }
        }
    }

    fn start_match(&mut self) {
        if self.state != SessionState::WaitingForPlayers {
            return;
        }
        self.state = SessionState::Preparation;
        self.started_at = Some(Instant::now());
        self.wave_timer = Some(PREPARATION_DELAY);

        let players: Vec<PlayerInfo> = self.players.values().map(Player::to_info).collect();
        self.broadcast(Message::MatchStart(MatchStartS2c {
            match_id: self.match_id,
            mode: self.mode,
            grid_width: self.grid.width(),
            grid_height: self.grid.height(),
            players,
        }));

        self.publisher.publish(
            self.match_id,
            GameEvent::MatchStarted(towerwars_events::MatchStarted {
                mode: format!("{:?}", self.mode),
                player_ids: self.players.values().map(|p| p.user_id).collect(),
                map_id: "standard".to_owned(),
            }),
        );

        info!(match_id = %self.match_id, "match started");
    }

    fn start_wave(&mut self) {
        if self.state != SessionState::Preparation {
            return;
        }
        self.state = SessionState::WaveActive;
        self.current_wave += 1;
        self.units_killed_this_wave = 0;
        self.units_leaked_this_wave = 0;

        let plan = plan_wave(self.current_wave);
        self.broadcast(Message::WaveStart(WaveStartS2c {
            wave_number: plan.number,
            wave_info: WaveInfo {
                kind: plan.kind,
                count: plan.count,
            },
        }));

        let path_row = self.grid.path_row();
        for index in 0..plan.count {
            let entity_id = self.alloc_entity();
            let unit = super::waves::roll_unit(&mut self.rng, entity_id, plan, index, path_row);
            let state = unit.to_entity_state();
            self.units.insert(entity_id, unit);
            self.broadcast(Message::EntitySpawn(EntitySpawnS2c {
                tick: self.current_tick,
                entity: state,
            }));
        }

        let snapshot = self.snapshot();
        self.broadcast(Message::StateSnapshot(snapshot));

        debug!(match_id = %self.match_id, wave = plan.number, count = plan.count, "wave started");
    }

    pub(crate) fn end_match(&mut self, result: MatchResult) {
        if self.is_over() {
            return;
        }
        self.state = SessionState::GameOver;

        // Completion XP for every surviving tower, then flush everything
        // accumulated this wave.
        let mut completion = catalog::xp::MATCH_COMPLETION;
        if result == MatchResult::Victory {
            completion += catalog::xp::VICTORY_BONUS;
        }
        let tower_awards: Vec<(Uuid, u32, u64)> = self
            .towers
            .values()
            .map(|t| {
                let scaled =
                    (completion as f64 * (1.0 + t.stats.xp_gain_percent / 100.0)).floor() as u64;
                (t.player_tower_id, t.owner_player_id, scaled)
            })
            .collect();
        for (player_tower_id, player_id, amount) in tower_awards {
            self.accumulate_xp(player_tower_id, player_id, amount);
        }
        self.flush_tower_xp("match");

        let stats: Vec<PlayerMatchStats> = self
            .players
            .values()
            .map(|p| PlayerMatchStats {
                player_id: p.player_id,
                score: p.score,
                units_killed: p.units_killed,
                towers_built: p.towers_built,
                gold_earned: p.gold_earned,
            })
            .collect();

        self.broadcast(Message::MatchEnd(MatchEndS2c {
            result,
            waves_completed: self.completed_waves,
            stats,
        }));

        let duration = self
            .started_at
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0);
        self.publisher.publish(
            self.match_id,
            GameEvent::MatchEnded(towerwars_events::MatchEnded {
                result: result.name().to_owned(),
                waves_completed: self.completed_waves,
                duration_seconds: duration,
            }),
        );

        info!(match_id = %self.match_id, result = result.name(), "match ended");
    }

    fn update_players(&mut self, dt: f32) {
        for player in self.players.values_mut() {
            if player.ability_cooldown > 0.0 {
                player.ability_cooldown = (player.ability_cooldown - dt).max(0.0);
            }
        }
    }

    fn update_drops(&mut self, dt: f32) {
        let mut expired = Vec::new();
        for drop in self.drops.values_mut() {
            drop.age += dt;
            if drop.age >= catalog::DROP_EXPIRY {
                expired.push(drop.entity_id);
            }
        }

        for entity_id in expired {
            self.drops.remove(&entity_id);
            self.broadcast(Message::EntityDestroy(EntityDestroyS2c {
                tick: self.current_tick,
                entity_id,
                reason: DestroyReason::Expired,
            }));
        }
    }

    fn check_wave_completion(&mut self) {
        if self.state == SessionState::WaveActive && self.units.is_empty() {
            self.complete_wave();
        }
    }

    pub(crate) fn alloc_entity(&mut self) -> u32 {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    pub(crate) fn accumulate_xp(&mut self, player_tower_id: Uuid, player_id: u32, amount: u64) {
        self.tower_xp
            .entry(player_tower_id)
            .or_insert(XpEntry {
                player_id,
                amount: 0,
            })
            .amount += amount;
    }

    pub(crate) fn flush_tower_xp(&mut self, source: &str) {
        let entries: Vec<(Uuid, XpEntry)> = self.tower_xp.drain().collect();
        for (player_tower_id, entry) in entries {
            self.publisher.publish(
                self.match_id,
                GameEvent::TowerXpGained(towerwars_events::TowerXpGained {
                    player_id: entry.player_id,
                    tower_id: player_tower_id,
                    xp_amount: entry.amount,
                    source: source.to_owned(),
                }),
            );
        }
    }

    pub fn snapshot(&self) -> StateSnapshotS2c {
        let mut entities: Vec<EntityState> = Vec::new();
        entities.extend(self.towers.values().map(Tower::to_entity_state));
        entities.extend(self.units.values().map(Unit::to_entity_state));
        entities.extend(self.drops.values().map(ItemDrop::to_entity_state));

        StateSnapshotS2c {
            tick: self.current_tick,
            entities,
            players: self.players.values().map(Player::to_state).collect(),
        }
    }

    fn broadcast_deltas(&mut self) {
        if self.units.is_empty() {
            return;
        }

        let deltas: Vec<EntityDelta> = self
            .units
            .values()
            .map(|u| {
                EntityDelta::new(u.entity_id)
                    .with_position(u.position)
                    .with_health(u.hp as f32)
            })
            .collect();

        self.broadcast_unreliable(Message::EntityUpdate(EntityUpdateS2c {
            tick: self.current_tick,
            deltas,
        }));
    }

    pub(crate) fn broadcast(&self, msg: Message) {
        self.sink.broadcast(&self.connected_peers(), msg);
    }

    pub(crate) fn broadcast_unreliable(&self, msg: Message) {
        self.sink
            .broadcast_unreliable(&self.connected_peers(), msg);
    }

    pub(crate) fn send_to_player(&self, player_id: u32, msg: Message) {
        if let Some(peer) = self.players.get(&player_id).and_then(|p| p.peer) {
            self.sink.send(peer, msg);
        }
    }

    pub(crate) fn send_error(
        &self,
        player_id: u32,
        code: ErrorCode,
        message: &str,
        request_id: Option<u32>,
    ) {
        self.send_to_player(
            player_id,
            Message::Error(ErrorS2c {
                code,
                message: message.to_owned(),
                request_id,
            }),
        );
    }
}
