//! Session ownership and routing: `match_id -> session`, `peer -> match`.

mod combat;
pub mod entities;
mod game;
mod items;
#[cfg(test)]
mod tests;
pub mod waves;

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use towerwars_events::EventPublisher;
use towerwars_protocol::packets::lobby::ReturnToLobbyS2c;
use towerwars_protocol::types::{GameMode, MatchResult};
use towerwars_protocol::Message;
use towerwars_transport::PeerId;
use tracing::{debug, info};
use uuid::Uuid;

pub use game::{GameSession, SessionContext, SessionState};

use crate::bonus::TowerBonusProvider;
use crate::sink::PacketSink;
use crate::token::Credentials;

/// Creates sessions on match requests, routes peers to their session, and
/// tears down finished sessions.
pub struct SessionManager {
    sessions: HashMap<Uuid, GameSession>,
    by_peer: HashMap<PeerId, Uuid>,

    sink: Arc<dyn PacketSink>,
    publisher: EventPublisher,
    bonus_provider: Arc<dyn TowerBonusProvider>,
    runtime: tokio::runtime::Handle,
    /// Source of per-session seeds, itself seeded so test runs reproduce.
    seed_rng: StdRng,
}

impl SessionManager {
    pub fn new(
        sink: Arc<dyn PacketSink>,
        publisher: EventPublisher,
        bonus_provider: Arc<dyn TowerBonusProvider>,
        runtime: tokio::runtime::Handle,
        seed: u64,
    ) -> Self {
        Self {
            sessions: HashMap::new(),
            by_peer: HashMap::new(),
            sink,
            publisher,
            bonus_provider,
            runtime,
            seed_rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn session(&self, match_id: Uuid) -> Option<&GameSession> {
        self.sessions.get(&match_id)
    }

    pub fn session_mut(&mut self, match_id: Uuid) -> Option<&mut GameSession> {
        self.sessions.get_mut(&match_id)
    }

    pub fn session_of_peer(&self, peer: PeerId) -> Option<&GameSession> {
        self.by_peer.get(&peer).and_then(|id| self.sessions.get(id))
    }

    /// Places a lobby peer into a match. Solo always gets a fresh session;
    /// Coop and PvP first try to fill a session still waiting for players
    /// (stub matchmaking).
    pub fn request_match(
        &mut self,
        peer: PeerId,
        credentials: Credentials,
        mode: GameMode,
    ) -> anyhow::Result<Uuid> {
        anyhow::ensure!(
            !self.by_peer.contains_key(&peer),
            "peer is already in a session"
        );

        let joinable = (mode != GameMode::Solo)
            .then(|| {
                self.sessions
                    .values()
                    .filter(|s| s.mode() == mode && s.state() == SessionState::WaitingForPlayers)
                    .map(|s| s.match_id())
                    .next()
            })
            .flatten();

        let match_id = match joinable {
            Some(match_id) => match_id,
            None => {
                let match_id = Uuid::new_v4();
                let ctx = SessionContext {
                    sink: Arc::clone(&self.sink),
                    publisher: self.publisher.clone(),
                    bonus_provider: Arc::clone(&self.bonus_provider),
                    runtime: self.runtime.clone(),
                    rng_seed: self.seed_rng.gen(),
                };
                self.sessions
                    .insert(match_id, GameSession::new(match_id, mode, ctx));
                info!(%match_id, ?mode, "session created");
                match_id
            }
        };

        let Some(session) = self.sessions.get_mut(&match_id) else {
            anyhow::bail!("session vanished during join");
        };
        session.join(peer, credentials)?;
        self.by_peer.insert(peer, match_id);

        Ok(match_id)
    }

    /// Hands an in-game packet to the peer's session.
    pub fn route_packet(&mut self, peer: PeerId, msg: &Message) {
        let Some(match_id) = self.by_peer.get(&peer) else {
            debug!(%peer, "in-game packet from peer without a session");
            return;
        };
        if let Some(session) = self.sessions.get_mut(match_id) {
            session.handle_packet(peer, msg);
        }
    }

    /// Removes a disconnected peer from its session. The session itself
    /// decides whether that ends the match.
    pub fn handle_disconnect(&mut self, peer: PeerId) {
        if let Some(match_id) = self.by_peer.remove(&peer) {
            if let Some(session) = self.sessions.get_mut(&match_id) {
                session.handle_disconnect(peer);
            }
        }
    }

    /// One fixed step for every active session.
    pub fn update_all(&mut self, dt: f32) {
        for session in self.sessions.values_mut() {
            session.update(dt);
            session.tick();
        }
    }

    /// Removes finished sessions, sends the survivors back to the lobby,
    /// and returns `(match_id, peers)` for each so the caller can update
    /// the peer registry.
    pub fn sweep_ended(&mut self) -> Vec<(Uuid, Vec<PeerId>)> {
        let ended: Vec<Uuid> = self
            .sessions
            .values()
            .filter(|s| s.is_over())
            .map(|s| s.match_id())
            .collect();

        let mut results = Vec::new();
        for match_id in ended {
            let Some(session) = self.sessions.remove(&match_id) else {
                continue;
            };
            let peers = session.connected_peers();
            for &peer in &peers {
                self.by_peer.remove(&peer);
                self.sink
                    .send(peer, Message::ReturnToLobby(ReturnToLobbyS2c));
            }
            info!(%match_id, "session removed");
            results.push((match_id, peers));
        }
        results
    }

    /// Force-ends everything, as on server shutdown.
    pub fn force_end_all(&mut self, result: MatchResult) {
        for session in self.sessions.values_mut() {
            session.force_end(result);
        }
    }
}
