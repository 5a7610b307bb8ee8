//! The peer registry and per-peer authentication state machine.
//!
//! Transitions are monotonic: Unauthenticated -> Lobby -> InGame and back
//! to Lobby on session end; disconnect removes the peer outright. The
//! registry mutex is held only for constant-time operations; token
//! validation itself happens off-thread and re-enters through the server
//! action queue.

use std::collections::HashMap;

use parking_lot::Mutex;
use towerwars_transport::PeerId;
use tracing::debug;
use uuid::Uuid;

use crate::token::Credentials;

/// Where a peer sits in its lifecycle.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PeerState {
    /// Connected, no valid token seen yet. `validating` guards against a
    /// duplicate `Connect` racing the in-flight lookup.
    Unauthenticated { validating: bool },
    Lobby,
    InGame { match_id: Uuid },
}

#[derive(Clone, Copy, Debug)]
pub struct Peer {
    pub id: PeerId,
    pub state: PeerState,
    pub credentials: Option<Credentials>,
}

/// Coarse gating class of an inbound packet.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PacketClass {
    /// Connect / Ping: legal in any state.
    Handshake,
    /// Lobby services: legal in Lobby and InGame.
    Lobby,
    /// Session mutations: legal only InGame.
    Game,
    /// Server-to-client packets have no business arriving here.
    Clientbound,
}

pub fn classify(msg: &towerwars_protocol::Message) -> PacketClass {
    use towerwars_protocol::Message;

    match msg {
        Message::Connect(_) | Message::Ping(_) => PacketClass::Handshake,
        Message::PlayerDataRequest(_) | Message::RequestMatch(_) => PacketClass::Lobby,
        Message::PlayerInput(_)
        | Message::TowerBuild(_)
        | Message::TowerUpgrade(_)
        | Message::TowerSell(_)
        | Message::AbilityUse(_)
        | Message::ReadyState(_)
        | Message::ChatMessage(_)
        | Message::ItemCollect(_) => PacketClass::Game,
        _ => PacketClass::Clientbound,
    }
}

/// Owns every connected peer.
#[derive(Default)]
pub struct ConnectionManager {
    peers: Mutex<HashMap<PeerId, Peer>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connected(&self, id: PeerId) {
        let mut peers = self.peers.lock();
        peers.insert(
            id,
            Peer {
                id,
                state: PeerState::Unauthenticated { validating: false },
                credentials: None,
            },
        );
        debug!(%id, "peer registered");
    }

    /// Removes the peer. Idempotent; returns what was removed.
    pub fn on_disconnected(&self, id: PeerId) -> Option<Peer> {
        self.peers.lock().remove(&id)
    }

    pub fn get(&self, id: PeerId) -> Option<Peer> {
        self.peers.lock().get(&id).copied()
    }

    pub fn state(&self, id: PeerId) -> Option<PeerState> {
        self.peers.lock().get(&id).map(|p| p.state)
    }

    pub fn credentials(&self, id: PeerId) -> Option<Credentials> {
        self.peers.lock().get(&id).and_then(|p| p.credentials)
    }

    /// Claims the right to run token validation for this peer. Returns
    /// false if the peer is unknown, already authenticated, or already
    /// validating — in all of which the new `Connect` is ignored.
    pub fn begin_validation(&self, id: PeerId) -> bool {
        let mut peers = self.peers.lock();
        match peers.get_mut(&id) {
            Some(peer) => match peer.state {
                PeerState::Unauthenticated { validating: false } => {
                    peer.state = PeerState::Unauthenticated { validating: true };
                    true
                }
                _ => false,
            },
            None => false,
        }
    }

    /// Unauthenticated -> Lobby after a successful token redemption.
    /// Returns false if the peer vanished meanwhile.
    pub fn complete_auth(&self, id: PeerId, credentials: Credentials) -> bool {
        let mut peers = self.peers.lock();
        match peers.get_mut(&id) {
            Some(peer) if matches!(peer.state, PeerState::Unauthenticated { .. }) => {
                peer.state = PeerState::Lobby;
                peer.credentials = Some(credentials);
                true
            }
            _ => false,
        }
    }

    /// Clears the validating flag after a failed redemption so the peer
    /// could retry before its disconnect lands.
    pub fn fail_validation(&self, id: PeerId) {
        let mut peers = self.peers.lock();
        if let Some(peer) = peers.get_mut(&id) {
            if matches!(peer.state, PeerState::Unauthenticated { .. }) {
                peer.state = PeerState::Unauthenticated { validating: false };
            }
        }
    }

    /// Lobby -> InGame on session join. Returns false unless the peer is
    /// in Lobby.
    pub fn set_in_game(&self, id: PeerId, match_id: Uuid) -> bool {
        let mut peers = self.peers.lock();
        match peers.get_mut(&id) {
            Some(peer) if peer.state == PeerState::Lobby => {
                peer.state = PeerState::InGame { match_id };
                true
            }
            _ => false,
        }
    }

    /// InGame -> Lobby on session end.
    pub fn return_to_lobby(&self, id: PeerId) {
        let mut peers = self.peers.lock();
        if let Some(peer) = peers.get_mut(&id) {
            if matches!(peer.state, PeerState::InGame { .. }) {
                peer.state = PeerState::Lobby;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use towerwars_protocol::packets::game_c2s::ReadyStateC2s;
    use towerwars_protocol::packets::handshake::PingC2s;
    use towerwars_protocol::packets::lobby::RequestMatchC2s;
    use towerwars_protocol::types::GameMode;
    use towerwars_protocol::Message;

    use super::*;

    fn creds() -> Credentials {
        Credentials {
            user_id: Uuid::new_v4(),
            character_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn auth_flow_is_monotonic() {
        let mgr = ConnectionManager::new();
        let id = PeerId(1);
        mgr.on_connected(id);

        assert!(mgr.begin_validation(id));
        // A duplicate Connect while validating is ignored.
        assert!(!mgr.begin_validation(id));

        assert!(mgr.complete_auth(id, creds()));
        assert_eq!(mgr.state(id), Some(PeerState::Lobby));

        // A Connect after authentication is ignored too.
        assert!(!mgr.begin_validation(id));

        let match_id = Uuid::new_v4();
        assert!(mgr.set_in_game(id, match_id));
        assert_eq!(mgr.state(id), Some(PeerState::InGame { match_id }));

        mgr.return_to_lobby(id);
        assert_eq!(mgr.state(id), Some(PeerState::Lobby));
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mgr = ConnectionManager::new();
        let id = PeerId(2);
        mgr.on_connected(id);

        assert!(mgr.on_disconnected(id).is_some());
        assert!(mgr.on_disconnected(id).is_none());
        assert!(!mgr.complete_auth(id, creds()));
    }

    #[test]
    fn packet_classes() {
        assert_eq!(
            classify(&Message::Ping(PingC2s { client_time: 0 })),
            PacketClass::Handshake
        );
        assert_eq!(
            classify(&Message::RequestMatch(RequestMatchC2s {
                mode: GameMode::Solo
            })),
            PacketClass::Lobby
        );
        assert_eq!(
            classify(&Message::ReadyState(ReadyStateC2s { is_ready: true })),
            PacketClass::Game
        );
    }
}
