//! The authoritative TowerWars zone server.
//!
//! Construction is two-phase: bind the transport, then hand it to
//! [`ZoneServer`] along with the token validator, the bonus provider and
//! the event publisher. [`ZoneServer::run`] then owns the calling thread
//! as the game loop: it polls the transport, drains deferred actions, and
//! steps every session at a fixed 20 Hz. Sessions themselves only ever see
//! send/broadcast capabilities, never the transport type.

pub mod bonus;
pub mod catalog;
pub mod connection;
pub mod scheduler;
pub mod session;
pub mod sink;
pub mod token;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use towerwars_events::EventPublisher;
use towerwars_protocol::packets::handshake::{AuthResponseS2c, ConnectAckS2c, ConnectC2s, PongS2c};
use towerwars_protocol::packets::lobby::{
    PlayerItemsResponseS2c, PlayerTowersResponseS2c, RequestMatchAckS2c,
};
use towerwars_protocol::types::{DisconnectReason, ErrorCode, MatchResult};
use towerwars_protocol::{Message, PROTOCOL_VERSION, TICK_RATE};
use towerwars_transport::{PeerId, TransportEvent, UdpTransport};
use tracing::{debug, info, warn};

use crate::bonus::{PlayerData, TowerBonusProvider};
use crate::connection::{classify, ConnectionManager, PacketClass, PeerState};
use crate::scheduler::{FixedStep, TICK_INTERVAL};
use crate::session::SessionManager;
use crate::sink::PacketSink;
use crate::token::{Credentials, TokenValidator, VALIDATION_TIMEOUT};

pub use crate::bonus::StaticBonusProvider;
pub use crate::token::{MemoryTokenValidator, RedisTokenValidator};

/// Everything a zone server needs, built before it.
pub struct ZoneServerDeps {
    pub transport: UdpTransport,
    pub validator: Arc<dyn TokenValidator>,
    pub bonus_provider: Arc<dyn TowerBonusProvider>,
    pub publisher: EventPublisher,
    pub runtime: tokio::runtime::Handle,
    /// Seed for the session RNG chain; fix it to reproduce a run.
    pub seed: u64,
}

/// Off-thread work re-entering the game loop.
enum ServerAction {
    AuthResolved {
        peer: PeerId,
        outcome: Result<Option<Credentials>, String>,
    },
    PlayerDataResolved {
        peer: PeerId,
        data: PlayerData,
    },
}

/// Flips the run loop off from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

pub struct ZoneServer {
    transport: Arc<UdpTransport>,
    connections: ConnectionManager,
    sessions: SessionManager,
    validator: Arc<dyn TokenValidator>,
    bonus_provider: Arc<dyn TowerBonusProvider>,
    runtime: tokio::runtime::Handle,
    actions_tx: flume::Sender<ServerAction>,
    actions_rx: flume::Receiver<ServerAction>,
    shutdown: Arc<AtomicBool>,
    server_tick: u64,
}

impl ZoneServer {
    pub fn new(deps: ZoneServerDeps) -> Self {
        let transport = Arc::new(deps.transport);
        let sink: Arc<dyn PacketSink> = Arc::clone(&transport) as _;
        let sessions = SessionManager::new(
            sink,
            deps.publisher,
            Arc::clone(&deps.bonus_provider),
            deps.runtime.clone(),
            deps.seed,
        );

        let (actions_tx, actions_rx) = flume::unbounded();

        Self {
            transport,
            connections: ConnectionManager::new(),
            sessions,
            validator: deps.validator,
            bonus_provider: deps.bonus_provider,
            runtime: deps.runtime,
            actions_tx,
            actions_rx,
            shutdown: Arc::new(AtomicBool::new(false)),
            server_tick: 0,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
        }
    }

    /// The game loop. Owns the calling thread until shut down.
    pub fn run(mut self) {
        let mut step = FixedStep::new(TICK_RATE);
        info!(addr = %self.transport.local_addr(), "zone server running");

        while !self.shutdown.load(Ordering::Relaxed) {
            for event in self.transport.poll() {
                self.handle_transport_event(event);
            }
            while let Ok(action) = self.actions_rx.try_recv() {
                self.handle_action(action);
            }

            for _ in 0..step.advance() {
                self.server_tick += 1;
                self.sessions.update_all(TICK_INTERVAL);
                for (_, peers) in self.sessions.sweep_ended() {
                    for peer in peers {
                        self.connections.return_to_lobby(peer);
                    }
                }
            }

            std::thread::sleep(step.sleep_budget());
        }

        info!("zone server stopping");
        self.sessions.force_end_all(MatchResult::ServerShutdown);
        self.sessions.sweep_ended();
        self.transport.shutdown();
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PeerConnected(peer) => {
                self.connections.on_connected(peer);
            }
            TransportEvent::PeerDisconnected(peer, reason) => {
                debug!(%peer, ?reason, "peer disconnected");
                self.sessions.handle_disconnect(peer);
                self.connections.on_disconnected(peer);
            }
            TransportEvent::Packet(peer, msg) => {
                self.handle_packet(peer, msg);
            }
        }
    }

    fn handle_packet(&mut self, peer: PeerId, msg: Message) {
        let Some(state) = self.connections.state(peer) else {
            debug!(%peer, "packet from unregistered peer dropped");
            return;
        };

        match classify(&msg) {
            PacketClass::Handshake => match &msg {
                Message::Connect(pkt) => self.handle_connect(peer, pkt),
                Message::Ping(pkt) => {
                    self.transport.send(
                        peer,
                        &Message::Pong(PongS2c {
                            client_time: pkt.client_time,
                            server_time: unix_millis(),
                        }),
                    );
                }
                _ => {}
            },
            PacketClass::Lobby => match state {
                PeerState::Unauthenticated { .. } => {
                    self.reject(peer, ErrorCode::NotAuthenticated, "authenticate first");
                }
                _ => self.handle_lobby(peer, state, &msg),
            },
            PacketClass::Game => match state {
                PeerState::InGame { .. } => self.sessions.route_packet(peer, &msg),
                PeerState::Lobby => {
                    self.reject(peer, ErrorCode::WrongState, "not in a match");
                }
                PeerState::Unauthenticated { .. } => {
                    self.reject(peer, ErrorCode::NotAuthenticated, "authenticate first");
                }
            },
            PacketClass::Clientbound => {
                debug!(%peer, name = msg.name(), "clientbound packet from peer dropped");
            }
        }
    }

    fn handle_connect(&mut self, peer: PeerId, pkt: &ConnectC2s) {
        if pkt.protocol_version != PROTOCOL_VERSION {
            warn!(
                %peer,
                theirs = pkt.protocol_version,
                ours = PROTOCOL_VERSION,
                "protocol version mismatch"
            );
            self.transport
                .disconnect(peer, DisconnectReason::ProtocolMismatch);
            return;
        }

        // A duplicate Connect (already validating, or already in Lobby or
        // beyond) is ignored.
        if !self.connections.begin_validation(peer) {
            return;
        }

        let validator = Arc::clone(&self.validator);
        let tx = self.actions_tx.clone();
        let token = pkt.connection_token.clone();
        self.runtime.spawn(async move {
            let outcome =
                match tokio::time::timeout(VALIDATION_TIMEOUT, validator.validate(&token)).await {
                    Ok(Ok(credentials)) => Ok(credentials),
                    Ok(Err(e)) => Err(format!("token store error: {e:#}")),
                    Err(_) => Err("token validation timed out".to_owned()),
                };
            let _ = tx.send(ServerAction::AuthResolved { peer, outcome });
        });
    }

    fn handle_lobby(&mut self, peer: PeerId, state: PeerState, msg: &Message) {
        match msg {
            Message::PlayerDataRequest(_) => {
                let Some(credentials) = self.connections.credentials(peer) else {
                    return;
                };
                let provider = Arc::clone(&self.bonus_provider);
                let tx = self.actions_tx.clone();
                self.runtime.spawn(async move {
                    match provider.player_data(credentials.character_id).await {
                        Ok(data) => {
                            let _ = tx.send(ServerAction::PlayerDataResolved { peer, data });
                        }
                        Err(e) => warn!(%peer, "player data lookup failed: {e:#}"),
                    }
                });
            }
            Message::RequestMatch(pkt) => {
                if matches!(state, PeerState::InGame { .. }) {
                    self.transport.send(
                        peer,
                        &Message::RequestMatchAck(RequestMatchAckS2c {
                            success: false,
                            match_id: None,
                            error: Some("already in a match".to_owned()),
                        }),
                    );
                    return;
                }
                let Some(credentials) = self.connections.credentials(peer) else {
                    return;
                };

                match self.sessions.request_match(peer, credentials, pkt.mode) {
                    Ok(match_id) => {
                        if !self.connections.set_in_game(peer, match_id) {
                            // The peer vanished between packet and join.
                            self.sessions.handle_disconnect(peer);
                            return;
                        }
                        self.transport.send(
                            peer,
                            &Message::RequestMatchAck(RequestMatchAckS2c {
                                success: true,
                                match_id: Some(match_id),
                                error: None,
                            }),
                        );
                        if let Some(session) = self.sessions.session_of_peer(peer) {
                            let snapshot = session.snapshot();
                            self.transport
                                .send(peer, &Message::StateSnapshot(snapshot));
                        }
                    }
                    Err(e) => {
                        self.transport.send(
                            peer,
                            &Message::RequestMatchAck(RequestMatchAckS2c {
                                success: false,
                                match_id: None,
                                error: Some(e.to_string()),
                            }),
                        );
                    }
                }
            }
            _ => {}
        }
    }

    fn handle_action(&mut self, action: ServerAction) {
        match action {
            ServerAction::AuthResolved { peer, outcome } => match outcome {
                Ok(Some(credentials)) => {
                    if self.connections.complete_auth(peer, credentials) {
                        self.transport.send(
                            peer,
                            &Message::ConnectAck(ConnectAckS2c {
                                peer_id: peer.0,
                                server_tick: self.server_tick,
                                tick_rate: TICK_RATE as u8,
                            }),
                        );
                        self.transport.send(
                            peer,
                            &Message::AuthResponse(AuthResponseS2c {
                                success: true,
                                error: None,
                            }),
                        );
                        info!(%peer, user = %credentials.user_id, "peer authenticated");
                    }
                }
                Ok(None) | Err(_) => {
                    if let Err(e) = &outcome {
                        warn!(%peer, "token validation failed: {e}");
                    } else {
                        debug!(%peer, "unknown or expired token");
                    }
                    self.connections.fail_validation(peer);
                    self.transport.send(
                        peer,
                        &Message::AuthResponse(AuthResponseS2c {
                            success: false,
                            error: Some("Invalid token".to_owned()),
                        }),
                    );
                    self.transport
                        .disconnect(peer, DisconnectReason::InvalidToken);
                }
            },
            ServerAction::PlayerDataResolved { peer, data } => {
                if self.connections.get(peer).is_none() {
                    return;
                }
                self.transport.send(
                    peer,
                    &Message::PlayerTowersResponse(PlayerTowersResponseS2c {
                        towers: data.towers,
                    }),
                );
                self.transport.send(
                    peer,
                    &Message::PlayerItemsResponse(PlayerItemsResponseS2c { items: data.items }),
                );
            }
        }
    }

    fn reject(&self, peer: PeerId, code: ErrorCode, message: &str) {
        self.transport.send(
            peer,
            &Message::Error(towerwars_protocol::packets::game_s2c::ErrorS2c {
                code,
                message: message.to_owned(),
                request_id: None,
            }),
        );
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
