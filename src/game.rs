use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::config::GameConfig;
use crate::error::GameError;
use crate::hub::Hub;
use crate::room::{Departure, RoomStore, validate_settings};
use crate::scheduler::{RoundTimers, deadline, now_millis, round_delay};
use crate::tracks::{LookupError, TrackLookup};
use crate::types::*;

const ACTION_CHANNEL_SIZE: usize = 1024;

/// Everything the coordinator reacts to, from clients, timers and the track lookup.
#[derive(Debug)]
pub enum Action {
    CreateRoom {
        conn_id: ConnId,
        name: String,
    },
    JoinRoom {
        conn_id: ConnId,
        name: String,
        room_code: RoomCode,
    },
    UpdateSettings {
        conn_id: ConnId,
        room_code: RoomCode,
        settings: Settings,
    },
    StartGame {
        conn_id: ConnId,
        room_code: RoomCode,
        settings: Settings,
    },
    CorrectGuess {
        conn_id: ConnId,
        room_code: RoomCode,
    },
    Chat {
        conn_id: ConnId,
        room_code: RoomCode,
        message: ChatMessage,
    },
    ReturnToLobby {
        conn_id: ConnId,
        room_code: RoomCode,
    },
    Disconnect {
        conn_id: ConnId,
    },
    TimerFired {
        room_code: RoomCode,
        token: u64,
    },
    TracksResolved {
        room_code: RoomCode,
        requester: ConnId,
        result: Result<Vec<Track>, LookupError>,
    },
    RoomExists {
        room_code: RoomCode,
        reply: oneshot::Sender<bool>,
    },
}

impl Action {
    pub fn from_client(conn_id: ConnId, msg: ClientMsg) -> Self {
        match msg {
            ClientMsg::CreateRoom { name } => Self::CreateRoom { conn_id, name },
            ClientMsg::JoinRoom { name, room_code } => Self::JoinRoom {
                conn_id,
                name,
                room_code,
            },
            ClientMsg::UpdateSettings { room_code, settings } => Self::UpdateSettings {
                conn_id,
                room_code,
                settings,
            },
            ClientMsg::StartGame { room_code, settings } => Self::StartGame {
                conn_id,
                room_code,
                settings,
            },
            ClientMsg::CorrectGuess { room_code } => Self::CorrectGuess { conn_id, room_code },
            ClientMsg::Chat {
                room_code,
                name,
                time,
                text,
            } => Self::Chat {
                conn_id,
                room_code,
                message: ChatMessage { name, time, text },
            },
            ClientMsg::ReturnToLobby { room_code } => Self::ReturnToLobby { conn_id, room_code },
        }
    }
}

/// Cloneable entry point used by the socket layer.
#[derive(Clone)]
pub struct CoordinatorHandle {
    pub action_tx: mpsc::Sender<Action>,
}

impl CoordinatorHandle {
    pub async fn send(&self, action: Action) {
        if self.action_tx.send(action).await.is_err() {
            tracing::error!("Coordinator is gone, dropping action");
        }
    }

    pub async fn room_exists(&self, room_code: RoomCode) -> bool {
        let (reply, rx) = oneshot::channel();
        self.send(Action::RoomExists { room_code, reply }).await;
        rx.await.unwrap_or(false)
    }
}

/// Spawns the coordinator task and returns its handle.
pub fn spawn(hub: Arc<Hub>, lookup: Arc<dyn TrackLookup>, config: GameConfig) -> CoordinatorHandle {
    let (action_tx, action_rx) = mpsc::channel(ACTION_CHANNEL_SIZE);
    let coordinator = Coordinator::new(hub, lookup, config, action_tx.clone());
    tokio::spawn(coordinator.run(action_rx));
    CoordinatorHandle { action_tx }
}

fn reject(hub: &Hub, conn_id: &str, err: GameError) {
    tracing::debug!("Rejecting request from {}: {}", conn_id, err);
    hub.send_to(conn_id, err.to_msg());
}

/// Owns every room and applies actions one at a time.
pub struct Coordinator {
    store: RoomStore,
    hub: Arc<Hub>,
    timers: RoundTimers,
    lookup: Arc<dyn TrackLookup>,
    config: GameConfig,
    action_tx: mpsc::Sender<Action>,
}

impl Coordinator {
    pub fn new(
        hub: Arc<Hub>,
        lookup: Arc<dyn TrackLookup>,
        config: GameConfig,
        action_tx: mpsc::Sender<Action>,
    ) -> Self {
        Self {
            store: RoomStore::new(),
            hub,
            timers: RoundTimers::new(action_tx.clone()),
            lookup,
            config,
            action_tx,
        }
    }

    pub async fn run(mut self, mut action_rx: mpsc::Receiver<Action>) {
        while let Some(action) = action_rx.recv().await {
            self.handle(action);
        }
        tracing::info!("Coordinator stopped with {} rooms open", self.store.len());
    }

    pub fn handle(&mut self, action: Action) {
        match action {
            Action::CreateRoom { conn_id, name } => self.handle_create(conn_id, name),
            Action::JoinRoom {
                conn_id,
                name,
                room_code,
            } => self.handle_join(conn_id, name, room_code),
            Action::UpdateSettings {
                conn_id,
                room_code,
                settings,
            } => self.handle_update_settings(conn_id, room_code, settings),
            Action::StartGame {
                conn_id,
                room_code,
                settings,
            } => self.handle_start_game(conn_id, room_code, settings),
            Action::CorrectGuess { conn_id, room_code } => self.handle_correct_guess(conn_id, room_code),
            Action::Chat {
                conn_id,
                room_code,
                message,
            } => self.handle_chat(conn_id, room_code, message),
            Action::ReturnToLobby { conn_id, room_code } => self.handle_return_to_lobby(conn_id, room_code),
            Action::Disconnect { conn_id } => self.handle_disconnect(conn_id),
            Action::TimerFired { room_code, token } => self.handle_timer_fired(room_code, token),
            Action::TracksResolved {
                room_code,
                requester,
                result,
            } => self.handle_tracks_resolved(room_code, requester, result),
            Action::RoomExists { room_code, reply } => {
                let _ = reply.send(self.store.contains(&room_code));
            }
        }
    }

    fn handle_create(&mut self, conn_id: ConnId, name: String) {
        let settings = self.config.default_settings.clone();
        let code = match self.store.create_room(&conn_id, &name, settings) {
            Ok(code) => code,
            Err(err) => return reject(&self.hub, &conn_id, err),
        };
        self.hub.join(&code, &conn_id);
        tracing::info!("Room created: {} by {}", code, conn_id);

        self.hub.send_to(&conn_id, ServerMsg::RoomCreated {
            room_code: code.clone(),
        });
        if let Some(room) = self.store.get(&code) {
            self.hub.send_to(&conn_id, ServerMsg::RoomInfo {
                room: room.snapshot(),
            });
        }
    }

    fn handle_join(&mut self, conn_id: ConnId, name: String, room_code: RoomCode) {
        let room = match self.store.join_room(&conn_id, &name, &room_code) {
            Ok(room) => room,
            Err(err) => return reject(&self.hub, &conn_id, err),
        };
        let snapshot = room.snapshot();
        let name = room.player(&conn_id).map(|p| p.name.clone()).unwrap_or(name);
        // A game already under way is replayed to the joiner from its current phase.
        let catch_up = match room.state {
            RoomState::Countdown { starts_at } => Some(ServerMsg::RoundCountdown {
                starts_at,
                tracks: room.tracks.clone(),
                players: room.players.clone(),
            }),
            RoomState::InRound { round, ends_at } => (round as usize)
                .checked_sub(1)
                .and_then(|i| room.tracks.get(i))
                .cloned()
                .map(|track| ServerMsg::RoundBegin { track, round, ends_at }),
            RoomState::Lobby | RoomState::Ended => None,
        };

        self.hub.join(&room_code, &conn_id);
        tracing::info!("{} joined room {} ({} players)", conn_id, room_code, snapshot.players.len());

        self.hub.broadcast(&room_code, ServerMsg::RoomInfo { room: snapshot });
        self.hub.broadcast_except(&room_code, &conn_id, ServerMsg::NewMember { name });
        if let Some(msg) = catch_up {
            self.hub.send_to(&conn_id, msg);
        }
    }

    fn handle_update_settings(&mut self, conn_id: ConnId, room_code: RoomCode, settings: Settings) {
        match self.store.update_settings(&conn_id, &room_code, settings) {
            Ok(Some(room)) => {
                let settings = room.settings.clone();
                self.hub.broadcast(&room_code, ServerMsg::SettingsUpdated { settings });
            }
            Ok(None) => {}
            Err(err) => reject(&self.hub, &conn_id, err),
        }
    }

    fn handle_start_game(&mut self, conn_id: ConnId, room_code: RoomCode, settings: Settings) {
        let Some(room) = self.store.resolve_mut(&conn_id, &room_code) else {
            return;
        };
        if !room.is_host(&conn_id) {
            return reject(&self.hub, &conn_id, GameError::NotHost);
        }
        if room.state != RoomState::Lobby || room.lookup_pending {
            return reject(&self.hub, &conn_id, GameError::GameInProgress);
        }
        if settings.artists.is_empty() {
            return reject(&self.hub, &conn_id, GameError::InsufficientArtists);
        }
        if let Err(err) = validate_settings(&settings) {
            return reject(&self.hub, &conn_id, err);
        }

        room.settings = settings;
        room.lookup_pending = true;
        self.hub.broadcast(&room_code, ServerMsg::SettingsUpdated {
            settings: room.settings.clone(),
        });

        let artists = room.settings.artists.clone();
        let count = room.settings.num_rounds as usize;
        tracing::info!("Room {} looking up {} tracks from {} artists", room_code, count, artists.len());

        let lookup = self.lookup.clone();
        let tx = self.action_tx.clone();
        tokio::task::spawn_blocking(move || {
            let result = lookup.lookup(&artists, count);
            let _ = tx.blocking_send(Action::TracksResolved {
                room_code,
                requester: conn_id,
                result,
            });
        });
    }

    fn handle_tracks_resolved(
        &mut self,
        room_code: RoomCode,
        requester: ConnId,
        result: Result<Vec<Track>, LookupError>,
    ) {
        let Some(room) = self.store.get_mut(&room_code) else {
            tracing::debug!("Room {} closed before its tracks arrived", room_code);
            return;
        };
        room.lookup_pending = false;
        if room.state != RoomState::Lobby {
            tracing::warn!("Room {} got tracks while in state {}", room_code, room.state);
            return;
        }

        let requested = room.settings.num_rounds as usize;
        let mut tracks = match result {
            Ok(tracks) => tracks,
            Err(err) => {
                tracing::warn!("Track lookup for room {} failed: {}", room_code, err);
                return reject(&self.hub, &requester, err.into());
            }
        };
        if tracks.len() < requested {
            let err = GameError::InsufficientTracks {
                requested,
                available: tracks.len(),
            };
            return reject(&self.hub, &requester, err);
        }
        tracks.truncate(requested);

        room.reset_scores();
        room.tracks = tracks;
        let countdown = self.config.countdown();
        let starts_at = deadline(now_millis(), countdown);
        room.state = RoomState::Countdown { starts_at };

        self.hub.broadcast(&room_code, ServerMsg::RoundCountdown {
            starts_at,
            tracks: room.tracks.clone(),
            players: room.players.clone(),
        });
        self.timers.arm(&room_code, countdown);
        tracing::info!("Game starting in room {} with {} players", room_code, room.players.len());
    }

    fn handle_timer_fired(&mut self, room_code: RoomCode, token: u64) {
        if !self.timers.take(&room_code, token) {
            tracing::debug!("Discarding cancelled timer {} for room {}", token, room_code);
            return;
        }
        let Some(room) = self.store.get(&room_code) else {
            tracing::info!("Room {} is gone, dropping its round timer", room_code);
            return;
        };
        let (state, num_rounds) = (room.state, room.settings.num_rounds);

        match state {
            RoomState::Countdown { .. } => self.begin_round(&room_code, 1),
            RoomState::InRound { round, .. } if round >= num_rounds => self.end_game(&room_code),
            RoomState::InRound { round, .. } => self.begin_round(&room_code, round + 1),
            state => tracing::warn!("Round timer fired for room {} in state {}", room_code, state),
        }
    }

    fn begin_round(&mut self, room_code: &str, round: u32) {
        let Some(room) = self.store.get_mut(room_code) else {
            return;
        };
        let Some(track) = room.tracks.get(round as usize - 1).cloned() else {
            tracing::error!("Room {} has no track for round {}", room_code, round);
            return self.end_game(room_code);
        };

        room.reset_round();
        let timer = room.settings.timer;
        let ends_at = deadline(now_millis(), Duration::from_secs(timer));
        room.state = RoomState::InRound { round, ends_at };

        self.hub.broadcast(room_code, ServerMsg::RoundBegin { track, round, ends_at });
        self.timers.arm(room_code, round_delay(timer, self.config.reveal()));
        tracing::debug!("Room {} entered round {}", room_code, round);
    }

    fn end_game(&mut self, room_code: &str) {
        let Some(room) = self.store.get_mut(room_code) else {
            return;
        };
        room.state = RoomState::Ended;
        self.timers.cancel(room_code);

        let winners = room.winners();
        tracing::info!("Game ended in room {}, winners: {:?}", room_code, winners);
        self.hub.broadcast(room_code, ServerMsg::GameEnded {
            winners,
            players: room.players.clone(),
        });
    }

    fn handle_correct_guess(&mut self, conn_id: ConnId, room_code: RoomCode) {
        let Some(room) = self.store.resolve_mut(&conn_id, &room_code) else {
            return;
        };
        match room.record_correct_guess(&conn_id) {
            Ok(delta) => {
                tracing::debug!("{} scored {} in room {}", conn_id, delta, room_code);
                self.hub.broadcast(&room_code, ServerMsg::PlayersUpdated {
                    players: room.players.clone(),
                });
            }
            Err(reason) => {
                tracing::debug!("Ignoring guess from {} in room {}: {:?}", conn_id, room_code, reason);
            }
        }
    }

    fn handle_chat(&mut self, conn_id: ConnId, room_code: RoomCode, mut message: ChatMessage) {
        let Some(room) = self.store.resolve_mut(&conn_id, &room_code) else {
            return;
        };
        if let Some(player) = room.player(&conn_id) {
            message.name = player.name.clone();
        }
        room.push_chat(message.clone(), self.config.max_chat_log);
        self.hub.broadcast_except(&room_code, &conn_id, ServerMsg::Chat { message });
    }

    fn handle_return_to_lobby(&mut self, conn_id: ConnId, room_code: RoomCode) {
        let Some(room) = self.store.resolve_mut(&conn_id, &room_code) else {
            return;
        };
        if !room.is_host(&conn_id) {
            return reject(&self.hub, &conn_id, GameError::NotHost);
        }
        if room.state != RoomState::Ended {
            tracing::debug!("Room {} cannot return to lobby from {}", room_code, room.state);
            return;
        }

        room.state = RoomState::Lobby;
        room.tracks.clear();
        room.reset_round();
        self.hub.broadcast(&room_code, ServerMsg::RoomInfo {
            room: room.snapshot(),
        });
    }

    /// Reconciles a closed connection. The store's player list decides whether
    /// the room survives; the transport snapshot is only compared for logging.
    fn handle_disconnect(&mut self, conn_id: ConnId) {
        self.hub.unregister(&conn_id);
        let attached = self
            .store
            .room_of(&conn_id)
            .map(|code| self.hub.members(code))
            .unwrap_or_default();

        match self.store.remove_connection(&conn_id) {
            Departure::Unmapped => {
                tracing::debug!("Connection {} closed outside any room", conn_id);
            }
            Departure::StaleRoom { code } => {
                tracing::warn!("Connection {} mapped to room {} which no longer exists", conn_id, code);
            }
            Departure::NotInRoom { code } => {
                tracing::warn!("Connection {} not found among players of room {}", conn_id, code);
            }
            Departure::RoomClosed { code, player } => {
                if !attached.is_empty() {
                    tracing::warn!(
                        "Room {} has no players left but {} connections still attached",
                        code,
                        attached.len()
                    );
                }
                self.timers.cancel(&code);
                self.hub.drop_room(&code);
                tracing::info!("Room {} deleted after {} left", code, player.name);
            }
            Departure::Left {
                code,
                player,
                promoted,
            } => {
                if attached.is_empty() {
                    tracing::warn!("Room {} has players but no attached connections, keeping it", code);
                }
                if let Some(new_host) = promoted {
                    tracing::info!("Room {} host moved to {}", code, new_host);
                    self.hub.send_to(&new_host, ServerMsg::HostPromoted);
                }
                if let Some(room) = self.store.get(&code) {
                    self.hub.broadcast(&code, ServerMsg::RoomInfo {
                        room: room.snapshot(),
                    });
                }
                self.hub.broadcast(&code, ServerMsg::MemberLeft { name: player.name });
            }
        }
    }
}
