use std::collections::HashMap;

use rand::Rng;

use crate::error::GameError;
use crate::scoring::score_delta;
use crate::types::*;

const CODE_LEN: usize = 8;
// No 0/O or 1/I/L, codes get read aloud.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Random room code. Uniqueness against live rooms is checked by the store.
pub fn create_room_code() -> RoomCode {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| char::from(CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())]))
        .collect()
}

fn validate_name(name: &str) -> Result<String, GameError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(GameError::InvalidName { max: MAX_NAME_LEN });
    }
    Ok(name.to_string())
}

pub fn validate_settings(settings: &Settings) -> Result<(), GameError> {
    if !TIMER_RANGE.contains(&settings.timer) {
        return Err(GameError::InvalidSettings(format!(
            "timer must be between {} and {} seconds",
            TIMER_RANGE.start(),
            TIMER_RANGE.end()
        )));
    }
    if !ROUNDS_RANGE.contains(&settings.num_rounds) {
        return Err(GameError::InvalidSettings(format!(
            "rounds must be between {} and {}",
            ROUNDS_RANGE.start(),
            ROUNDS_RANGE.end()
        )));
    }
    Ok(())
}

/// Why a correct guess was not scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuessRejected {
    NotInRound,
    UnknownPlayer,
    AlreadyAnswered,
}

/// One independent game instance.
#[derive(Debug, Clone)]
pub struct Room {
    pub code: RoomCode,
    pub players: Vec<Player>,
    pub settings: Settings,
    pub chat_log: Vec<ChatMessage>,
    pub correct_guesses: u32,
    pub tracks: Vec<Track>,
    pub state: RoomState,
    pub lookup_pending: bool,
}

impl Room {
    fn new(code: RoomCode, host: Player, settings: Settings) -> Self {
        Self {
            code,
            players: vec![host],
            settings,
            chat_log: Vec::new(),
            correct_guesses: 0,
            tracks: Vec::new(),
            state: RoomState::Lobby,
            lookup_pending: false,
        }
    }

    pub fn player(&self, conn_id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.conn_id == conn_id)
    }

    pub fn is_host(&self, conn_id: &str) -> bool {
        self.player(conn_id).is_some_and(|p| p.is_host)
    }

    pub fn host(&self) -> Option<&Player> {
        self.players.iter().find(|p| p.is_host)
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            code: self.code.clone(),
            players: self.players.clone(),
            settings: self.settings.clone(),
            state: self.state,
            chat_log: self.chat_log.clone(),
        }
    }

    /// Appends to the chat log, dropping the oldest lines beyond `cap`.
    pub fn push_chat(&mut self, message: ChatMessage, cap: usize) {
        self.chat_log.push(message);
        if self.chat_log.len() > cap {
            let excess = self.chat_log.len() - cap;
            self.chat_log.drain(..excess);
        }
    }

    /// Clears everything that only lives for one round.
    pub fn reset_round(&mut self) {
        self.chat_log.clear();
        self.correct_guesses = 0;
        for player in &mut self.players {
            player.answered = false;
        }
    }

    pub fn reset_scores(&mut self) {
        for player in &mut self.players {
            player.score = 0;
            player.answered = false;
        }
    }

    /// Scores a correct guess by its order within the round and returns the points awarded.
    pub fn record_correct_guess(&mut self, conn_id: &str) -> Result<u32, GuessRejected> {
        if !matches!(self.state, RoomState::InRound { .. }) {
            return Err(GuessRejected::NotInRound);
        }
        let order = self.correct_guesses;
        let player = self
            .players
            .iter_mut()
            .find(|p| p.conn_id == conn_id)
            .ok_or(GuessRejected::UnknownPlayer)?;
        if player.answered {
            return Err(GuessRejected::AlreadyAnswered);
        }

        let delta = score_delta(order);
        player.score += delta;
        player.answered = true;
        self.correct_guesses += 1;
        Ok(delta)
    }

    /// Names of every player tied at the top score.
    pub fn winners(&self) -> Vec<String> {
        let Some(best) = self.players.iter().map(|p| p.score).max() else {
            return Vec::new();
        };
        self.players
            .iter()
            .filter(|p| p.score == best)
            .map(|p| p.name.clone())
            .collect()
    }
}

/// Which room each live connection belongs to.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    room_of: HashMap<ConnId, RoomCode>,
}

impl ConnectionRegistry {
    pub fn get(&self, conn_id: &str) -> Option<&RoomCode> {
        self.room_of.get(conn_id)
    }

    fn insert(&mut self, conn_id: ConnId, code: RoomCode) {
        self.room_of.insert(conn_id, code);
    }

    fn remove(&mut self, conn_id: &str) -> Option<RoomCode> {
        self.room_of.remove(conn_id)
    }
}

/// Outcome of removing a connection from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Departure {
    /// The connection was never mapped to a room, or was already reconciled.
    Unmapped,
    /// The mapping pointed at a room that no longer exists.
    StaleRoom { code: RoomCode },
    /// The room exists but has no player for this connection.
    NotInRoom { code: RoomCode },
    /// The last player left and the room was deleted.
    RoomClosed { code: RoomCode, player: Player },
    /// The player left a room that still has members.
    Left {
        code: RoomCode,
        player: Player,
        promoted: Option<ConnId>,
    },
}

/// Sole owner of every room and of the connection registry.
#[derive(Debug, Default)]
pub struct RoomStore {
    rooms: HashMap<RoomCode, Room>,
    registry: ConnectionRegistry,
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.rooms.contains_key(code)
    }

    pub fn get(&self, code: &str) -> Option<&Room> {
        self.rooms.get(code)
    }

    pub fn get_mut(&mut self, code: &str) -> Option<&mut Room> {
        self.rooms.get_mut(code)
    }

    pub fn room_of(&self, conn_id: &str) -> Option<&RoomCode> {
        self.registry.get(conn_id)
    }

    /// Resolves the room `conn_id` is in, provided it is the room the client named.
    pub fn resolve_mut(&mut self, conn_id: &str, code: &str) -> Option<&mut Room> {
        match self.registry.get(conn_id) {
            Some(mapped) if mapped == code => {}
            Some(mapped) => {
                tracing::warn!("Connection {} addressed room {} but is in {}", conn_id, code, mapped);
                return None;
            }
            None => {
                tracing::debug!("Connection {} is not in any room", conn_id);
                return None;
            }
        }
        let room = self.rooms.get_mut(code);
        if room.is_none() {
            tracing::warn!("Connection {} mapped to missing room {}", conn_id, code);
        }
        room
    }

    pub fn create_room(
        &mut self,
        conn_id: &str,
        name: &str,
        settings: Settings,
    ) -> Result<RoomCode, GameError> {
        self.create_room_with(conn_id, name, settings, create_room_code)
    }

    /// Creates a room, drawing codes from `next_code` until one is free.
    pub fn create_room_with(
        &mut self,
        conn_id: &str,
        name: &str,
        settings: Settings,
        mut next_code: impl FnMut() -> RoomCode,
    ) -> Result<RoomCode, GameError> {
        if let Some(code) = self.registry.get(conn_id) {
            return Err(GameError::AlreadyInRoom(code.clone()));
        }
        let name = validate_name(name)?;

        let code = loop {
            let code = next_code();
            if !self.rooms.contains_key(&code) {
                break code;
            }
            tracing::warn!("Room code collision on {}, regenerating", code);
        };

        let host = Player::new(conn_id.to_string(), name, true);
        self.rooms.insert(code.clone(), Room::new(code.clone(), host, settings));
        self.registry.insert(conn_id.to_string(), code.clone());
        Ok(code)
    }

    pub fn join_room(&mut self, conn_id: &str, name: &str, code: &str) -> Result<&Room, GameError> {
        if let Some(current) = self.registry.get(conn_id) {
            return Err(GameError::AlreadyInRoom(current.clone()));
        }
        let name = validate_name(name)?;
        let room = self
            .rooms
            .get_mut(code)
            .ok_or_else(|| GameError::RoomNotFound(code.to_string()))?;

        // An emptied room is deleted, so a live room always has its host already.
        room.players.push(Player::new(conn_id.to_string(), name, false));
        self.registry.insert(conn_id.to_string(), code.to_string());
        Ok(room)
    }

    /// Replaces the settings of a lobby. Returns `Ok(None)` when the room
    /// could not be resolved or is not in the lobby.
    pub fn update_settings(
        &mut self,
        conn_id: &str,
        code: &str,
        settings: Settings,
    ) -> Result<Option<&Room>, GameError> {
        let Some(room) = self.resolve_mut(conn_id, code) else {
            return Ok(None);
        };
        if !room.is_host(conn_id) {
            return Err(GameError::NotHost);
        }
        if room.state != RoomState::Lobby || room.lookup_pending {
            tracing::debug!("Ignoring settings for room {} in state {}", code, room.state);
            return Ok(None);
        }
        validate_settings(&settings)?;
        room.settings = settings;
        Ok(Some(&*room))
    }

    /// Drops a connection from the registry and its room, deleting the room
    /// when nobody is left and promoting a new host when the host left.
    pub fn remove_connection(&mut self, conn_id: &str) -> Departure {
        let Some(code) = self.registry.remove(conn_id) else {
            return Departure::Unmapped;
        };
        let Some(room) = self.rooms.get_mut(&code) else {
            return Departure::StaleRoom { code };
        };
        let Some(index) = room.players.iter().position(|p| p.conn_id == conn_id) else {
            return Departure::NotInRoom { code };
        };

        let player = room.players.remove(index);
        if room.players.is_empty() {
            self.rooms.remove(&code);
            return Departure::RoomClosed { code, player };
        }

        let mut promoted = None;
        if player.is_host || room.host().is_none() {
            let next = &mut room.players[0];
            next.is_host = true;
            promoted = Some(next.conn_id.clone());
        }
        Departure::Left {
            code,
            player,
            promoted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_players(names: &[&str]) -> (RoomStore, RoomCode) {
        let mut store = RoomStore::new();
        let code = store
            .create_room(names[0], names[0], Settings::default())
            .unwrap();
        for name in &names[1..] {
            store.join_room(name, name, &code).unwrap();
        }
        (store, code)
    }

    fn host_count(room: &Room) -> usize {
        room.players.iter().filter(|p| p.is_host).count()
    }

    #[test]
    fn room_codes_use_unambiguous_alphabet() {
        let code = create_room_code();
        assert_eq!(code.len(), CODE_LEN);
        assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
    }

    #[test]
    fn creator_is_sole_host() {
        let (store, code) = store_with_players(&["ana", "ben", "cy"]);
        let room = store.get(&code).unwrap();
        assert_eq!(room.players.len(), 3);
        assert_eq!(host_count(room), 1);
        assert!(room.is_host("ana"));
        assert_eq!(room.state, RoomState::Lobby);
        assert_eq!(store.room_of("ben"), Some(&code));
    }

    #[test]
    fn colliding_code_is_regenerated() {
        let mut store = RoomStore::new();
        let mut codes = vec!["SAME".to_string(), "SAME".to_string(), "OTHER".to_string()].into_iter();
        let first = store
            .create_room_with("a", "ana", Settings::default(), || codes.next().unwrap())
            .unwrap();
        let second = store
            .create_room_with("b", "ben", Settings::default(), || codes.next().unwrap())
            .unwrap();
        assert_eq!(first, "SAME");
        assert_eq!(second, "OTHER");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn joining_unknown_room_fails() {
        let mut store = RoomStore::new();
        let err = store.join_room("a", "ana", "NOPE").unwrap_err();
        assert_eq!(err, GameError::RoomNotFound("NOPE".to_string()));
        assert!(store.room_of("a").is_none());
    }

    #[test]
    fn names_are_validated() {
        let mut store = RoomStore::new();
        assert!(matches!(
            store.create_room("a", "   ", Settings::default()),
            Err(GameError::InvalidName { .. })
        ));
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(store.create_room("a", &long, Settings::default()).is_err());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn connection_cannot_be_in_two_rooms() {
        let (mut store, code) = store_with_players(&["ana"]);
        let err = store.create_room("ana", "ana", Settings::default()).unwrap_err();
        assert_eq!(err, GameError::AlreadyInRoom(code.clone()));
        let err = store.join_room("ana", "ana", &code).unwrap_err();
        assert_eq!(err, GameError::AlreadyInRoom(code));
    }

    #[test]
    fn only_host_updates_settings_in_lobby() {
        let (mut store, code) = store_with_players(&["ana", "ben"]);
        let settings = Settings {
            timer: 30,
            num_rounds: 5,
            artists: vec!["Artist A".to_string()],
        };

        assert_eq!(
            store.update_settings("ben", &code, settings.clone()).unwrap_err(),
            GameError::NotHost
        );
        let room = store.update_settings("ana", &code, settings.clone()).unwrap().unwrap();
        assert_eq!(room.settings, settings);

        store.get_mut(&code).unwrap().state = RoomState::Ended;
        let other = Settings { timer: 40, ..settings.clone() };
        assert!(store.update_settings("ana", &code, other).unwrap().is_none());
        assert_eq!(store.get(&code).unwrap().settings, settings);
    }

    #[test]
    fn out_of_range_settings_are_rejected() {
        let (mut store, code) = store_with_players(&["ana"]);
        let bad = Settings { timer: 0, ..Settings::default() };
        assert!(matches!(
            store.update_settings("ana", &code, bad),
            Err(GameError::InvalidSettings(_))
        ));
        let bad = Settings { num_rounds: 0, ..Settings::default() };
        assert!(store.update_settings("ana", &code, bad).is_err());
    }

    #[test]
    fn stale_mapping_is_a_no_op() {
        let (mut store, code) = store_with_players(&["ana"]);
        assert!(store.resolve_mut("ghost", &code).is_none());
        assert!(store.resolve_mut("ana", "ELSEWHERE").is_none());
        assert!(store.update_settings("ghost", &code, Settings::default()).unwrap().is_none());
    }

    #[test]
    fn scores_by_guess_order() {
        let (mut store, code) = store_with_players(&["a", "b", "c"]);
        let room = store.get_mut(&code).unwrap();
        room.state = RoomState::InRound { round: 1, ends_at: 0 };

        assert_eq!(room.record_correct_guess("b"), Ok(125));
        assert_eq!(room.record_correct_guess("c"), Ok(100));
        assert_eq!(room.record_correct_guess("a"), Ok(80));
        assert_eq!(room.correct_guesses, 3);
        assert!(room.players.iter().all(|p| p.answered));

        let scores: Vec<u32> = room.players.iter().map(|p| p.score).collect();
        assert_eq!(scores, vec![80, 125, 100]);
    }

    #[test]
    fn second_guess_in_round_is_not_rescored() {
        let (mut store, code) = store_with_players(&["a", "b"]);
        let room = store.get_mut(&code).unwrap();
        room.state = RoomState::InRound { round: 1, ends_at: 0 };

        assert_eq!(room.record_correct_guess("a"), Ok(125));
        assert_eq!(room.record_correct_guess("a"), Err(GuessRejected::AlreadyAnswered));
        assert_eq!(room.correct_guesses, 1);
        assert_eq!(room.player("a").unwrap().score, 125);
        assert_eq!(room.record_correct_guess("zz"), Err(GuessRejected::UnknownPlayer));
    }

    #[test]
    fn guesses_outside_round_are_ignored() {
        let (mut store, code) = store_with_players(&["a"]);
        let room = store.get_mut(&code).unwrap();
        assert_eq!(room.record_correct_guess("a"), Err(GuessRejected::NotInRound));
        room.state = RoomState::Countdown { starts_at: 0 };
        assert_eq!(room.record_correct_guess("a"), Err(GuessRejected::NotInRound));
        assert_eq!(room.player("a").unwrap().score, 0);
    }

    #[test]
    fn round_reset_clears_per_round_state_only() {
        let (mut store, code) = store_with_players(&["a", "b"]);
        let room = store.get_mut(&code).unwrap();
        room.state = RoomState::InRound { round: 1, ends_at: 0 };
        room.record_correct_guess("a").unwrap();
        room.chat_log.push(ChatMessage {
            name: "b".to_string(),
            time: "9:00 PM".to_string(),
            text: "hmm".to_string(),
        });

        room.reset_round();
        assert!(room.chat_log.is_empty());
        assert_eq!(room.correct_guesses, 0);
        assert!(room.players.iter().all(|p| !p.answered));
        assert_eq!(room.player("a").unwrap().score, 125);
    }

    #[test]
    fn chat_log_keeps_newest_lines_up_to_cap() {
        let (mut store, code) = store_with_players(&["a"]);
        let room = store.get_mut(&code).unwrap();
        for i in 0..10_000 {
            room.push_chat(
                ChatMessage {
                    name: "a".to_string(),
                    time: "9:00 PM".to_string(),
                    text: i.to_string(),
                },
                50,
            );
        }

        assert_eq!(room.chat_log.len(), 50);
        assert_eq!(room.chat_log[0].text, "9950");
        assert_eq!(room.chat_log[49].text, "9999");

        let snapshot = room.snapshot();
        assert_eq!(snapshot.chat_log.len(), 50);
        assert_eq!(snapshot.chat_log[49].text, "9999");
    }

    #[test]
    fn every_tied_leader_wins() {
        let (mut store, code) = store_with_players(&["a", "b", "c"]);
        let room = store.get_mut(&code).unwrap();
        room.players[0].score = 205;
        room.players[1].score = 180;
        room.players[2].score = 205;
        assert_eq!(room.winners(), vec!["a".to_string(), "c".to_string()]);

        room.reset_scores();
        assert_eq!(room.winners().len(), 3);
    }

    #[test]
    fn non_host_leaving_keeps_host() {
        let (mut store, code) = store_with_players(&["a", "b", "c"]);
        let departure = store.remove_connection("b");
        assert!(matches!(departure, Departure::Left { promoted: None, .. }));

        let room = store.get(&code).unwrap();
        assert_eq!(host_count(room), 1);
        assert!(room.is_host("a"));
        assert!(store.room_of("b").is_none());
    }

    #[test]
    fn host_leaving_promotes_first_remaining() {
        let (mut store, code) = store_with_players(&["a", "b", "c"]);
        match store.remove_connection("a") {
            Departure::Left { player, promoted, .. } => {
                assert_eq!(player.name, "a");
                assert_eq!(promoted.as_deref(), Some("b"));
            }
            other => panic!("unexpected departure {:?}", other),
        }
        let room = store.get(&code).unwrap();
        assert_eq!(host_count(room), 1);
        assert!(room.is_host("b"));
    }

    #[test]
    fn last_player_leaving_closes_room() {
        let (mut store, code) = store_with_players(&["a"]);
        assert!(matches!(store.remove_connection("a"), Departure::RoomClosed { .. }));
        assert!(!store.contains(&code));
        assert_eq!(
            store.join_room("b", "ben", &code).unwrap_err(),
            GameError::RoomNotFound(code)
        );
    }

    #[test]
    fn repeated_removal_is_absorbed() {
        let (mut store, code) = store_with_players(&["a", "b"]);
        store.remove_connection("b");
        assert_eq!(store.remove_connection("b"), Departure::Unmapped);

        store.registry.insert("ghost".to_string(), code.clone());
        assert_eq!(store.remove_connection("ghost"), Departure::NotInRoom { code: code.clone() });

        store.registry.insert("stale".to_string(), "GONE".to_string());
        assert_eq!(
            store.remove_connection("stale"),
            Departure::StaleRoom { code: "GONE".to_string() }
        );
        assert_eq!(store.get(&code).unwrap().players.len(), 1);
    }
}
