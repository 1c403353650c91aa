use serde::{Deserialize, Serialize};

/// Identifier of one live WebSocket connection.
pub type ConnId = String;

/// Opaque code identifying a room.
pub type RoomCode = String;

pub const MAX_NAME_LEN: usize = 20;
pub const TIMER_RANGE: std::ops::RangeInclusive<u64> = 10..=300;
pub const ROUNDS_RANGE: std::ops::RangeInclusive<u32> = 1..=50;

/// A player in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub conn_id: ConnId,
    pub name: String,
    pub is_host: bool,
    pub score: u32,
    pub answered: bool,
}

impl Player {
    pub fn new(conn_id: ConnId, name: String, is_host: bool) -> Self {
        Self {
            conn_id,
            name,
            is_host,
            score: 0,
            answered: false,
        }
    }
}

/// Game settings chosen by the host in the lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Seconds players have to guess each track.
    pub timer: u64,
    pub num_rounds: u32,
    #[serde(default)]
    pub artists: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timer: 60,
            num_rounds: 5,
            artists: Vec::new(),
        }
    }
}

/// A playable track returned by the lookup service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub artist: String,
    #[serde(default)]
    pub preview_url: Option<String>,
}

/// A chat line relayed within a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub name: String,
    /// Client-formatted display time.
    pub time: String,
    pub text: String,
}

/// Where a room is in its game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RoomState {
    Lobby,
    Countdown { starts_at: u64 },
    InRound { round: u32, ends_at: u64 },
    Ended,
}

impl std::fmt::Display for RoomState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lobby => write!(f, "LOBBY"),
            Self::Countdown { .. } => write!(f, "COUNTDOWN"),
            Self::InRound { round, .. } => write!(f, "IN_ROUND({})", round),
            Self::Ended => write!(f, "ENDED"),
        }
    }
}

/// Everything a client needs to render a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub code: RoomCode,
    pub players: Vec<Player>,
    pub settings: Settings,
    pub state: RoomState,
    /// Chat of the current round, oldest first.
    pub chat_log: Vec<ChatMessage>,
}

/// Stable wire identifiers for recoverable errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    RoomNotFound,
    InsufficientArtists,
    InsufficientTracks,
    LookupFailed,
    InvalidName,
    InvalidSettings,
    AlreadyInRoom,
    NotHost,
    GameInProgress,
}

/// Messages sent from server to clients via WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMsg {
    RoomCreated {
        room_code: RoomCode,
    },
    RoomInfo {
        room: RoomSnapshot,
    },
    NewMember {
        name: String,
    },
    MemberLeft {
        name: String,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
    SettingsUpdated {
        settings: Settings,
    },
    RoundCountdown {
        starts_at: u64,
        tracks: Vec<Track>,
        players: Vec<Player>,
    },
    RoundBegin {
        track: Track,
        round: u32,
        ends_at: u64,
    },
    PlayersUpdated {
        players: Vec<Player>,
    },
    GameEnded {
        winners: Vec<String>,
        players: Vec<Player>,
    },
    Chat {
        message: ChatMessage,
    },
    HostPromoted,
}

/// Messages sent from clients to server via WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMsg {
    CreateRoom { name: String },
    JoinRoom { name: String, room_code: RoomCode },
    UpdateSettings { room_code: RoomCode, settings: Settings },
    StartGame { room_code: RoomCode, settings: Settings },
    CorrectGuess { room_code: RoomCode },
    Chat { room_code: RoomCode, name: String, time: String, text: String },
    ReturnToLobby { room_code: RoomCode },
}
