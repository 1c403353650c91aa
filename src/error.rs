//! Recoverable errors reported back to the connection that caused them.

use crate::types::{ErrorCode, RoomCode, ServerMsg};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("room {0} does not exist")]
    RoomNotFound(RoomCode),

    #[error("pick at least one artist before starting")]
    InsufficientArtists,

    #[error("only {available} tracks found for {requested} rounds")]
    InsufficientTracks { requested: usize, available: usize },

    #[error("track lookup failed: {0}")]
    LookupFailed(String),

    #[error("name must be 1 to {max} characters")]
    InvalidName { max: usize },

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("already in room {0}")]
    AlreadyInRoom(RoomCode),

    #[error("only the host can do that")]
    NotHost,

    #[error("a game is already running in this room")]
    GameInProgress,
}

impl GameError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::RoomNotFound(_) => ErrorCode::RoomNotFound,
            Self::InsufficientArtists => ErrorCode::InsufficientArtists,
            Self::InsufficientTracks { .. } => ErrorCode::InsufficientTracks,
            Self::LookupFailed(_) => ErrorCode::LookupFailed,
            Self::InvalidName { .. } => ErrorCode::InvalidName,
            Self::InvalidSettings(_) => ErrorCode::InvalidSettings,
            Self::AlreadyInRoom(_) => ErrorCode::AlreadyInRoom,
            Self::NotHost => ErrorCode::NotHost,
            Self::GameInProgress => ErrorCode::GameInProgress,
        }
    }

    pub fn to_msg(&self) -> ServerMsg {
        ServerMsg::Error {
            code: self.code(),
            message: self.to_string(),
        }
    }
}
