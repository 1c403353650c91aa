use rand::seq::SliceRandom;

use crate::error::GameError;
use crate::types::Track;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("only {available} tracks available, {requested} requested")]
    InsufficientTracks { requested: usize, available: usize },

    #[error("track service unavailable: {0}")]
    Unavailable(String),
}

impl From<LookupError> for GameError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::InsufficientTracks {
                requested,
                available,
            } => GameError::InsufficientTracks {
                requested,
                available,
            },
            LookupError::Unavailable(reason) => GameError::LookupFailed(reason),
        }
    }
}

/// Source of playable tracks for a game.
///
/// Implementations may block; callers run them on the blocking pool.
pub trait TrackLookup: Send + Sync + 'static {
    /// Returns exactly `count` tracks by the given artists, in play order.
    fn lookup(&self, artists: &[String], count: usize) -> Result<Vec<Track>, LookupError>;
}

/// Track lookup backed by a fixed catalog loaded from config.
pub struct Catalog {
    tracks: Vec<Track>,
}

impl Catalog {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self { tracks }
    }
}

impl TrackLookup for Catalog {
    fn lookup(&self, artists: &[String], count: usize) -> Result<Vec<Track>, LookupError> {
        let mut matching: Vec<Track> = self
            .tracks
            .iter()
            .filter(|t| artists.iter().any(|a| a.eq_ignore_ascii_case(&t.artist)))
            .cloned()
            .collect();

        if matching.len() < count {
            return Err(LookupError::InsufficientTracks {
                requested: count,
                available: matching.len(),
            });
        }

        matching.shuffle(&mut rand::rng());
        matching.truncate(count);
        Ok(matching)
    }
}
