use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{Settings, Track};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Longest countdown or reveal pause accepted from game.json.
const MAX_PAUSE_SECONDS: f64 = 600.0;

/// Server-wide game configuration loaded from game.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameConfig {
    /// Settings a freshly created room starts with.
    #[serde(default)]
    pub default_settings: Settings,
    /// Grace window between game start and round 1.
    #[serde(default = "default_countdown_seconds")]
    pub countdown_seconds: f64,
    /// Pause after a round's timer runs out before the next round.
    #[serde(default = "default_reveal_seconds")]
    pub reveal_seconds: f64,
    /// Chat lines kept per room before the oldest are dropped.
    #[serde(default = "default_max_chat_log")]
    pub max_chat_log: usize,
}

fn default_countdown_seconds() -> f64 {
    5.0
}

fn default_reveal_seconds() -> f64 {
    2.5
}

fn default_max_chat_log() -> usize {
    200
}

fn pause(seconds: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(seconds)
        .ok()
        .filter(|d| d.as_secs_f64() <= MAX_PAUSE_SECONDS)
        .unwrap_or_else(|| Duration::from_secs_f64(fallback))
}

fn check_pause(field: &'static str, seconds: f64) -> Result<(), ConfigError> {
    if !seconds.is_finite() || !(0.0..=MAX_PAUSE_SECONDS).contains(&seconds) {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("expected 0 to {} seconds, got {}", MAX_PAUSE_SECONDS, seconds),
        });
    }
    Ok(())
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            default_settings: Settings::default(),
            countdown_seconds: default_countdown_seconds(),
            reveal_seconds: default_reveal_seconds(),
            max_chat_log: default_max_chat_log(),
        }
    }
}

impl GameConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_pause("countdownSeconds", self.countdown_seconds)?;
        check_pause("revealSeconds", self.reveal_seconds)?;
        if self.max_chat_log == 0 {
            return Err(ConfigError::Invalid {
                field: "maxChatLog",
                reason: "must keep at least one line".to_string(),
            });
        }
        Ok(())
    }

    /// Out-of-range values fall back to the default rather than panicking.
    pub fn countdown(&self) -> Duration {
        pause(self.countdown_seconds, default_countdown_seconds())
    }

    pub fn reveal(&self) -> Duration {
        pause(self.reveal_seconds, default_reveal_seconds())
    }
}

/// Resolves a path relative to the config directory.
fn config_path(sub: &str) -> PathBuf {
    let base = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config".to_string());
    Path::new(&base).join(sub)
}

fn write_json(path: &Path, value: &serde_json::Value) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    let data = serde_json::to_string_pretty(value).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, data).map_err(io_err)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Initialize config directory with defaults if missing.
pub fn init() -> Result<(), ConfigError> {
    let base = config_path("");
    if !base.exists() {
        fs::create_dir_all(&base).map_err(|source| ConfigError::Io {
            path: base.clone(),
            source,
        })?;
    }

    let game_path = config_path("game.json");
    if !game_path.exists() {
        let default_config = serde_json::json!({
            "defaultSettings": { "timer": 60, "num_rounds": 5, "artists": [] },
            "countdownSeconds": 5.0,
            "revealSeconds": 2.5,
            "maxChatLog": 200
        });
        write_json(&game_path, &default_config)?;
    }

    let tracks_path = config_path("tracks.json");
    if !tracks_path.exists() {
        let example = serde_json::json!([
            { "id": "1", "name": "First Song", "artist": "Example Artist", "preview_url": null },
            { "id": "2", "name": "Second Song", "artist": "Example Artist", "preview_url": null },
            { "id": "3", "name": "Third Song", "artist": "Example Artist", "preview_url": null },
            { "id": "4", "name": "Fourth Song", "artist": "Example Artist", "preview_url": null },
            { "id": "5", "name": "Fifth Song", "artist": "Example Artist", "preview_url": null }
        ]);
        write_json(&tracks_path, &example)?;
    }

    Ok(())
}

/// Load the game configuration.
pub fn load_game_config() -> Result<GameConfig, ConfigError> {
    let config: GameConfig = read_json(&config_path("game.json"))?;
    config.validate()?;
    Ok(config)
}

/// Load the track catalog served to games.
pub fn load_catalog() -> Result<Vec<Track>, ConfigError> {
    let tracks: Vec<Track> = read_json(&config_path("tracks.json"))?;
    tracing::info!("Loaded {} tracks", tracks.len());
    Ok(tracks)
}
