//! Persistent jukebox configuration model and defaults.

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::errors::JukeboxError;

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Which playlist to follow and how.
    pub playback: PlaybackConfig,
    #[serde(default)]
    /// Streaming session tuning.
    pub session: SessionConfig,
    #[serde(default)]
    /// Backend library source.
    pub library: LibraryConfig,
}

/// Playback preferences.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PlaybackConfig {
    /// Name of the playlist to play; `--playlist` overrides it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist: Option<String>,
    /// Remove tracks from the playlist once they finished playing.
    #[serde(default)]
    pub remove_played_tracks: bool,
}

/// Streaming session settings.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SessionConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Backend thread tick, in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Notifications delivered per processing pass before asking to be called again.
    #[serde(default = "default_max_events_per_pass")]
    pub max_events_per_pass: usize,
}

/// Where the backend reads its playlists from.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LibraryConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            tick_ms: default_tick_ms(),
            max_events_per_pass: default_max_events_per_pass(),
        }
    }
}

fn default_user_agent() -> String {
    "jukebox".to_string()
}

fn default_tick_ms() -> u64 {
    50
}

fn default_max_events_per_pass() -> usize {
    16
}

/// Clamps values that would stall or spin the backend.
pub fn sanitize_config(config: Config) -> Config {
    let user_agent = if config.session.user_agent.trim().is_empty() {
        default_user_agent()
    } else {
        config.session.user_agent
    };
    let playlist = config
        .playback
        .playlist
        .filter(|name| !name.trim().is_empty());

    Config {
        playback: PlaybackConfig {
            playlist,
            remove_played_tracks: config.playback.remove_played_tracks,
        },
        session: SessionConfig {
            user_agent,
            tick_ms: config.session.tick_ms.clamp(5, 1_000),
            max_events_per_pass: config.session.max_events_per_pass.max(1),
        },
        library: config.library,
    }
}

/// Default config location, `<config dir>/jukebox/config.toml`.
pub fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("jukebox").join("config.toml"))
}

/// Reads and sanitizes `path`. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config, JukeboxError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str::<Config>(&content)?;
    Ok(sanitize_config(config))
}

/// Writes the default config to `path` when nothing is there yet. Failures
/// are logged and otherwise ignored; the defaults are used either way.
pub fn ensure_default_config(path: &Path) {
    if path.exists() {
        return;
    }
    info!(
        "Config file not found. Creating default config. path={}",
        path.display()
    );
    let content = match toml::to_string(&Config::default()) {
        Ok(content) => content,
        Err(err) => {
            warn!("Failed to serialize default config: {}", err);
            return;
        }
    };
    if let Some(parent) = path.parent() {
        if let Err(err) = std::fs::create_dir_all(parent) {
            warn!(
                "Failed to create config directory {}: {}",
                parent.display(),
                err
            );
            return;
        }
    }
    if let Err(err) = std::fs::write(path, content) {
        warn!("Failed to write default config {}: {}", path.display(), err);
    }
}
