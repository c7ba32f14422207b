use std::path::PathBuf;

use clap::Parser;

use crate::{config::Config, errors::JukeboxError, playlist_manager::PlaybackPolicy};

/// Plays a shared playlist from top to bottom, following edits as they happen
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Account user name
    #[arg(short = 'u', long = "username", value_name = "USERNAME")]
    pub username: Option<String>,

    /// Account password
    #[arg(short = 'p', long = "password", value_name = "PASSWORD")]
    pub password: Option<String>,

    /// Name of the playlist to play (case-insensitive)
    #[arg(short = 'l', long = "playlist", value_name = "LISTNAME")]
    pub playlist: Option<String>,

    /// Delete each track from the playlist after it was played
    #[arg(short = 'd', long = "remove-played")]
    pub remove_played: bool,

    /// Library file for the simulated backend (overrides [library] path)
    #[arg(long = "library", value_name = "FILE")]
    pub library: Option<PathBuf>,

    /// Config file (default: platform config dir/jukebox/config.toml)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase logging verbosity (default: info, -v: debug, -vv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,
}

/// Everything needed to start a session, after merging flags over config.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSettings {
    pub username: String,
    pub password: String,
    pub library: PathBuf,
    pub policy: PlaybackPolicy,
}

pub const USAGE_HINT: &str = "usage: jukebox -u <username> -p <password> -l <listname> [-d]\n\
                              warning: -d will delete the tracks played from the list!";

impl Args {
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbosity {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }

    /// Fails before any session exists when credentials or the playlist name
    /// are missing from both flags and config.
    pub fn resolve(&self, config: &Config) -> Result<LaunchSettings, JukeboxError> {
        let username = non_empty(self.username.clone())
            .ok_or(JukeboxError::MissingArgument("username"))?;
        let password = non_empty(self.password.clone())
            .ok_or(JukeboxError::MissingArgument("password"))?;
        let target_playlist = non_empty(self.playlist.clone())
            .or_else(|| config.playback.playlist.clone())
            .ok_or(JukeboxError::MissingArgument("playlist"))?;
        let library = self
            .library
            .clone()
            .or_else(|| config.library.path.clone())
            .ok_or_else(|| {
                JukeboxError::Config(
                    "no library file; pass --library or set [library] path".to_string(),
                )
            })?;

        Ok(LaunchSettings {
            username,
            password,
            library,
            policy: PlaybackPolicy {
                target_playlist,
                remove_played_tracks: self.remove_played || config.playback.remove_played_tracks,
            },
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}
