//! Application runtime bootstrap and top-level orchestration.

use std::{path::Path, sync::Arc};

use log::info;

use crate::{
    backends::simulated::{LibraryFile, SimulatedSession},
    cli::{Args, LaunchSettings},
    config::{default_config_file, ensure_default_config, load_config, Config},
    errors::JukeboxError,
    event_pump::EventPump,
    playlist_manager::PlaylistManager,
    wake_channel::WakeChannel,
};

/// Owns startup wiring and the control-thread event pump.
pub(crate) struct AppRuntime {
    pump: EventPump<SimulatedSession>,
}

impl AppRuntime {
    /// Loads config, validates arguments, starts the backend and submits the login.
    pub(crate) fn build(args: &Args) -> Result<Self, JukeboxError> {
        let (config_file, create_default) = match &args.config {
            Some(path) => (path.clone(), false),
            None => {
                let path = default_config_file().ok_or_else(|| {
                    JukeboxError::Config("no platform config directory".to_string())
                })?;
                (path, true)
            }
        };
        let (config, settings) = resolve_launch(args, &config_file, create_default)?;
        info!(
            "Loaded config from {}. playlist=\"{}\" remove_played_tracks={}",
            config_file.display(),
            settings.policy.target_playlist,
            settings.policy.remove_played_tracks
        );

        let library = LibraryFile::load(&settings.library)?;
        let wake = Arc::new(WakeChannel::new());
        let session = SimulatedSession::start(library, &config.session, wake.clone())?;

        let mut manager = PlaylistManager::new(session, settings.policy);
        manager.login(&settings.username, &settings.password);

        Ok(Self {
            pump: EventPump::new(manager, wake),
        })
    }

    /// Blocks the calling thread until a fatal error.
    pub(crate) fn run(mut self) -> Result<(), JukeboxError> {
        self.pump.run()
    }
}

/// Reads the config and merges the flags over it. The default file is only
/// written once the flags turned out to be complete.
fn resolve_launch(
    args: &Args,
    config_file: &Path,
    create_default: bool,
) -> Result<(Config, LaunchSettings), JukeboxError> {
    let config = load_config(config_file)?;
    let settings = args.resolve(&config)?;
    if create_default {
        ensure_default_config(config_file);
    }
    Ok((config, settings))
}
