//! Playback state machine for the watched playlist.
//!
//! The manager holds a cursor into one externally owned playlist, selected by
//! name, and a comparison handle for the track currently loaded into the
//! backend. Every transition re-derives "what should be playing" from what the
//! backend reports right now, so repeated or overlapping notifications are
//! harmless. All methods run on the control thread only.

use std::collections::{BTreeSet, HashSet};

use log::{debug, info, trace, warn};

use crate::{
    backends::Session,
    errors::JukeboxError,
    protocol::{
        ContainerEvent, PlaylistEvent, PlaylistHandle, SessionEvent, TrackHandle, TrackStatus,
    },
};

/// Which playlist to follow and what to do with tracks once played.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackPolicy {
    /// Matched case-insensitively against playlist names.
    pub target_playlist: String,
    /// Remove each track from the playlist after it finished playing.
    pub remove_played_tracks: bool,
}

/// Owns the session and every playback decision made on the control thread.
pub struct PlaylistManager<S: Session> {
    session: S,
    policy: PlaybackPolicy,
    watched_playlist: Option<PlaylistHandle>,
    cursor: usize,
    loaded_track: Option<TrackHandle>,
    observed_playlists: HashSet<PlaylistHandle>,
}

impl<S: Session> PlaylistManager<S> {
    pub fn new(session: S, policy: PlaybackPolicy) -> Self {
        Self {
            session,
            policy,
            watched_playlist: None,
            cursor: 0,
            loaded_track: None,
            observed_playlists: HashSet::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn session(&self) -> &S {
        &self.session
    }

    #[cfg(test)]
    pub(crate) fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    #[cfg(test)]
    pub(crate) fn cursor(&self) -> usize {
        self.cursor
    }

    #[cfg(test)]
    pub(crate) fn loaded_track(&self) -> Option<TrackHandle> {
        self.loaded_track
    }

    #[cfg(test)]
    pub(crate) fn watched_playlist(&self) -> Option<PlaylistHandle> {
        self.watched_playlist
    }

    pub fn login(&mut self, username: &str, password: &str) {
        info!("Logging in as {}", username);
        self.session.login(username, password);
    }

    /// Calls `process_events` until the backend asks for a non-zero timeout,
    /// dispatching every notification of every pass. Returns that timeout.
    pub fn process_events(&mut self) -> Result<u64, JukeboxError> {
        loop {
            let processed = self.session.process_events();
            for event in processed.events {
                self.handle_event(event)?;
            }
            if processed.next_timeout_ms != 0 {
                return Ok(processed.next_timeout_ms);
            }
            trace!("Backend asked to be called again immediately");
        }
    }

    /// Routes one notification to its handler. Only a failed login is fatal.
    pub fn handle_event(&mut self, event: SessionEvent) -> Result<(), JukeboxError> {
        match event {
            SessionEvent::LoggedIn(result) => {
                self.on_login_result(result.map_err(|err| err.to_string()))?
            }
            SessionEvent::LoggedOut => info!("Logged out"),
            SessionEvent::MetadataUpdated => self.try_advance(),
            SessionEvent::PlayTokenLost => self.on_play_token_lost(),
            SessionEvent::LogMessage(message) => info!("backend: {}", message.trim_end()),
            SessionEvent::Playlist(PlaylistEvent::TracksAdded {
                playlist,
                tracks,
                position,
            }) => self.on_tracks_added(playlist, tracks.len(), position),
            SessionEvent::Playlist(PlaylistEvent::TracksRemoved {
                playlist,
                positions,
            }) => self.on_tracks_removed(playlist, &positions),
            SessionEvent::Playlist(PlaylistEvent::TracksMoved {
                playlist,
                positions,
                new_position,
            }) => self.on_tracks_moved(playlist, &positions, new_position),
            SessionEvent::Playlist(PlaylistEvent::Renamed { playlist, name }) => {
                self.on_playlist_renamed(playlist, &name)
            }
            SessionEvent::Container(ContainerEvent::PlaylistAdded { playlist, position }) => {
                self.on_playlist_added(playlist, position)
            }
            SessionEvent::Container(ContainerEvent::PlaylistRemoved { playlist, position }) => {
                self.on_playlist_removed(playlist, position)
            }
            SessionEvent::Container(ContainerEvent::Loaded) => self.on_container_loaded(),
        }
        Ok(())
    }

    /// Starts the track at the cursor unless it is already loaded.
    ///
    /// Waiting conditions (no playlist, empty playlist, cursor past the end,
    /// track not ready) are not errors; the next notification retries.
    pub fn try_advance(&mut self) {
        let Some(playlist) = self.watched_playlist else {
            return;
        };

        let num_tracks = self.session.num_tracks(playlist);
        if num_tracks == 0 {
            debug!("No tracks in playlist. Waiting");
            return;
        }
        if self.cursor >= num_tracks {
            debug!(
                "No more tracks in playlist (cursor {} of {}). Waiting",
                self.cursor, num_tracks
            );
            return;
        }

        let Some(track) = self.session.track_at(playlist, self.cursor) else {
            return;
        };

        let status = self.session.track_status(track);
        if status != TrackStatus::Ready {
            debug!("Track at {} is {:?}. Waiting", self.cursor, status);
            return;
        }

        if let Some(loaded) = self.loaded_track {
            if loaded == track {
                return;
            }
            debug!("Track at cursor {} changed underneath us", self.cursor);
            self.session.unload_track();
            self.loaded_track = None;
        }

        info!("Now playing \"{}\"...", self.describe(track));
        if let Err(err) = self.session.load_track(track) {
            warn!("Failed to load track at {}: {}", self.cursor, err);
            return;
        }
        if let Err(err) = self.session.play(true) {
            warn!("Failed to start playback: {}", err);
        }
        self.loaded_track = Some(track);
    }

    pub fn on_tracks_added(&mut self, playlist: PlaylistHandle, count: usize, position: usize) {
        if !self.is_watched(playlist) {
            return;
        }
        info!("{} tracks were added at {}", count, position);
        self.try_advance();
    }

    /// `positions` are indices in the sequence as it was before the removal.
    pub fn on_tracks_removed(&mut self, playlist: PlaylistHandle, positions: &[usize]) {
        if !self.is_watched(playlist) {
            return;
        }
        let cursor = adjusted_cursor(self.cursor, positions);
        info!(
            "{} tracks were removed (cursor {} -> {})",
            positions.len(),
            self.cursor,
            cursor
        );
        self.cursor = cursor;
        self.try_advance();
    }

    pub fn on_tracks_moved(
        &mut self,
        playlist: PlaylistHandle,
        positions: &[usize],
        new_position: usize,
    ) {
        if !self.is_watched(playlist) {
            return;
        }
        info!(
            "{} tracks were moved around (to {})",
            positions.len(),
            new_position
        );
        self.try_advance();
    }

    pub fn on_playlist_renamed(&mut self, playlist: PlaylistHandle, name: &str) {
        if name_matches(name, &self.policy.target_playlist) {
            info!("Playlist renamed to \"{}\"; following it", name);
            self.adopt(playlist);
            self.try_advance();
        } else if self.is_watched(playlist) {
            info!("Current playlist renamed to \"{}\"", name);
            self.release_watch();
        }
    }

    /// Handles a natural end of the loaded track. A stale notification with
    /// nothing loaded is ignored.
    ///
    /// The finished track may no longer sit at the cursor: it keeps playing
    /// after being removed or moved when nothing playable replaced it. Only
    /// its current position is ever removed, and the cursor only steps past
    /// it when it is still at the cursor.
    pub fn on_track_finished(&mut self) {
        let Some(track) = self.loaded_track.take() else {
            debug!("End of track with nothing loaded; ignoring");
            return;
        };
        debug!("Finished \"{}\"", self.describe(track));
        self.session.unload_track();

        let Some(playlist) = self.watched_playlist else {
            return;
        };
        let position = self.position_of(playlist, track);

        if self.policy.remove_played_tracks {
            // The removal notification moves the cursor, not us.
            let Some(position) = position else {
                debug!("Finished track is no longer in the playlist");
                self.try_advance();
                return;
            };
            if let Err(err) = self.session.remove_tracks(playlist, &[position]) {
                warn!("Failed to remove played track at {}: {}", position, err);
            }
        } else {
            if position == Some(self.cursor) {
                self.cursor += 1;
            }
            self.try_advance();
        }
    }

    /// On success, registers observers on every visible playlist and adopts
    /// the first one whose name matches.
    pub fn on_login_result(&mut self, result: Result<(), String>) -> Result<(), JukeboxError> {
        if let Err(message) = result {
            return Err(JukeboxError::LoginFailed(message));
        }
        info!("Logged in");
        self.scan_container();
        Ok(())
    }

    pub fn on_playlist_added(&mut self, playlist: PlaylistHandle, position: usize) {
        self.observe(playlist);
        let Some(name) = self.session.playlist_name(playlist) else {
            return;
        };
        debug!("Playlist \"{}\" added at {}", name, position);
        if self.watched_playlist.is_none() && name_matches(&name, &self.policy.target_playlist) {
            info!("Playlist \"{}\" appeared; following it", name);
            self.adopt(playlist);
            self.try_advance();
        }
    }

    pub fn on_playlist_removed(&mut self, playlist: PlaylistHandle, position: usize) {
        if self.observed_playlists.remove(&playlist) {
            self.session.remove_playlist_observer(playlist);
        }
        debug!("Playlist removed from {}", position);
        if self.is_watched(playlist) {
            info!("Current playlist was removed");
            self.release_watch();
        }
    }

    pub fn on_container_loaded(&mut self) {
        info!(
            "Rootlist synchronized ({} playlists)",
            self.session.playlists().len()
        );
        if self.watched_playlist.is_none() {
            self.scan_container();
        }
    }

    fn on_play_token_lost(&mut self) {
        warn!("Playback was taken over by another client");
        if self.loaded_track.take().is_some() {
            self.session.unload_track();
        }
    }

    fn scan_container(&mut self) {
        let playlists = self.session.playlists();
        info!("Looking at {} playlists", playlists.len());

        for playlist in playlists {
            self.observe(playlist);
            if self.watched_playlist.is_some() {
                continue;
            }
            let matches = self
                .session
                .playlist_name(playlist)
                .is_some_and(|name| name_matches(&name, &self.policy.target_playlist));
            if matches {
                self.adopt(playlist);
            }
        }

        if self.watched_playlist.is_some() {
            self.try_advance();
        } else {
            info!(
                "No playlist named \"{}\". Waiting for one to pop up...",
                self.policy.target_playlist
            );
        }
    }

    fn observe(&mut self, playlist: PlaylistHandle) {
        if self.observed_playlists.insert(playlist) {
            self.session.add_playlist_observer(playlist);
        }
    }

    fn adopt(&mut self, playlist: PlaylistHandle) {
        self.watched_playlist = Some(playlist);
        self.cursor = 0;
    }

    fn release_watch(&mut self) {
        self.watched_playlist = None;
        self.loaded_track = None;
        self.session.unload_track();
    }

    /// Current index of `track`, checking the cursor first.
    fn position_of(&self, playlist: PlaylistHandle, track: TrackHandle) -> Option<usize> {
        if self.session.track_at(playlist, self.cursor) == Some(track) {
            return Some(self.cursor);
        }
        (0..self.session.num_tracks(playlist))
            .find(|&index| self.session.track_at(playlist, index) == Some(track))
    }

    fn is_watched(&self, playlist: PlaylistHandle) -> bool {
        self.watched_playlist == Some(playlist)
    }

    fn describe(&self, track: TrackHandle) -> String {
        self.session
            .track_name(track)
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

/// Case-insensitive exact name comparison.
pub fn name_matches(name: &str, target: &str) -> bool {
    name.to_lowercase() == target.to_lowercase()
}

/// Shifts `cursor` down by the number of removed positions before it, so it
/// keeps pointing at the same logical next track.
pub fn adjusted_cursor(cursor: usize, removed_positions: &[usize]) -> usize {
    let removed_before = removed_positions
        .iter()
        .filter(|&&position| position < cursor)
        .collect::<BTreeSet<_>>()
        .len();
    cursor - removed_before
}
