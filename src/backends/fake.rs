//! Recording session used by state machine and event pump tests.

use std::collections::{HashMap, HashSet, VecDeque};

use super::{PlaylistContainer, Session};
use crate::protocol::{
    BackendError, PlaylistHandle, ProcessedEvents, SessionEvent, TrackHandle, TrackStatus,
};

/// Every command the control thread issued, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Login(String),
    Load(TrackHandle),
    Play(bool),
    Unload,
    Remove(PlaylistHandle, Vec<usize>),
}

pub struct FakePlaylist {
    pub handle: PlaylistHandle,
    pub name: String,
    pub tracks: Vec<TrackHandle>,
}

#[derive(Default)]
pub struct FakeSession {
    pub playlists: Vec<FakePlaylist>,
    pub track_names: HashMap<TrackHandle, String>,
    pub statuses: HashMap<TrackHandle, TrackStatus>,
    pub observers: HashSet<PlaylistHandle>,
    pub observer_registrations: usize,
    pub commands: Vec<Command>,
    pub queued: VecDeque<SessionEvent>,
    /// Timeouts handed out by successive `process_events` calls; 1000 once empty.
    pub timeouts: VecDeque<u64>,
    pub process_calls: usize,
    pub fail_removals: bool,
    pub fail_loads: bool,
}

impl FakeSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a playlist with `track_count` ready tracks and returns its handle.
    pub fn add_playlist(&mut self, name: &str, track_count: usize) -> PlaylistHandle {
        let handle = PlaylistHandle::new();
        let tracks = (0..track_count)
            .map(|i| {
                let track = TrackHandle::new();
                self.track_names.insert(track, format!("{name} #{i}"));
                track
            })
            .collect();
        self.playlists.push(FakePlaylist {
            handle,
            name: name.to_string(),
            tracks,
        });
        handle
    }

    pub fn playlist_mut(&mut self, handle: PlaylistHandle) -> &mut FakePlaylist {
        self.playlists
            .iter_mut()
            .find(|playlist| playlist.handle == handle)
            .expect("unknown fake playlist")
    }

    pub fn tracks(&self, handle: PlaylistHandle) -> Vec<TrackHandle> {
        self.playlists
            .iter()
            .find(|playlist| playlist.handle == handle)
            .map(|playlist| playlist.tracks.clone())
            .unwrap_or_default()
    }

    pub fn loads(&self) -> Vec<TrackHandle> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                Command::Load(track) => Some(*track),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &Command) -> usize {
        self.commands
            .iter()
            .filter(|command| *command == wanted)
            .count()
    }

    fn find(&self, handle: PlaylistHandle) -> Option<&FakePlaylist> {
        self.playlists
            .iter()
            .find(|playlist| playlist.handle == handle)
    }
}

impl PlaylistContainer for FakeSession {
    fn playlists(&self) -> Vec<PlaylistHandle> {
        self.playlists.iter().map(|playlist| playlist.handle).collect()
    }

    fn playlist_name(&self, playlist: PlaylistHandle) -> Option<String> {
        self.find(playlist).map(|playlist| playlist.name.clone())
    }

    fn num_tracks(&self, playlist: PlaylistHandle) -> usize {
        self.find(playlist)
            .map(|playlist| playlist.tracks.len())
            .unwrap_or(0)
    }

    fn track_at(&self, playlist: PlaylistHandle, index: usize) -> Option<TrackHandle> {
        self.find(playlist)
            .and_then(|playlist| playlist.tracks.get(index).copied())
    }

    fn track_status(&self, track: TrackHandle) -> TrackStatus {
        self.statuses.get(&track).copied().unwrap_or_default()
    }

    fn track_name(&self, track: TrackHandle) -> Option<String> {
        self.track_names.get(&track).cloned()
    }

    fn add_playlist_observer(&mut self, playlist: PlaylistHandle) {
        self.observer_registrations += 1;
        self.observers.insert(playlist);
    }

    fn remove_playlist_observer(&mut self, playlist: PlaylistHandle) {
        self.observers.remove(&playlist);
    }

    fn remove_tracks(
        &mut self,
        playlist: PlaylistHandle,
        positions: &[usize],
    ) -> Result<(), BackendError> {
        self.commands
            .push(Command::Remove(playlist, positions.to_vec()));
        if self.fail_removals {
            return Err(BackendError::UnknownPlaylist);
        }
        Ok(())
    }
}

impl Session for FakeSession {
    fn login(&mut self, username: &str, _password: &str) {
        self.commands.push(Command::Login(username.to_string()));
    }

    fn process_events(&mut self) -> ProcessedEvents {
        self.process_calls += 1;
        ProcessedEvents {
            events: self.queued.drain(..).collect(),
            next_timeout_ms: self.timeouts.pop_front().unwrap_or(1000),
        }
    }

    fn load_track(&mut self, track: TrackHandle) -> Result<(), BackendError> {
        self.commands.push(Command::Load(track));
        if self.fail_loads {
            return Err(BackendError::TrackNotPlayable);
        }
        Ok(())
    }

    fn play(&mut self, play: bool) -> Result<(), BackendError> {
        self.commands.push(Command::Play(play));
        Ok(())
    }

    fn unload_track(&mut self) {
        self.commands.push(Command::Unload);
    }
}
