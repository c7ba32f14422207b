//! In-process streaming backend driven by a library file.
//!
//! It behaves like a remote streaming engine from the control thread's point
//! of view: commands return immediately, notifications are queued and handed
//! out by `process_events`, and a private `sim-backend` thread plays tracks
//! against the wall clock and applies scripted playlist edits. That thread only
//! ever touches the wake channel to reach the control thread.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::{PlaylistContainer, Session};
use crate::{
    config::SessionConfig,
    errors::JukeboxError,
    protocol::{
        BackendError, ContainerEvent, PlaylistEvent, PlaylistHandle, ProcessedEvents,
        SessionEvent, TrackHandle, TrackStatus,
    },
    wake_channel::WakeChannel,
};

const MAX_TIMEOUT_MS: u64 = 1_000;

/// Root of the library file.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LibraryFile {
    /// Credentials the backend accepts. Any login succeeds when absent.
    #[serde(default)]
    pub account: Option<AccountEntry>,
    #[serde(default)]
    pub playlists: Vec<PlaylistEntry>,
    /// Playlist edits applied after login, as if made by another client.
    #[serde(default)]
    pub script: Vec<ScriptEntry>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AccountEntry {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PlaylistEntry {
    pub name: String,
    #[serde(default)]
    pub tracks: Vec<TrackEntry>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct TrackEntry {
    pub name: String,
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,
    #[serde(default)]
    pub status: TrackStatus,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ScriptEntry {
    /// Delay after a successful login.
    pub after_ms: u64,
    pub action: ScriptAction,
}

/// Edits a scripted remote client can make. Playlists are referenced by
/// exact name, first match in container order.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScriptAction {
    AddTracks {
        playlist: String,
        /// Defaults to appending.
        #[serde(default)]
        position: Option<usize>,
        tracks: Vec<TrackEntry>,
    },
    RemoveTracks {
        playlist: String,
        positions: Vec<usize>,
    },
    MoveTracks {
        playlist: String,
        positions: Vec<usize>,
        new_position: usize,
    },
    RenamePlaylist {
        playlist: String,
        name: String,
    },
    CreatePlaylist {
        name: String,
        #[serde(default)]
        tracks: Vec<TrackEntry>,
    },
    DeletePlaylist {
        playlist: String,
    },
    SetTrackStatus {
        playlist: String,
        position: usize,
        status: TrackStatus,
    },
    LosePlayToken,
    /// Ends the session; later edits and notifications are dropped.
    LogOut,
}

fn default_duration_ms() -> u64 {
    180_000
}

impl LibraryFile {
    pub fn load(path: &Path) -> Result<Self, JukeboxError> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            JukeboxError::Library(format!("failed to read {}: {}", path.display(), err))
        })?;
        Self::parse(&content)
            .map_err(|err| JukeboxError::Library(format!("{}: {}", path.display(), err)))
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str::<LibraryFile>(content).map_err(|err| err.to_string())
    }
}

struct SimPlaylist {
    handle: PlaylistHandle,
    name: String,
    tracks: Vec<TrackHandle>,
}

struct SimTrack {
    name: String,
    duration: Duration,
    status: TrackStatus,
}

struct LoadedTrack {
    track: TrackHandle,
    duration: Duration,
    played: Duration,
    resumed_at: Option<Instant>,
    finished: bool,
}

impl LoadedTrack {
    fn pause(&mut self, now: Instant) {
        if let Some(resumed_at) = self.resumed_at.take() {
            self.played += now.saturating_duration_since(resumed_at);
        }
    }
}

struct ScheduledAction {
    due: Instant,
    action: ScriptAction,
}

/// Everything shared between the control thread and the backend thread.
struct SimState {
    playlists: Vec<SimPlaylist>,
    tracks: HashMap<TrackHandle, SimTrack>,
    observers: HashSet<PlaylistHandle>,
    logged_in: bool,
    queued: VecDeque<SessionEvent>,
    pending_script: Vec<ScriptEntry>,
    scheduled: VecDeque<ScheduledAction>,
    loaded: Option<LoadedTrack>,
}

impl SimState {
    fn from_library(library: LibraryFile) -> Self {
        let mut state = Self {
            playlists: Vec::new(),
            tracks: HashMap::new(),
            observers: HashSet::new(),
            logged_in: false,
            queued: VecDeque::new(),
            pending_script: library.script,
            scheduled: VecDeque::new(),
            loaded: None,
        };
        for playlist in library.playlists {
            let tracks = state.create_tracks(playlist.tracks);
            state.playlists.push(SimPlaylist {
                handle: PlaylistHandle::new(),
                name: playlist.name,
                tracks,
            });
        }
        state
    }

    fn create_tracks(&mut self, entries: Vec<TrackEntry>) -> Vec<TrackHandle> {
        entries
            .into_iter()
            .map(|entry| {
                let handle = TrackHandle::new();
                self.tracks.insert(
                    handle,
                    SimTrack {
                        name: entry.name,
                        duration: Duration::from_millis(entry.duration_ms),
                        status: entry.status,
                    },
                );
                handle
            })
            .collect()
    }

    fn playlist(&self, handle: PlaylistHandle) -> Option<&SimPlaylist> {
        self.playlists
            .iter()
            .find(|playlist| playlist.handle == handle)
    }

    fn playlist_mut(&mut self, handle: PlaylistHandle) -> Result<&mut SimPlaylist, BackendError> {
        self.playlists
            .iter_mut()
            .find(|playlist| playlist.handle == handle)
            .ok_or(BackendError::UnknownPlaylist)
    }

    fn playlist_by_name(&self, name: &str) -> Result<PlaylistHandle, BackendError> {
        self.playlists
            .iter()
            .find(|playlist| playlist.name == name)
            .map(|playlist| playlist.handle)
            .ok_or(BackendError::UnknownPlaylist)
    }

    fn queue(&mut self, event: SessionEvent) {
        if self.logged_in {
            self.queued.push_back(event);
        }
    }

    fn queue_playlist_event(&mut self, playlist: PlaylistHandle, event: PlaylistEvent) {
        if self.observers.contains(&playlist) {
            self.queue(SessionEvent::Playlist(event));
        }
    }

    fn schedule_script(&mut self, now: Instant) {
        let mut entries = std::mem::take(&mut self.pending_script);
        entries.sort_by_key(|entry| entry.after_ms);
        self.scheduled = entries
            .into_iter()
            .map(|entry| ScheduledAction {
                due: now + Duration::from_millis(entry.after_ms),
                action: entry.action,
            })
            .collect();
    }

    fn add_tracks(
        &mut self,
        playlist: PlaylistHandle,
        position: Option<usize>,
        entries: Vec<TrackEntry>,
    ) -> Result<(), BackendError> {
        let len = self.playlist_mut(playlist)?.tracks.len();
        let position = position.unwrap_or(len);
        if position > len {
            return Err(BackendError::PositionOutOfRange { position, len });
        }
        let tracks = self.create_tracks(entries);
        let target = self.playlist_mut(playlist)?;
        target
            .tracks
            .splice(position..position, tracks.iter().copied());
        self.queue_playlist_event(
            playlist,
            PlaylistEvent::TracksAdded {
                playlist,
                tracks,
                position,
            },
        );
        Ok(())
    }

    fn remove_tracks(
        &mut self,
        playlist: PlaylistHandle,
        positions: &[usize],
    ) -> Result<(), BackendError> {
        let positions = validated_positions(self.playlist_mut(playlist)?.tracks.len(), positions)?;
        let target = self.playlist_mut(playlist)?;
        for &position in positions.iter().rev() {
            target.tracks.remove(position);
        }
        self.queue_playlist_event(
            playlist,
            PlaylistEvent::TracksRemoved {
                playlist,
                positions,
            },
        );
        Ok(())
    }

    /// `new_position` addresses the sequence before the move, like the
    /// notification that reports it.
    fn move_tracks(
        &mut self,
        playlist: PlaylistHandle,
        positions: &[usize],
        new_position: usize,
    ) -> Result<(), BackendError> {
        let target = self.playlist_mut(playlist)?;
        let len = target.tracks.len();
        let positions = validated_positions(len, positions)?;
        if new_position > len {
            return Err(BackendError::PositionOutOfRange {
                position: new_position,
                len,
            });
        }

        let moving: Vec<TrackHandle> = positions
            .iter()
            .map(|&position| target.tracks[position])
            .collect();
        for &position in positions.iter().rev() {
            target.tracks.remove(position);
        }
        let shifted = positions
            .iter()
            .filter(|&&position| position < new_position)
            .count();
        let insert_at = (new_position - shifted).min(target.tracks.len());
        target.tracks.splice(insert_at..insert_at, moving);

        self.queue_playlist_event(
            playlist,
            PlaylistEvent::TracksMoved {
                playlist,
                positions,
                new_position,
            },
        );
        Ok(())
    }

    fn apply(&mut self, action: ScriptAction, now: Instant) -> Result<(), BackendError> {
        debug!("Simulated backend applying {:?}", action);
        match action {
            ScriptAction::AddTracks {
                playlist,
                position,
                tracks,
            } => {
                let playlist = self.playlist_by_name(&playlist)?;
                self.add_tracks(playlist, position, tracks)
            }
            ScriptAction::RemoveTracks {
                playlist,
                positions,
            } => {
                let playlist = self.playlist_by_name(&playlist)?;
                self.remove_tracks(playlist, &positions)
            }
            ScriptAction::MoveTracks {
                playlist,
                positions,
                new_position,
            } => {
                let playlist = self.playlist_by_name(&playlist)?;
                self.move_tracks(playlist, &positions, new_position)
            }
            ScriptAction::RenamePlaylist { playlist, name } => {
                let playlist = self.playlist_by_name(&playlist)?;
                self.playlist_mut(playlist)?.name = name.clone();
                self.queue_playlist_event(playlist, PlaylistEvent::Renamed { playlist, name });
                Ok(())
            }
            ScriptAction::CreatePlaylist { name, tracks } => {
                let tracks = self.create_tracks(tracks);
                let handle = PlaylistHandle::new();
                self.playlists.push(SimPlaylist {
                    handle,
                    name,
                    tracks,
                });
                self.queue(SessionEvent::Container(ContainerEvent::PlaylistAdded {
                    playlist: handle,
                    position: self.playlists.len() - 1,
                }));
                Ok(())
            }
            ScriptAction::DeletePlaylist { playlist } => {
                let handle = self.playlist_by_name(&playlist)?;
                let position = self
                    .playlists
                    .iter()
                    .position(|playlist| playlist.handle == handle)
                    .ok_or(BackendError::UnknownPlaylist)?;
                self.playlists.remove(position);
                self.observers.remove(&handle);
                self.queue(SessionEvent::Container(ContainerEvent::PlaylistRemoved {
                    playlist: handle,
                    position,
                }));
                Ok(())
            }
            ScriptAction::SetTrackStatus {
                playlist,
                position,
                status,
            } => {
                let playlist = self.playlist_by_name(&playlist)?;
                let tracks = &self.playlist_mut(playlist)?.tracks;
                let len = tracks.len();
                let track = *tracks
                    .get(position)
                    .ok_or(BackendError::PositionOutOfRange { position, len })?;
                if let Some(entry) = self.tracks.get_mut(&track) {
                    entry.status = status;
                }
                self.queue(SessionEvent::MetadataUpdated);
                Ok(())
            }
            ScriptAction::LosePlayToken => {
                if let Some(loaded) = self.loaded.as_mut() {
                    loaded.pause(now);
                }
                self.queue(SessionEvent::PlayTokenLost);
                Ok(())
            }
            ScriptAction::LogOut => {
                self.loaded = None;
                self.scheduled.clear();
                self.queue(SessionEvent::LoggedOut);
                self.logged_in = false;
                Ok(())
            }
        }
    }

    /// Applies every scripted edit that is due. Returns whether any ran.
    fn apply_due_script(&mut self, now: Instant) -> bool {
        let mut applied = false;
        while self.scheduled.front().is_some_and(|next| next.due <= now) {
            let Some(next) = self.scheduled.pop_front() else {
                break;
            };
            if let Err(err) = self.apply(next.action, now) {
                warn!("Scripted playlist edit failed: {}", err);
            }
            applied = true;
        }
        applied
    }

    /// Returns true exactly once when the playing track reaches its end.
    fn poll_end_of_track(&mut self, now: Instant) -> bool {
        let Some(loaded) = self.loaded.as_mut() else {
            return false;
        };
        let Some(resumed_at) = loaded.resumed_at else {
            return false;
        };
        if loaded.finished
            || loaded.played + now.saturating_duration_since(resumed_at) < loaded.duration
        {
            return false;
        }
        loaded.played = loaded.duration;
        loaded.resumed_at = None;
        loaded.finished = true;
        true
    }

    fn next_timeout_ms(&self, now: Instant) -> u64 {
        if !self.queued.is_empty() {
            return 0;
        }
        self.scheduled
            .front()
            .map(|next| {
                let remaining = next.due.saturating_duration_since(now).as_millis() as u64;
                remaining.clamp(1, MAX_TIMEOUT_MS)
            })
            .unwrap_or(MAX_TIMEOUT_MS)
    }
}

/// Sorted, de-duplicated positions, all within `len`.
fn validated_positions(len: usize, positions: &[usize]) -> Result<Vec<usize>, BackendError> {
    let mut positions = positions.to_vec();
    positions.sort_unstable();
    positions.dedup();
    if let Some(&position) = positions.iter().find(|&&position| position >= len) {
        return Err(BackendError::PositionOutOfRange { position, len });
    }
    Ok(positions)
}

/// Streaming session backed by a [`LibraryFile`].
pub struct SimulatedSession {
    state: Arc<Mutex<SimState>>,
    wake: Arc<WakeChannel>,
    account: Option<AccountEntry>,
    user_agent: String,
    max_events_per_pass: usize,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SimulatedSession {
    /// Creates the session and starts its backend thread.
    pub fn start(
        library: LibraryFile,
        config: &SessionConfig,
        wake: Arc<WakeChannel>,
    ) -> Result<Self, JukeboxError> {
        let account = library.account.clone();
        let state = Arc::new(Mutex::new(SimState::from_library(library)));
        let shutdown = Arc::new(AtomicBool::new(false));
        let tick = Duration::from_millis(config.tick_ms);

        let worker = {
            let state = state.clone();
            let wake = wake.clone();
            let shutdown = shutdown.clone();
            thread::Builder::new()
                .name("sim-backend".to_string())
                .spawn(move || run_backend_thread(state, wake, shutdown, tick))?
        };
        info!(
            "Simulated backend started (user agent {}, tick {:?})",
            config.user_agent, tick
        );

        Ok(Self {
            state,
            wake,
            account,
            user_agent: config.user_agent.clone(),
            max_events_per_pass: config.max_events_per_pass.max(1),
            shutdown,
            worker: Some(worker),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn run_backend_thread(
    state: Arc<Mutex<SimState>>,
    wake: Arc<WakeChannel>,
    shutdown: Arc<AtomicBool>,
    tick: Duration,
) {
    debug!("Simulated backend thread running");
    while !shutdown.load(Ordering::Acquire) {
        thread::sleep(tick);
        let now = Instant::now();
        let (track_finished, edited) = {
            let mut state = lock_state(&state);
            (state.poll_end_of_track(now), state.apply_due_script(now))
        };
        if track_finished {
            wake.notify_track_finished();
        }
        if edited {
            wake.notify();
        }
    }
    debug!("Simulated backend thread stopped");
}

impl Drop for SimulatedSession {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Simulated backend thread panicked");
            }
        }
    }
}

impl PlaylistContainer for SimulatedSession {
    fn playlists(&self) -> Vec<PlaylistHandle> {
        self.lock()
            .playlists
            .iter()
            .map(|playlist| playlist.handle)
            .collect()
    }

    fn playlist_name(&self, playlist: PlaylistHandle) -> Option<String> {
        self.lock()
            .playlist(playlist)
            .map(|playlist| playlist.name.clone())
    }

    fn num_tracks(&self, playlist: PlaylistHandle) -> usize {
        self.lock()
            .playlist(playlist)
            .map(|playlist| playlist.tracks.len())
            .unwrap_or(0)
    }

    fn track_at(&self, playlist: PlaylistHandle, index: usize) -> Option<TrackHandle> {
        self.lock()
            .playlist(playlist)
            .and_then(|playlist| playlist.tracks.get(index).copied())
    }

    fn track_status(&self, track: TrackHandle) -> TrackStatus {
        self.lock()
            .tracks
            .get(&track)
            .map(|track| track.status)
            .unwrap_or(TrackStatus::Unavailable)
    }

    fn track_name(&self, track: TrackHandle) -> Option<String> {
        self.lock().tracks.get(&track).map(|track| track.name.clone())
    }

    fn add_playlist_observer(&mut self, playlist: PlaylistHandle) {
        self.lock().observers.insert(playlist);
    }

    fn remove_playlist_observer(&mut self, playlist: PlaylistHandle) {
        self.lock().observers.remove(&playlist);
    }

    fn remove_tracks(
        &mut self,
        playlist: PlaylistHandle,
        positions: &[usize],
    ) -> Result<(), BackendError> {
        self.lock().remove_tracks(playlist, positions)?;
        self.wake.notify();
        Ok(())
    }
}

impl Session for SimulatedSession {
    fn login(&mut self, username: &str, password: &str) {
        let accepted = self
            .account
            .as_ref()
            .is_none_or(|account| account.username == username && account.password == password);
        {
            let mut state = self.lock();
            if accepted {
                state.logged_in = true;
                state.schedule_script(Instant::now());
                state.queue(SessionEvent::LogMessage(format!(
                    "{} logged in as {}",
                    self.user_agent, username
                )));
                state.queue(SessionEvent::LoggedIn(Ok(())));
                state.queue(SessionEvent::Container(ContainerEvent::Loaded));
            } else {
                state
                    .queued
                    .push_back(SessionEvent::LoggedIn(Err(BackendError::BadCredentials)));
            }
        }
        self.wake.notify();
    }

    fn process_events(&mut self) -> ProcessedEvents {
        let now = Instant::now();
        let mut state = self.lock();
        let count = state.queued.len().min(self.max_events_per_pass);
        let events = state.queued.drain(..count).collect();
        ProcessedEvents {
            events,
            next_timeout_ms: state.next_timeout_ms(now),
        }
    }

    fn load_track(&mut self, track: TrackHandle) -> Result<(), BackendError> {
        let mut state = self.lock();
        let (duration, status) = state
            .tracks
            .get(&track)
            .map(|entry| (entry.duration, entry.status))
            .ok_or(BackendError::UnknownTrack)?;
        if status != TrackStatus::Ready {
            return Err(BackendError::TrackNotPlayable);
        }
        state.loaded = Some(LoadedTrack {
            track,
            duration,
            played: Duration::ZERO,
            resumed_at: None,
            finished: false,
        });
        Ok(())
    }

    fn play(&mut self, play: bool) -> Result<(), BackendError> {
        let now = Instant::now();
        let mut state = self.lock();
        let loaded = state.loaded.as_mut().ok_or(BackendError::NoTrackLoaded)?;
        if play {
            if loaded.resumed_at.is_none() && !loaded.finished {
                loaded.resumed_at = Some(now);
            }
        } else {
            loaded.pause(now);
        }
        Ok(())
    }

    fn unload_track(&mut self) {
        if let Some(loaded) = self.lock().loaded.take() {
            debug!("Simulated backend unloaded {:?}", loaded.track);
        }
    }
}
