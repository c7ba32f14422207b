//! Streaming backend abstractions and concrete implementations.
//!
//! The backend owns the session, the playlist container and every playlist and
//! track in it. The control thread only ever sees opaque handles and issues
//! fire-and-forget commands through these traits. Cross-thread wake requests
//! do not go through the traits at all: a backend holds an
//! `Arc<WakeChannel>` and signals it from its own thread.

#[cfg(test)]
pub mod fake;
pub mod simulated;

use crate::protocol::{BackendError, PlaylistHandle, ProcessedEvents, TrackHandle, TrackStatus};

/// Read access to the externally owned playlist container.
pub trait PlaylistContainer {
    /// All playlists currently visible, in container order.
    fn playlists(&self) -> Vec<PlaylistHandle>;
    fn playlist_name(&self, playlist: PlaylistHandle) -> Option<String>;
    fn num_tracks(&self, playlist: PlaylistHandle) -> usize;
    fn track_at(&self, playlist: PlaylistHandle, index: usize) -> Option<TrackHandle>;
    fn track_status(&self, track: TrackHandle) -> TrackStatus;
    fn track_name(&self, track: TrackHandle) -> Option<String>;

    /// Starts delivering playlist-level notifications for `playlist`.
    fn add_playlist_observer(&mut self, playlist: PlaylistHandle);
    fn remove_playlist_observer(&mut self, playlist: PlaylistHandle);

    /// Requests removal of the tracks at `positions`. The matching
    /// `TracksRemoved` notification arrives through a later processing pass.
    fn remove_tracks(
        &mut self,
        playlist: PlaylistHandle,
        positions: &[usize],
    ) -> Result<(), BackendError>;
}

/// Commands accepted by the streaming session. Only the control thread may
/// call these.
pub trait Session: PlaylistContainer {
    /// Starts an asynchronous login; the outcome arrives as
    /// `SessionEvent::LoggedIn`.
    fn login(&mut self, username: &str, password: &str);

    /// Runs one processing pass and returns the notifications it produced.
    fn process_events(&mut self) -> ProcessedEvents;

    fn load_track(&mut self, track: TrackHandle) -> Result<(), BackendError>;
    fn play(&mut self, play: bool) -> Result<(), BackendError>;
    fn unload_track(&mut self);
}
