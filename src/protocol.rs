//! Notification protocol between the streaming backend and the control thread.
//!
//! This module defines the opaque handles the backend hands out and every
//! notification payload that a processing pass can deliver to the playlist
//! manager.

use thiserror::Error;
use uuid::Uuid;

/// Identity handle for a playlist owned by the backend.
///
/// Handles compare by identity only; two playlists with the same name are
/// still different handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaylistHandle(Uuid);

impl PlaylistHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Identity handle for a track owned by the backend.
///
/// Holding one does not keep the track alive; it is only used to compare
/// against what the backend currently has at a playlist position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackHandle(Uuid);

impl TrackHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Playability reported by the backend for a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    #[default]
    Ready,
    /// Metadata has not arrived yet.
    Loading,
    /// Track can not be played (region lock, removed upstream, ...).
    Unavailable,
}

/// Errors reported by backend commands and asynchronous results.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("bad username or password")]
    BadCredentials,
    #[error("unknown playlist")]
    UnknownPlaylist,
    #[error("unknown track")]
    UnknownTrack,
    #[error("track is not playable")]
    TrackNotPlayable,
    #[error("no track loaded")]
    NoTrackLoaded,
    #[error("position {position} out of range for playlist of {len} tracks")]
    PositionOutOfRange { position: usize, len: usize },
}

/// Top-level envelope for everything a processing pass delivers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    LoggedIn(Result<(), BackendError>),
    LoggedOut,
    MetadataUpdated,
    /// Another client started playback on this account; playback was stopped.
    PlayTokenLost,
    LogMessage(String),
    Playlist(PlaylistEvent),
    Container(ContainerEvent),
}

/// Mutation notifications for an observed playlist.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaylistEvent {
    TracksAdded {
        playlist: PlaylistHandle,
        tracks: Vec<TrackHandle>,
        position: usize,
    },
    /// `positions` are indices in the sequence as it was before the removal.
    TracksRemoved {
        playlist: PlaylistHandle,
        positions: Vec<usize>,
    },
    TracksMoved {
        playlist: PlaylistHandle,
        positions: Vec<usize>,
        new_position: usize,
    },
    Renamed {
        playlist: PlaylistHandle,
        name: String,
    },
}

/// Notifications about the playlist container itself.
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerEvent {
    PlaylistAdded {
        playlist: PlaylistHandle,
        position: usize,
    },
    PlaylistRemoved {
        playlist: PlaylistHandle,
        position: usize,
    },
    /// The container finished its initial synchronization.
    Loaded,
}

/// Result of one `process_events` pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessedEvents {
    pub events: Vec<SessionEvent>,
    /// Milliseconds until the backend wants to be called again.
    /// Zero means "call again immediately".
    pub next_timeout_ms: u64,
}
