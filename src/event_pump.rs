//! Control-thread event pump.
//!
//! Each turn waits on the wake channel (bounded by the deadline the backend
//! asked for after the previous pass), drains both flags at once, reacts to
//! end of track, then runs the backend's processing passes and re-arms the
//! deadline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::{
    backends::Session, errors::JukeboxError, playlist_manager::PlaylistManager,
    wake_channel::WakeChannel,
};

/// What a single turn of the pump did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    /// Woken with both flags clear before the deadline; nothing ran.
    Spurious,
    /// Ran processing passes; the backend wants to be called again after this long.
    Processed { next_timeout: Duration },
}

pub struct EventPump<S: Session> {
    manager: PlaylistManager<S>,
    wake: Arc<WakeChannel>,
    deadline: Option<Instant>,
}

impl<S: Session> EventPump<S> {
    /// The first wait is unbounded: nothing runs until the backend signals.
    pub fn new(manager: PlaylistManager<S>, wake: Arc<WakeChannel>) -> Self {
        Self {
            manager,
            wake,
            deadline: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn manager(&self) -> &PlaylistManager<S> {
        &self.manager
    }

    #[cfg(test)]
    pub(crate) fn manager_mut(&mut self) -> &mut PlaylistManager<S> {
        &mut self.manager
    }

    /// Runs for the life of the process; only a fatal error returns.
    pub fn run(&mut self) -> Result<(), JukeboxError> {
        debug!("Event pump started");
        loop {
            if let Turn::Processed { next_timeout } = self.turn()? {
                trace!("Next backend pass in {:?}", next_timeout);
            }
        }
    }

    pub fn turn(&mut self) -> Result<Turn, JukeboxError> {
        let timeout = self
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()));
        self.wake.wait_until(timeout);

        let flags = self.wake.take();
        let deadline_passed = self
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline);
        if flags.is_clear() && !deadline_passed {
            trace!("Spurious wakeup");
            return Ok(Turn::Spurious);
        }

        if flags.track_finished {
            self.manager.on_track_finished();
        }

        let next_timeout = Duration::from_millis(self.manager.process_events()?);
        self.deadline = Some(Instant::now() + next_timeout);
        Ok(Turn::Processed { next_timeout })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::fake::{Command, FakeSession};
    use crate::playlist_manager::PlaybackPolicy;
    use crate::protocol::{BackendError, SessionEvent};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn pump_with(session: FakeSession, remove_played_tracks: bool) -> EventPump<FakeSession> {
        let manager = PlaylistManager::new(
            session,
            PlaybackPolicy {
                target_playlist: "Party".to_string(),
                remove_played_tracks,
            },
        );
        EventPump::new(manager, Arc::new(WakeChannel::new()))
    }

    fn logged_in_pump(track_count: usize) -> EventPump<FakeSession> {
        let mut session = FakeSession::new();
        session.add_playlist("Party", track_count);
        session.queued.push_back(SessionEvent::LoggedIn(Ok(())));
        let mut pump = pump_with(session, false);
        pump.wake.notify();
        pump.turn().expect("login should succeed");
        pump
    }

    #[test]
    fn test_first_turn_waits_for_signal_then_logs_in() {
        let mut pump = logged_in_pump(2);
        assert_eq!(pump.manager().session().process_calls, 1);
        assert_eq!(pump.manager().session().loads().len(), 1);
        assert!(pump.deadline.is_some());
    }

    #[test]
    fn test_spurious_wake_runs_nothing() {
        let mut pump = logged_in_pump(2);
        pump.deadline = Some(Instant::now() + Duration::from_secs(30));
        let commands_before = pump.manager().session().commands.len();

        let waker = pump.wake.clone();
        let done = Arc::new(AtomicBool::new(false));
        let waker_done = done.clone();
        let handle = thread::spawn(move || {
            while !waker_done.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
                waker.wake_spuriously();
            }
        });

        let start = Instant::now();
        let turn = pump.turn().expect("spurious wake is never fatal");
        done.store(true, Ordering::SeqCst);
        handle.join().expect("waker thread panicked");

        assert_eq!(turn, Turn::Spurious);
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(pump.manager().session().process_calls, 1);
        assert_eq!(pump.manager().session().commands.len(), commands_before);
    }

    #[test]
    fn test_deadline_expiry_runs_processing_pass() {
        let mut pump = logged_in_pump(1);
        pump.manager_mut().session_mut().timeouts.push_back(40);
        pump.deadline = Some(Instant::now() + Duration::from_millis(20));

        let turn = pump.turn().expect("timeout pass is never fatal");

        assert_eq!(
            turn,
            Turn::Processed {
                next_timeout: Duration::from_millis(40)
            }
        );
        assert_eq!(pump.manager().session().process_calls, 2);
    }

    #[test]
    fn test_track_finished_is_handled_before_processing() {
        let mut pump = logged_in_pump(3);
        let party = pump.manager().watched_playlist().expect("watching Party");
        let second = pump.manager().session().tracks(party)[1];
        pump.manager_mut().session_mut().commands.clear();

        pump.wake.notify_track_finished();
        pump.wake.notify_track_finished();
        pump.turn().expect("end of track is never fatal");

        assert_eq!(pump.manager().cursor(), 1);
        assert_eq!(
            pump.manager().session().commands,
            vec![Command::Unload, Command::Load(second), Command::Play(true)]
        );
        assert_eq!(pump.manager().session().process_calls, 2);
    }

    #[test]
    fn test_each_signal_or_timeout_runs_one_pass() {
        let mut pump = logged_in_pump(3);
        pump.wake.notify();
        pump.turn().expect("pass is never fatal");
        assert_eq!(pump.manager().session().process_calls, 2);

        // Nothing pending now, so a short deadline turns into a timeout pass.
        pump.deadline = Some(Instant::now() + Duration::from_millis(10));
        pump.turn().expect("pass is never fatal");
        assert_eq!(pump.manager().session().process_calls, 3);
    }

    #[test]
    fn test_login_failure_stops_the_pump() {
        let mut session = FakeSession::new();
        session
            .queued
            .push_back(SessionEvent::LoggedIn(Err(BackendError::BadCredentials)));
        let mut pump = pump_with(session, false);
        pump.wake.notify();

        match pump.run() {
            Err(JukeboxError::LoginFailed(_)) => {}
            other => panic!("expected login failure, got {:?}", other),
        }
    }

    #[test]
    fn test_signal_from_backend_thread_wakes_unbounded_wait() {
        let mut session = FakeSession::new();
        session.add_playlist("Party", 1);
        session.queued.push_back(SessionEvent::LoggedIn(Ok(())));
        let mut pump = pump_with(session, false);

        let backend_wake = pump.wake.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            backend_wake.notify();
        });

        let start = Instant::now();
        loop {
            if let Turn::Processed { .. } = pump.turn().expect("login should succeed") {
                break;
            }
            assert!(start.elapsed() < Duration::from_secs(5));
        }
        handle.join().expect("backend thread panicked");

        assert_eq!(pump.manager().session().loads().len(), 1);
    }

    #[test]
    fn test_remove_played_flow_through_pump() {
        let mut session = FakeSession::new();
        let party = session.add_playlist("Party", 2);
        session.queued.push_back(SessionEvent::LoggedIn(Ok(())));
        let mut pump = pump_with(session, true);
        pump.wake.notify();
        pump.turn().expect("login should succeed");

        pump.wake.notify_track_finished();
        pump.turn().expect("end of track is never fatal");
        assert!(pump
            .manager()
            .session()
            .commands
            .contains(&Command::Remove(party, vec![0])));
        assert_eq!(pump.manager().cursor(), 0);
        assert_eq!(pump.manager().loaded_track(), None);
    }

    #[test]
    fn test_simulated_backend_plays_and_empties_playlist() {
        use crate::backends::simulated::{LibraryFile, SimulatedSession};
        use crate::backends::PlaylistContainer;
        use crate::config::SessionConfig;

        let library = LibraryFile::parse(
            r#"
            [account]
            username = "alice"
            password = "secret"

            [[playlists]]
            name = "party"
            [[playlists.tracks]]
            name = "First"
            duration_ms = 30
            [[playlists.tracks]]
            name = "Second"
            duration_ms = 30
            "#,
        )
        .expect("library should parse");
        let wake = Arc::new(WakeChannel::new());
        let config = SessionConfig {
            tick_ms: 5,
            ..SessionConfig::default()
        };
        let session =
            SimulatedSession::start(library, &config, wake.clone()).expect("backend starts");
        let mut manager = PlaylistManager::new(
            session,
            PlaybackPolicy {
                target_playlist: "Party".to_string(),
                remove_played_tracks: true,
            },
        );
        manager.login("alice", "secret");
        let mut pump = EventPump::new(manager, wake);

        let start = Instant::now();
        pump.turn().expect("login should succeed");
        let party = pump.manager().watched_playlist().expect("watching party");
        while pump.manager().session().num_tracks(party) > 0 {
            assert!(
                start.elapsed() < Duration::from_secs(10),
                "playlist was never emptied"
            );
            pump.turn().expect("playback is never fatal");
        }

        assert_eq!(pump.manager().cursor(), 0);
        assert_eq!(pump.manager().loaded_track(), None);
    }
}
