//! # Voice Session State
//!
//! The single record of what the bot is doing in voice:
//!
//! - which text channel gets replies
//! - which voice channel it should be in
//! - the live voice connection and the capture subprocess attached to it
//! - the bitrate of the stream
//!
//! ## Ownership:
//! One `VoiceSessionState` is created at startup, in the `Idle` phase, and is owned by
//! the [`VoiceSessionController`](crate::controller::VoiceSessionController), which is the
//! only code that mutates it. It holds at most one connection and at most one capture
//! handle at a time.
//!
//! ## Generations:
//! Every teardown and every new connection attempt bumps `generation`. Asynchronous work
//! remembers the generation it started under; when it completes under a different one,
//! its result is stale and must be released instead of stored.

use crate::audio::AudioCapture;
use crate::chat::{TextChannel, VoiceChannelRef, VoiceConnection};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Where the session is in its connect/stream lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No connection, nothing pending
    Idle,
    /// A join attempt tagged with `generation` is in flight
    Connecting { generation: u64 },
    /// Connected, but no capture stream is attached
    Connected,
    /// Connected and streaming captured audio
    Streaming,
}

impl SessionPhase {
    pub fn as_str(&self) -> &str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Connecting { .. } => "connecting",
            SessionPhase::Connected => "connected",
            SessionPhase::Streaming => "streaming",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The process-wide voice session.
pub struct VoiceSessionState {
    pub(crate) text_channel: Option<Arc<dyn TextChannel>>,
    pub(crate) voice_channel: Option<VoiceChannelRef>,
    pub(crate) connection: Option<Box<dyn VoiceConnection>>,
    pub(crate) capture: Option<Box<dyn AudioCapture>>,
    pub(crate) bitrate: u32,
    pub(crate) phase: SessionPhase,
    pub(crate) generation: u64,
    pub(crate) connected_at: Option<DateTime<Utc>>,
}

/// Read-only copy of the observable session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub bitrate: u32,
    pub voice_channel: Option<VoiceChannelRef>,
    pub has_connection: bool,
    pub has_capture: bool,
    pub generation: u64,
}

/// Resources taken out of the state, waiting to be torn down.
///
/// Teardown always destroys the capture handle before disconnecting, so the
/// subprocess never writes into a connection that is going away.
#[derive(Default)]
pub struct SessionResources {
    pub capture: Option<Box<dyn AudioCapture>>,
    pub connection: Option<Box<dyn VoiceConnection>>,
}

impl SessionResources {
    pub fn is_empty(&self) -> bool {
        self.capture.is_none() && self.connection.is_none()
    }

    /// Destroy the capture handle, then disconnect. Errors are logged.
    pub async fn teardown(mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.destroy().await;
        }

        if let Some(mut connection) = self.connection.take() {
            if let Err(e) = connection.disconnect().await {
                warn!(error = %e, "Voice disconnect failed");
            }
        }
    }
}

impl VoiceSessionState {
    /// Create the idle session with the starting bitrate.
    pub fn new(bitrate: u32) -> Self {
        Self {
            text_channel: None,
            voice_channel: None,
            connection: None,
            capture: None,
            bitrate,
            phase: SessionPhase::Idle,
            generation: 0,
            connected_at: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn bitrate(&self) -> u32 {
        self.bitrate
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            bitrate: self.bitrate,
            voice_channel: self.voice_channel.clone(),
            has_connection: self.connection.is_some(),
            has_capture: self.capture.is_some(),
            generation: self.generation,
        }
    }

    /// Take the connection and capture handle out, return to `Idle` and start a new
    /// generation. With `forget_channel`, the target voice channel is cleared as well.
    pub fn release(&mut self, forget_channel: bool) -> SessionResources {
        if let Some(since) = self.connected_at.take() {
            let seconds = Utc::now().signed_duration_since(since).num_seconds();
            info!(connected_seconds = seconds, "Releasing voice connection");
        }

        self.generation += 1;
        self.phase = SessionPhase::Idle;
        if forget_channel {
            self.voice_channel = None;
        }

        SessionResources {
            capture: self.capture.take(),
            connection: self.connection.take(),
        }
    }

    /// Release everything and start connecting to `channel`.
    ///
    /// ## Returns:
    /// The old resources (to tear down before connecting) and the generation of the
    /// new attempt.
    pub fn begin_connecting(&mut self, channel: VoiceChannelRef) -> (SessionResources, u64) {
        let stale = self.release(false);
        self.generation += 1;
        self.voice_channel = Some(channel);
        self.phase = SessionPhase::Connecting {
            generation: self.generation,
        };
        (stale, self.generation)
    }

    /// Store the connection produced by the attempt of the current generation.
    pub fn attach_connection(&mut self, connection: Box<dyn VoiceConnection>) {
        self.connection = Some(connection);
        self.connected_at = Some(Utc::now());
        self.phase = SessionPhase::Connected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{general, Journal, MockCapture, MockConnection};

    #[test]
    fn test_new_session_is_idle() {
        let state = VoiceSessionState::new(320_000);
        let snapshot = state.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Idle);
        assert_eq!(snapshot.bitrate, 320_000);
        assert!(!snapshot.has_connection);
        assert!(!snapshot.has_capture);
        assert!(snapshot.voice_channel.is_none());
    }

    #[test]
    fn test_begin_connecting_takes_old_resources() {
        let journal = Journal::default();
        let mut state = VoiceSessionState::new(320_000);
        state.attach_connection(Box::new(MockConnection::new(1, journal.clone())));
        state.capture = Some(Box::new(MockCapture::new(1, journal.clone())));
        let before = state.generation();

        let (stale, generation) = state.begin_connecting(general());
        assert!(stale.connection.is_some());
        assert!(stale.capture.is_some());
        assert!(generation > before);
        assert_eq!(state.phase(), SessionPhase::Connecting { generation });
        assert_eq!(state.voice_channel, Some(general()));
        assert!(state.connection.is_none());
    }

    #[tokio::test]
    async fn test_teardown_destroys_capture_before_disconnect() {
        let journal = Journal::default();
        let resources = SessionResources {
            capture: Some(Box::new(MockCapture::new(7, journal.clone()))),
            connection: Some(Box::new(MockConnection::new(3, journal.clone()))),
        };

        resources.teardown().await;
        assert_eq!(journal.entries(), vec!["capture#7 destroy", "connection#3 disconnect"]);
    }

    #[test]
    fn test_release_can_keep_voice_channel() {
        let mut state = VoiceSessionState::new(320_000);
        let (_, _) = state.begin_connecting(general());

        let resources = state.release(false);
        assert!(resources.is_empty());
        assert_eq!(state.voice_channel, Some(general()));

        state.release(true);
        assert!(state.voice_channel.is_none());
        assert_eq!(state.phase(), SessionPhase::Idle);
    }
}
