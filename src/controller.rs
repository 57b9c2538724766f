//! # Voice Session Controller
//!
//! The state machine that owns the voice session. Commands and connection-lifecycle
//! events come in here; the controller is the only code that mutates
//! [`VoiceSessionState`].
//!
//! ## State Machine:
//! ```text
//! Idle ──join──▶ Connecting ──connected──▶ Connected ──stream attached──▶ Streaming
//!   ▲                │                          │                             │
//!   └──join failed───┘                          └── leave / lost / shutdown ──┘
//! Streaming ──set_bitrate──▶ Streaming   (same connection, capture replaced)
//! ```
//!
//! ## Locking:
//! The state sits behind one async mutex. It is held while resources are attached or
//! taken out, but not while a voice channel join is in flight, so `leave` or another
//! `join` can run during a slow join. The pending join re-checks the generation when it
//! completes and releases its connection if it has been superseded.

use crate::audio::CaptureFactory;
use crate::chat::{deliver, TextChannel, VoiceChannelRef, VoiceGateway};
use crate::error::{BridgeError, BridgeResult};
use crate::state::{SessionPhase, SessionSnapshot, VoiceSessionState};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Handed to the voice gateway with every join, so the platform can report that the
/// connection it produced has gone away.
#[derive(Clone)]
pub struct ConnectionWatch {
    state: Weak<Mutex<VoiceSessionState>>,
    generation: u64,
}

impl ConnectionWatch {
    /// Generation of the join this watch belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The platform dropped the connection.
    ///
    /// Ignored unless the connection of this watch is still the session's current one.
    /// The target voice channel is kept, so a later bitrate change rejoins it.
    pub async fn connection_lost(&self) {
        let Some(state) = self.state.upgrade() else {
            return;
        };

        let (resources, reply_to) = {
            let mut state = state.lock().await;
            if state.generation != self.generation || state.connection.is_none() {
                debug!(generation = self.generation, "Ignoring loss of a stale connection");
                return;
            }
            warn!(generation = self.generation, "Voice connection lost");
            (state.release(false), state.text_channel.clone())
        };

        resources.teardown().await;

        if let Some(channel) = reply_to {
            deliver(
                channel.as_ref(),
                "Lost the voice connection. Use `.spotify join` to reconnect.",
            )
            .await;
        }
    }
}

/// Owner of the single voice session.
pub struct VoiceSessionController {
    state: Arc<Mutex<VoiceSessionState>>,
    gateway: Arc<dyn VoiceGateway>,
    capture: Arc<dyn CaptureFactory>,
}

impl VoiceSessionController {
    /// Create the controller with an idle session streaming at `bitrate` once joined.
    pub fn new(
        gateway: Arc<dyn VoiceGateway>,
        capture: Arc<dyn CaptureFactory>,
        bitrate: u32,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(VoiceSessionState::new(bitrate))),
            gateway,
            capture,
        }
    }

    /// Record the channel replies and errors are delivered to.
    pub async fn set_text_channel(&self, channel: Arc<dyn TextChannel>) {
        self.state.lock().await.text_channel = Some(channel);
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn bitrate(&self) -> u32 {
        self.state.lock().await.bitrate()
    }

    /// Join `channel` and start streaming into it.
    ///
    /// ## Steps:
    /// 1. Tear down the current connection and capture handle, if any
    /// 2. Record the channel and start a new generation (`Connecting`)
    /// 3. Join; on failure report `Join error` and return to `Idle`
    /// 4. On success store the connection and attach a fresh capture stream
    pub async fn join(&self, channel: VoiceChannelRef) {
        let (stale, generation) = self.state.lock().await.begin_connecting(channel.clone());
        stale.teardown().await;
        self.connect(channel, generation).await;
    }

    async fn connect(&self, channel: VoiceChannelRef, generation: u64) {
        info!(channel = %channel, generation, "Joining voice channel");

        let watch = ConnectionWatch {
            state: Arc::downgrade(&self.state),
            generation,
        };
        let result = self.gateway.join(&channel, watch).await;

        let mut state = self.state.lock().await;
        let reply_to = state.text_channel.clone();

        let mut connection = match result {
            Ok(connection) => connection,
            Err(e) => {
                if state.generation != generation {
                    drop(state);
                    debug!(channel = %channel, generation, error = %e, "Superseded voice join failed");
                    return;
                }
                state.phase = SessionPhase::Idle;
                drop(state);
                warn!(channel = %channel, error = %e, "Voice join failed");
                report(reply_to, &e).await;
                return;
            }
        };

        if state.generation != generation {
            let cleared = state.voice_channel.is_none();
            drop(state);

            if let Err(e) = connection.disconnect().await {
                warn!(error = %e, "Failed to release superseded voice connection");
            }

            if cleared {
                let err = BridgeError::Config(format!(
                    "voice channel was cleared before the connection to {} completed",
                    channel.name
                ));
                report(reply_to, &err).await;
            } else {
                debug!(channel = %channel, generation, "Discarded superseded voice connection");
            }
            return;
        }

        state.attach_connection(connection);
        info!(channel = %channel, generation, "Voice connection established");

        let result = self.attach_stream(&mut state).await;
        drop(state);

        if let Err(e) = result {
            warn!(error = %e, "Failed to start streaming");
            report(reply_to, &e).await;
        }
    }

    /// (Re)start the capture stream on the current connection.
    ///
    /// Without a connection this rejoins the stored voice channel, waits for a pending
    /// join to attach the stream itself, or reports that there is nowhere to stream to.
    pub async fn start_streaming(&self) {
        let mut state = self.state.lock().await;

        if state.connection.is_some() {
            let result = self.attach_stream(&mut state).await;
            let reply_to = state.text_channel.clone();
            drop(state);

            if let Err(e) = result {
                warn!(error = %e, "Failed to restart streaming");
                report(reply_to, &e).await;
            }
            return;
        }

        if let SessionPhase::Connecting { generation } = state.phase {
            debug!(generation, "Join in flight, stream attaches when it completes");
            return;
        }

        let voice_channel = state.voice_channel.clone();
        match voice_channel {
            Some(channel) => {
                drop(state);
                self.join(channel).await;
            }
            None => {
                let reply_to = state.text_channel.clone();
                drop(state);
                let err = BridgeError::Connection(
                    "not in a voice channel, use `.spotify join` first".to_string(),
                );
                report(reply_to, &err).await;
            }
        }
    }

    /// Replace the capture handle on the live connection.
    ///
    /// The old handle is destroyed before the new one starts, so at most one stream is
    /// ever attached.
    async fn attach_stream(&self, state: &mut VoiceSessionState) -> BridgeResult<()> {
        if let Some(mut old) = state.capture.take() {
            old.destroy().await;
        }

        let bitrate = state.bitrate;
        state.phase = SessionPhase::Connected;
        let Some(connection) = state.connection.as_mut() else {
            return Err(BridgeError::Connection("not connected".to_string()));
        };

        let mut capture = self.capture.start()?;
        let Some(stream) = capture.take_stream() else {
            capture.destroy().await;
            return Err(BridgeError::Capture("capture produced no output stream".to_string()));
        };

        if let Err(e) = connection.play_stream(stream, bitrate).await {
            capture.destroy().await;
            return Err(e);
        }

        state.capture = Some(capture);
        state.phase = SessionPhase::Streaming;
        info!(bitrate, "Streaming capture into voice connection");
        Ok(())
    }

    /// Change the stream bitrate.
    ///
    /// ## Behavior:
    /// - Not a positive integer: nothing changes and nothing is replied (logged only)
    /// - Valid: store it, restart the stream if a voice channel is set, reply the value
    ///
    /// ## Returns:
    /// The applied bitrate, or `None` when the input was ignored.
    pub async fn set_bitrate(&self, raw: &str) -> Option<u32> {
        let Some(bitrate) = parse_bitrate(raw) else {
            warn!(input = %raw, "Ignoring invalid bitrate");
            return None;
        };

        let (restart, reply_to) = {
            let mut state = self.state.lock().await;
            state.bitrate = bitrate;
            (state.voice_channel.is_some(), state.text_channel.clone())
        };
        info!(bitrate, "Bitrate changed");

        if restart {
            self.start_streaming().await;
        }

        if let Some(channel) = reply_to {
            deliver(channel.as_ref(), &format!("Bitrate set to {}", bitrate)).await;
        }
        Some(bitrate)
    }

    /// Destroy the capture handle, disconnect, and forget the voice channel.
    ///
    /// Safe to call any number of times, including on an idle session.
    pub async fn leave(&self) {
        let resources = self.state.lock().await.release(true);
        if resources.is_empty() {
            debug!("Leave requested with no active voice session");
        } else {
            info!("Leaving voice channel");
        }
        resources.teardown().await;
    }
}

/// A bitrate is a positive integer number of bits per second.
fn parse_bitrate(raw: &str) -> Option<u32> {
    raw.trim().parse::<u32>().ok().filter(|bitrate| *bitrate > 0)
}

async fn report(reply_to: Option<Arc<dyn TextChannel>>, err: &BridgeError) {
    match reply_to {
        Some(channel) => deliver(channel.as_ref(), &err.to_chat_message()).await,
        None => warn!(error = %err, "No text channel to report error to"),
    }
}
