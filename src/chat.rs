//! # Chat Platform Seams
//!
//! The session controller and the command router never talk to Discord directly. They
//! see the chat platform through the traits in this module:
//!
//! - [`TextChannel`]: where replies and error reports go
//! - [`VoiceGateway`]: joins a voice channel and yields a [`VoiceConnection`]
//! - [`VoiceConnection`]: accepts one PCM stream at a bitrate, and can be disconnected
//! - [`ChatClient`]: the logged-in client itself, released on shutdown
//!
//! The Discord implementations live in `crate::discord`; tests use recording mocks.

use crate::audio::CaptureStream;
use crate::controller::ConnectionWatch;
use crate::error::BridgeResult;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Reference to a voice channel on the chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceChannelRef {
    pub guild_id: u64,
    pub channel_id: u64,
    pub name: String,
}

impl fmt::Display for VoiceChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.channel_id)
    }
}

/// A text channel the bot can reply in.
#[async_trait]
pub trait TextChannel: Send + Sync {
    /// Human-readable channel name, used in logs.
    fn name(&self) -> &str;

    async fn send(&self, text: &str) -> BridgeResult<()>;
}

/// Who sent a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageAuthor {
    pub id: u64,
    pub name: String,
}

/// One inbound chat message, already resolved against the platform's cache.
#[derive(Clone)]
pub struct ChatMessage {
    pub channel: Arc<dyn TextChannel>,
    pub author: MessageAuthor,
    pub content: String,
    /// Voice channel the author is sitting in when the message arrived
    pub author_voice_channel: Option<VoiceChannelRef>,
}

/// A live voice connection.
#[async_trait]
pub trait VoiceConnection: Send {
    /// Start feeding `stream` into the call at `bitrate` bits per second.
    ///
    /// Whatever was playing before is stopped; connections never layer streams.
    async fn play_stream(&mut self, stream: CaptureStream, bitrate: u32) -> BridgeResult<()>;

    async fn disconnect(&mut self) -> BridgeResult<()>;
}

/// Establishes voice connections.
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Join `channel`.
    ///
    /// `watch` must be notified if the platform drops the connection later on.
    async fn join(
        &self,
        channel: &VoiceChannelRef,
        watch: ConnectionWatch,
    ) -> BridgeResult<Box<dyn VoiceConnection>>;
}

/// The logged-in chat client.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Close the gateway connection.
    async fn release(&self) -> BridgeResult<()>;
}

/// Send `text` to `channel`, logging instead of failing when delivery does not work.
pub async fn deliver(channel: &dyn TextChannel, text: &str) {
    if let Err(e) = channel.send(text).await {
        warn!(channel = %channel.name(), error = %e, "Failed to deliver chat reply");
    }
}
