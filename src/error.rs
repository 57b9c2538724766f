//! # Error Handling
//!
//! This module defines the error type shared by the session controller, the capture
//! subprocess, the music-service client and the chat collaborators.
//!
//! ## Error Categories:
//! - **Connection**: Joining a voice channel failed (permissions, unreachable channel)
//! - **MusicService**: The remote music player rejected or failed a request
//! - **InvalidInput**: A command argument could not be parsed
//! - **Capture**: The audio capture subprocess could not be started or fed
//! - **Config**: Required configuration is missing or inconsistent
//! - **Chat**: The chat platform failed to deliver a message or release its client
//!
//! ## Propagation:
//! Nothing here is fatal to the process. Command handlers turn every error into a
//! chat reply via [`BridgeError::to_chat_message`]; the shutdown path only logs them.

use std::fmt;

/// Custom error types for the bridge.
///
/// ## Usage Example:
/// ```rust
/// use spotify_voice_bridge::error::BridgeError;
/// let err = BridgeError::Capture("input device is not configured".to_string());
/// assert!(err.to_chat_message().starts_with("Capture error"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Voice channel join or voice transport failure
    Connection(String),

    /// Remote music service failure (login, transport control, search)
    MusicService(String),

    /// Malformed command argument
    InvalidInput(String),

    /// Capture subprocess failed to spawn or has no output stream
    Capture(String),

    /// Configuration file or environment variable problems
    Config(String),

    /// Chat platform delivery or teardown failure
    Chat(String),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Connection(msg) => write!(f, "Connection error: {}", msg),
            BridgeError::MusicService(msg) => write!(f, "Music service error: {}", msg),
            BridgeError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            BridgeError::Capture(msg) => write!(f, "Capture error: {}", msg),
            BridgeError::Config(msg) => write!(f, "Configuration error: {}", msg),
            BridgeError::Chat(msg) => write!(f, "Chat error: {}", msg),
        }
    }
}

impl std::error::Error for BridgeError {}

impl BridgeError {
    /// Heading used for the chat reply of this error.
    ///
    /// Join failures keep the `Join error` heading the bot has always used,
    /// music-service failures use the plain `Error:` heading of the error callback.
    pub fn chat_heading(&self) -> &'static str {
        match self {
            BridgeError::Connection(_) => "Join error",
            BridgeError::MusicService(_) => "Error:",
            BridgeError::InvalidInput(_) => "Invalid input",
            BridgeError::Capture(_) => "Capture error",
            BridgeError::Config(_) => "Configuration error",
            BridgeError::Chat(_) => "Chat error",
        }
    }

    /// Render the error as the multi-line message delivered to the text channel.
    ///
    /// ## Format:
    /// ````text
    /// Join error
    /// ```
    /// Connection error: missing permissions
    /// ```
    /// ````
    pub fn to_chat_message(&self) -> String {
        [self.chat_heading(), "```", &self.to_string(), "```"].join("\n")
    }
}

/// Configuration loading failures (bad TOML, wrong types) are configuration errors.
impl From<config::ConfigError> for BridgeError {
    fn from(err: config::ConfigError) -> Self {
        BridgeError::Config(err.to_string())
    }
}

/// Type alias for Results that use the bridge error type.
pub type BridgeResult<T> = Result<T, BridgeError>;
