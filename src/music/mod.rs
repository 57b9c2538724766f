//! # Music Service Client
//!
//! The bot controls playback on a remote music service; what it plays ends up on the
//! capture device and from there in the voice call.
//!
//! ## Key Components:
//! - **MusicService**: The operations the command router needs ([`MusicService`])
//! - **SpotifydPlayer**: spotifyd daemon + playerctl transport control ([`spotifyd`])
//! - **TrackSearch**: Spotify Web API search for `play <query>` ([`search`])
//!
//! Every call except [`MusicService::now_playing_info`] is fired without waiting for the
//! result; failures are reported through the router's error callback.

pub mod search;
pub mod spotifyd;

use crate::error::BridgeResult;
use async_trait::async_trait;

pub use search::TrackSearch;
pub use spotifyd::SpotifydPlayer;

/// Account used to log in to the music service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MusicCredentials {
    pub username: String,
    pub password: String,
}

#[async_trait]
pub trait MusicService: Send + Sync {
    async fn login(&self, credentials: &MusicCredentials) -> BridgeResult<()>;
    async fn logout(&self) -> BridgeResult<()>;

    /// Resume playback.
    async fn play(&self) -> BridgeResult<()>;
    /// Play a playlist, album or track by URL.
    async fn play_url(&self, url: &str) -> BridgeResult<()>;
    /// Search for a track and play the first result.
    async fn search_and_play(&self, query: &str) -> BridgeResult<()>;
    async fn pause(&self) -> BridgeResult<()>;
    /// Previous track, or the beginning of the current one.
    async fn previous(&self) -> BridgeResult<()>;
    async fn next(&self) -> BridgeResult<()>;
    /// Start radio based on the current track.
    async fn start_radio(&self) -> BridgeResult<()>;

    /// Short description of the current track.
    async fn now_playing_info(&self) -> BridgeResult<String>;
}
