//! # Configuration Management
//!
//! This module handles loading the bridge configuration from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP__ prefix, `__` between section and key)
//! - The plain variables the bot has always used (`DISCORD_BOT_TOKEN`, `SPOTIFY_USERNAME`, ...)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Plain deployment variables (DISCORD_BOT_TOKEN, SPOTIFY_USERNAME, SPOTIFY_PASSWORD, ALSA_DEVICE, ...)
//! 2. Prefixed environment variables (APP__VOICE__DEFAULT_BITRATE, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use crate::audio::capture::CaptureConfig;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Bitrate used for the voice stream until a `bitrate` command changes it.
pub const DEFAULT_BITRATE: u32 = 320_000;

/// Main bridge configuration that contains all settings.
///
/// ## Sections:
/// - `discord`: Bot token and command prefix
/// - `spotify`: Music-service credentials and player daemon settings
/// - `capture`: Audio capture subprocess settings
/// - `voice`: Voice stream settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub discord: DiscordConfig,
    pub spotify: SpotifyConfig,
    pub capture: CaptureConfig,
    pub voice: VoiceConfig,
}

/// Chat-platform settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Bot token used to log in to the gateway
    pub token: String,
    /// Messages must start with this prefix to be treated as commands
    pub command_prefix: String,
}

/// Music-service settings.
///
/// ## Fields:
/// - `username` / `password`: Spotify account handed to the player daemon on login
/// - `daemon_program`: Player daemon binary (spotifyd) that plays into the capture device
/// - `playerctl_program` / `player_name`: MPRIS control of the running daemon
/// - `backend` / `device` / `device_name`: Audio output of the daemon
/// - `api_client_id` / `api_client_secret`: Optional Web API credentials, needed for search and radio
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyConfig {
    pub username: String,
    pub password: String,
    pub daemon_program: String,
    pub playerctl_program: String,
    pub player_name: String,
    pub backend: String,
    pub device: Option<String>,
    pub device_name: String,
    pub api_client_id: Option<String>,
    pub api_client_secret: Option<String>,
}

/// Voice stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Opus bitrate in bits per second used until changed at runtime
    pub default_bitrate: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            discord: DiscordConfig {
                token: String::new(),
                command_prefix: ".spotify ".to_string(),
            },
            spotify: SpotifyConfig {
                username: String::new(),
                password: String::new(),
                daemon_program: "spotifyd".to_string(),
                playerctl_program: "playerctl".to_string(),
                player_name: "spotifyd".to_string(),
                backend: "alsa".to_string(),
                device: None,
                device_name: "voice-bridge".to_string(),
                api_client_id: None,
                api_client_secret: None,
            },
            capture: CaptureConfig::default(),
            voice: VoiceConfig {
                default_bitrate: DEFAULT_BITRATE,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP__VOICE__DEFAULT_BITRATE=128000`: Override the starting bitrate
    /// - `APP__CAPTURE__INPUT_DRIVER=pulse`: Capture through PulseAudio instead of ALSA
    /// - `DISCORD_BOT_TOKEN=...`: Bot token
    /// - `ALSA_DEVICE=hw:Loopback,1,0`: Capture device
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        // Variables the bot was deployed with before the config file existed
        let plain_vars = [
            ("DISCORD_BOT_TOKEN", "discord.token"),
            ("SPOTIFY_USERNAME", "spotify.username"),
            ("SPOTIFY_PASSWORD", "spotify.password"),
            ("SPOTIFY_CLIENT_ID", "spotify.api_client_id"),
            ("SPOTIFY_CLIENT_SECRET", "spotify.api_client_secret"),
            ("ALSA_DEVICE", "capture.device"),
        ];
        for (var, key) in plain_vars {
            if let Ok(value) = env::var(var) {
                settings = settings.set_override(key, value)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - The command prefix is not blank (every message would be a command)
    /// - The default bitrate is positive
    /// - The capture and player programs are named
    pub fn validate(&self) -> Result<()> {
        if self.discord.command_prefix.trim().is_empty() {
            return Err(anyhow::anyhow!("Command prefix cannot be empty"));
        }

        if self.voice.default_bitrate == 0 {
            return Err(anyhow::anyhow!("Default bitrate must be greater than 0"));
        }

        if self.capture.program.trim().is_empty() {
            return Err(anyhow::anyhow!("Capture program cannot be empty"));
        }

        if self.spotify.playerctl_program.trim().is_empty()
            || self.spotify.daemon_program.trim().is_empty()
        {
            return Err(anyhow::anyhow!("Player programs cannot be empty"));
        }

        Ok(())
    }

    /// Check that the secrets needed to go online are present.
    ///
    /// Kept apart from [`AppConfig::validate`] so the defaults stay valid for tests
    /// and tooling that never connects anywhere.
    pub fn require_credentials(&self) -> Result<()> {
        if self.discord.token.trim().is_empty() {
            return Err(anyhow::anyhow!("DISCORD_BOT_TOKEN is not set"));
        }

        if self.spotify.username.trim().is_empty() || self.spotify.password.is_empty() {
            return Err(anyhow::anyhow!("SPOTIFY_USERNAME and SPOTIFY_PASSWORD must be set"));
        }

        if self.capture.device.as_deref().map_or(true, |d| d.trim().is_empty()) {
            return Err(anyhow::anyhow!("ALSA_DEVICE is not set"));
        }

        Ok(())
    }
}
