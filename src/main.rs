//! # Spotify Voice Bridge - Main Application Entry Point
//!
//! Wires the bridge together and runs the Discord client until shutdown.
//!
//! ## Startup:
//! 1. **Loads configuration** from `.env`, `config.toml` and environment variables
//! 2. **Initializes logging** so everything below is traced
//! 3. **Builds the components**: voice session controller, music player, command router
//! 4. **Starts the Discord client** with songbird registered for voice
//! 5. **Waits** until the client stops or the shutdown sequence has run

use anyhow::Result;
use songbird::{SerenityInit, Songbird};
use spotify_voice_bridge::audio::FfmpegCapture;
use spotify_voice_bridge::commands::CommandRouter;
use spotify_voice_bridge::config::AppConfig;
use spotify_voice_bridge::controller::VoiceSessionController;
use spotify_voice_bridge::discord::{self, DiscordChatClient, Handler, SongbirdGateway};
use spotify_voice_bridge::music::{MusicCredentials, MusicService, SpotifydPlayer};
use spotify_voice_bridge::shutdown::{install_signal_handlers, ShutdownCoordinator, ShutdownTrigger};
use serenity::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long replies of in-flight music commands may take after shutdown.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; deployments usually set the variables directly
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;
    config.require_credentials()?;

    info!(
        prefix = %config.discord.command_prefix,
        bitrate = config.voice.default_bitrate,
        device = ?config.capture.device,
        "Starting spotify-voice-bridge"
    );

    let songbird = Songbird::serenity();
    let controller = Arc::new(VoiceSessionController::new(
        Arc::new(SongbirdGateway::new(songbird.clone())),
        Arc::new(FfmpegCapture::new(config.capture.clone())),
        config.voice.default_bitrate,
    ));

    let music: Arc<dyn MusicService> = Arc::new(SpotifydPlayer::new(config.spotify.clone()));
    let credentials = MusicCredentials {
        username: config.spotify.username.clone(),
        password: config.spotify.password.clone(),
    };

    let chat = Arc::new(DiscordChatClient::new());
    let shutdown = Arc::new(ShutdownCoordinator::new(
        controller.clone(),
        music.clone(),
        chat.clone(),
    ));

    let router = Arc::new(CommandRouter::new(
        config.discord.command_prefix.clone(),
        controller,
        music.clone(),
        credentials.clone(),
        shutdown.clone(),
    ));

    let mut client = Client::builder(&config.discord.token, discord::intents())
        .event_handler(Handler::new(router.clone(), music, credentials))
        .register_songbird_with(songbird)
        .await?;
    chat.attach(client.shard_manager.clone());

    install_signal_handlers(shutdown.clone())?;

    // Whichever finishes first wins: the client dying on its own, or a shutdown
    tokio::select! {
        result = client.start() => {
            if let Err(e) = result {
                error!(error = %e, "Discord client stopped with an error");
            } else {
                info!("Discord client stopped");
            }
            shutdown.shutdown(ShutdownTrigger::ExitCommand).await;
        }
        _ = shutdown.terminated() => {
            info!("Shutdown sequence complete");
        }
    }

    if tokio::time::timeout(SETTLE_TIMEOUT, router.settle()).await.is_err() {
        info!("Abandoning music commands still in flight");
    }

    info!("Bye");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "spotify_voice_bridge=trace")
/// - If not set, defaults to "spotify_voice_bridge=debug,serenity=warn,songbird=warn"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spotify_voice_bridge=debug,serenity=warn,songbird=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
