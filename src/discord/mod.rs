//! # Discord Adapter
//!
//! Implements the chat seams from [`crate::chat`] on top of serenity (gateway, cache,
//! HTTP) and songbird (voice).
//!
//! ## Key Components:
//! - **Handler**: serenity event handler feeding messages into the command router
//! - **SongbirdGateway**: voice channel joins and the capture-to-voice stream
//! - **DiscordTextChannel**: replies through the HTTP API
//! - **DiscordChatClient**: shuts the gateway shards down on exit

pub mod handler;
pub mod voice;

use crate::chat::{ChatClient, TextChannel};
use crate::error::{BridgeError, BridgeResult};
use async_trait::async_trait;
use serenity::all::{ChannelId, GatewayIntents, Http, ShardManager};
use std::sync::{Arc, OnceLock};
use tracing::info;

pub use handler::Handler;
pub use voice::SongbirdGateway;

/// Gateway intents the bot needs: guild cache, message content and voice states.
pub fn intents() -> GatewayIntents {
    GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_VOICE_STATES
}

pub struct DiscordTextChannel {
    http: Arc<Http>,
    channel_id: ChannelId,
    name: String,
}

impl DiscordTextChannel {
    pub fn new(http: Arc<Http>, channel_id: ChannelId, name: String) -> Self {
        Self {
            http,
            channel_id,
            name,
        }
    }
}

#[async_trait]
impl TextChannel for DiscordTextChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, text: &str) -> BridgeResult<()> {
        self.channel_id
            .say(self.http.as_ref(), text)
            .await
            .map(|_| ())
            .map_err(|e| BridgeError::Chat(e.to_string()))
    }
}

/// The serenity client, as far as shutdown is concerned.
///
/// Created before the client exists (the shutdown coordinator needs it up front);
/// [`DiscordChatClient::attach`] hands it the shard manager once the client is built.
#[derive(Default)]
pub struct DiscordChatClient {
    shard_manager: OnceLock<Arc<ShardManager>>,
}

impl DiscordChatClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, shard_manager: Arc<ShardManager>) {
        if self.shard_manager.set(shard_manager).is_err() {
            info!("Shard manager already attached");
        }
    }
}

#[async_trait]
impl ChatClient for DiscordChatClient {
    async fn release(&self) -> BridgeResult<()> {
        let manager = self
            .shard_manager
            .get()
            .ok_or_else(|| BridgeError::Chat("client was never started".to_string()))?;
        manager.shutdown_all().await;
        info!("Discord client released");
        Ok(())
    }
}
