//! serenity event handler.

use super::DiscordTextChannel;
use crate::chat::{ChatMessage, MessageAuthor, VoiceChannelRef};
use crate::commands::CommandRouter;
use crate::music::{MusicCredentials, MusicService};
use async_trait::async_trait;
use serenity::all::{Context, EventHandler, Message, Ready};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

pub struct Handler {
    router: Arc<CommandRouter>,
    music: Arc<dyn MusicService>,
    credentials: MusicCredentials,
    logged_in: AtomicBool,
}

impl Handler {
    pub fn new(
        router: Arc<CommandRouter>,
        music: Arc<dyn MusicService>,
        credentials: MusicCredentials,
    ) -> Self {
        Self {
            router,
            music,
            credentials,
            logged_in: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    /// Log in to the music service the first time the gateway is ready.
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(user = %ready.user.tag(), guilds = ready.guilds.len(), "Logged in to Discord");

        if self.logged_in.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.music.login(&self.credentials).await {
            Ok(()) => info!("Logged in to Spotify"),
            Err(e) => error!(error = %e, "Spotify login failed"),
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let (channel_name, author_voice_channel) = resolve_channels(&ctx, &msg);

        let message = ChatMessage {
            channel: Arc::new(DiscordTextChannel::new(
                ctx.http.clone(),
                msg.channel_id,
                channel_name,
            )),
            author: MessageAuthor {
                id: msg.author.id.get(),
                name: msg.author.name.clone(),
            },
            content: msg.content.clone(),
            author_voice_channel,
        };

        self.router.handle(message).await;
    }
}

/// Name of the message's channel and the voice channel its author is sitting in.
///
/// Reads the cache synchronously so no cache guard is held across an await.
fn resolve_channels(ctx: &Context, msg: &Message) -> (String, Option<VoiceChannelRef>) {
    let fallback = msg.channel_id.to_string();
    let Some(guild_id) = msg.guild_id else {
        return (fallback, None);
    };
    let Some(guild) = ctx.cache.guild(guild_id) else {
        return (fallback, None);
    };

    let channel_name = guild
        .channels
        .get(&msg.channel_id)
        .map(|channel| channel.name.clone())
        .unwrap_or(fallback);

    let voice_channel = guild
        .voice_states
        .get(&msg.author.id)
        .and_then(|state| state.channel_id)
        .map(|channel_id| VoiceChannelRef {
            guild_id: guild_id.get(),
            channel_id: channel_id.get(),
            name: guild
                .channels
                .get(&channel_id)
                .map(|channel| channel.name.clone())
                .unwrap_or_else(|| channel_id.to_string()),
        });

    (channel_name, voice_channel)
}
