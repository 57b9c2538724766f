//! # Command Router
//!
//! Entry point for every inbound chat message.
//!
//! ## Request Flow:
//! 1. Log the message (`channel: author (id): content`)
//! 2. Parse it; messages without the prefix stop here
//! 3. Remember the channel as the session's reply channel
//! 4. Dispatch: voice commands are awaited, music calls run as tracked background tasks
//!    whose errors are replied to the channel the command came from

use super::{help_text, Command, PlayRequest};
use crate::chat::{deliver, ChatMessage, TextChannel};
use crate::controller::VoiceSessionController;
use crate::error::BridgeResult;
use crate::music::{MusicCredentials, MusicService};
use crate::shutdown::{ShutdownCoordinator, ShutdownTrigger};
use std::future::Future;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

pub struct CommandRouter {
    prefix: String,
    controller: Arc<VoiceSessionController>,
    music: Arc<dyn MusicService>,
    credentials: MusicCredentials,
    shutdown: Arc<ShutdownCoordinator>,
    tasks: TaskTracker,
}

impl CommandRouter {
    pub fn new(
        prefix: impl Into<String>,
        controller: Arc<VoiceSessionController>,
        music: Arc<dyn MusicService>,
        credentials: MusicCredentials,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            controller,
            music,
            credentials,
            shutdown,
            tasks: TaskTracker::new(),
        }
    }

    /// Handle one inbound message.
    pub async fn handle(&self, message: ChatMessage) {
        info!(
            "{}: {} ({}): {}",
            message.channel.name(),
            message.author.name,
            message.author.id,
            message.content
        );

        let Some(command) = Command::parse(&self.prefix, &message.content) else {
            return;
        };
        debug!(?command, "Dispatching command");

        let channel = message.channel.clone();
        if !matches!(command, Command::Unknown(_)) {
            self.controller.set_text_channel(channel.clone()).await;
        }

        match command {
            Command::Join => match message.author_voice_channel {
                Some(voice_channel) => self.controller.join(voice_channel).await,
                None => deliver(channel.as_ref(), "You need to join a voice channel first!").await,
            },
            Command::Leave => self.controller.leave().await,
            Command::Play(PlayRequest::Resume) => {
                self.spawn_music(channel, |music| async move { music.play().await })
            }
            Command::Play(PlayRequest::Url(url)) => {
                self.spawn_music(channel, |music| async move { music.play_url(&url).await })
            }
            Command::Play(PlayRequest::Search(query)) => self.spawn_music(channel, |music| async move {
                music.search_and_play(&query).await
            }),
            Command::Pause => self.spawn_music(channel, |music| async move { music.pause().await }),
            Command::Previous => {
                self.spawn_music(channel, |music| async move { music.previous().await })
            }
            Command::Next => self.spawn_music(channel, |music| async move { music.next().await }),
            Command::Radio => {
                self.spawn_music(channel, |music| async move { music.start_radio().await })
            }
            Command::NowPlaying => {
                let reply_to = channel.clone();
                self.spawn_music(channel, |music| async move {
                    let info = music.now_playing_info().await?;
                    deliver(reply_to.as_ref(), &format!("Now Playing: {}", info)).await;
                    Ok(())
                })
            }
            Command::Help => deliver(channel.as_ref(), &help_text(&self.prefix)).await,
            Command::Restart => {
                let credentials = self.credentials.clone();
                self.spawn_music(channel, |music| async move {
                    music.logout().await?;
                    music.login(&credentials).await
                })
            }
            Command::Bitrate(Some(value)) => {
                self.controller.set_bitrate(&value).await;
            }
            Command::Bitrate(None) => {
                let bitrate = self.controller.bitrate().await;
                deliver(channel.as_ref(), &format!("Current bitrate: {}", bitrate)).await;
            }
            Command::Exit => {
                self.shutdown.shutdown(ShutdownTrigger::ExitCommand).await;
            }
            Command::Unknown(name) => {
                deliver(channel.as_ref(), &format!("No such command: `{}`", name)).await
            }
        }
    }

    /// Run a music-service call in the background; a failure is replied to `channel`.
    fn spawn_music<F, Fut>(&self, channel: Arc<dyn TextChannel>, call: F)
    where
        F: FnOnce(Arc<dyn MusicService>) -> Fut,
        Fut: Future<Output = BridgeResult<()>> + Send + 'static,
    {
        let fut = call(self.music.clone());
        self.tasks.spawn(async move {
            if let Err(e) = fut.await {
                warn!(error = %e, "Music service call failed");
                deliver(channel.as_ref(), &e.to_chat_message()).await;
            }
        });
    }

    /// Wait for the music calls in flight to finish.
    pub async fn settle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}
