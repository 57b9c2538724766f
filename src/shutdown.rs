//! # Graceful Shutdown
//!
//! Tears the bot down in a fixed order, whether the trigger is a process signal or the
//! in-band `exit` command:
//!
//! 1. Destroy the capture subprocess
//! 2. Disconnect from voice
//! 3. Log out of the music service
//! 4. Release the chat client
//! 5. Let `main` return
//!
//! On a signal, steps 3 and 4 are started but not awaited before step 5. On `exit` they
//! complete first. The sequence runs at most once per process; later triggers are
//! logged and ignored.

use crate::chat::ChatClient;
use crate::controller::VoiceSessionController;
use crate::music::MusicService;
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Signal handlers are process-wide; installing them twice would run shutdown twice.
static SIGNAL_HANDLERS_INSTALLED: AtomicBool = AtomicBool::new(false);

/// What asked the bot to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// SIGINT or SIGTERM
    Signal,
    /// The `exit` chat command
    ExitCommand,
}

pub struct ShutdownCoordinator {
    controller: Arc<VoiceSessionController>,
    music: Arc<dyn MusicService>,
    chat: Arc<dyn ChatClient>,
    started: AtomicBool,
    terminated: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new(
        controller: Arc<VoiceSessionController>,
        music: Arc<dyn MusicService>,
        chat: Arc<dyn ChatClient>,
    ) -> Self {
        Self {
            controller,
            music,
            chat,
            started: AtomicBool::new(false),
            terminated: CancellationToken::new(),
        }
    }

    /// Run the shutdown sequence.
    ///
    /// ## Returns:
    /// `true` if this call ran the sequence, `false` if shutdown had already started.
    pub async fn shutdown(&self, trigger: ShutdownTrigger) -> bool {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!(?trigger, "Shutdown already in progress");
            return false;
        }

        info!(?trigger, "Shutting down");
        self.controller.leave().await;

        match trigger {
            ShutdownTrigger::ExitCommand => {
                logout(self.music.clone()).await;
                release(self.chat.clone()).await;
            }
            ShutdownTrigger::Signal => {
                tokio::spawn(logout(self.music.clone()));
                tokio::spawn(release(self.chat.clone()));
            }
        }

        self.terminated.cancel();
        true
    }

    pub fn is_shutting_down(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Resolves once the shutdown sequence has run.
    pub async fn terminated(&self) {
        self.terminated.cancelled().await
    }
}

async fn logout(music: Arc<dyn MusicService>) {
    if let Err(e) = music.logout().await {
        warn!(error = %e, "Music service logout failed during shutdown");
    }
}

async fn release(chat: Arc<dyn ChatClient>) {
    if let Err(e) = chat.release().await {
        warn!(error = %e, "Releasing chat client failed during shutdown");
    }
}

/// Route SIGTERM and SIGINT into `coordinator`.
///
/// Installs at most once per process; later calls do nothing. Repeated signals are
/// absorbed by the coordinator's own guard.
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) -> Result<()> {
    if SIGNAL_HANDLERS_INSTALLED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
            coordinator.shutdown(ShutdownTrigger::Signal).await;
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{general, Journal, MockCaptureFactory, MockChatClient, MockGateway, MockMusic};

    async fn coordinator(journal: &Journal) -> Arc<ShutdownCoordinator> {
        let controller = Arc::new(VoiceSessionController::new(
            Arc::new(MockGateway::new(journal.clone())),
            Arc::new(MockCaptureFactory::new(journal.clone())),
            320_000,
        ));
        controller.join(general()).await;
        Arc::new(ShutdownCoordinator::new(
            controller,
            Arc::new(MockMusic::new(journal.clone())),
            Arc::new(MockChatClient::new(journal.clone())),
        ))
    }

    #[tokio::test]
    async fn test_exit_runs_full_sequence_in_order() {
        let journal = Journal::default();
        let coordinator = coordinator(&journal).await;

        assert!(coordinator.shutdown(ShutdownTrigger::ExitCommand).await);
        coordinator.terminated().await;

        let entries = journal.entries();
        assert_eq!(
            entries[entries.len() - 4..],
            [
                "capture#1 destroy",
                "connection#1 disconnect",
                "music logout",
                "chat release",
            ]
        );
    }

    #[tokio::test]
    async fn test_shutdown_runs_once() {
        let journal = Journal::default();
        let coordinator = coordinator(&journal).await;

        assert!(coordinator.shutdown(ShutdownTrigger::Signal).await);
        assert!(!coordinator.shutdown(ShutdownTrigger::Signal).await);
        assert!(!coordinator.shutdown(ShutdownTrigger::ExitCommand).await);
        assert!(coordinator.is_shutting_down());

        // Let the detached logout/release tasks run
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(journal.count("disconnect"), 1);
        assert_eq!(journal.count("destroy"), 1);
        assert_eq!(journal.count("music logout"), 1);
        assert_eq!(journal.count("chat release"), 1);
    }

    #[tokio::test]
    async fn test_signal_releases_voice_before_terminating() {
        let journal = Journal::default();
        let coordinator = coordinator(&journal).await;

        coordinator.shutdown(ShutdownTrigger::Signal).await;
        coordinator.terminated().await;

        let destroy = journal.position("capture#1 destroy").expect("capture destroyed");
        let disconnect = journal
            .position("connection#1 disconnect")
            .expect("voice disconnected");
        assert!(destroy < disconnect);
    }

    #[tokio::test]
    async fn test_shutdown_with_idle_session() {
        let journal = Journal::default();
        let controller = Arc::new(VoiceSessionController::new(
            Arc::new(MockGateway::new(journal.clone())),
            Arc::new(MockCaptureFactory::new(journal.clone())),
            320_000,
        ));
        let coordinator = ShutdownCoordinator::new(
            controller,
            Arc::new(MockMusic::new(journal.clone())),
            Arc::new(MockChatClient::new(journal.clone())),
        );

        assert!(coordinator.shutdown(ShutdownTrigger::ExitCommand).await);
        assert_eq!(journal.entries(), vec!["music logout", "chat release"]);
    }
}
