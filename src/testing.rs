//! Recording doubles for the chat platform, the capture subprocess and the music service.
//!
//! Every double writes what happens to it into a shared [`Journal`], so tests can assert
//! on ordering across collaborators ("capture destroyed before disconnect").

use crate::audio::{AudioCapture, CaptureFactory, CaptureStream};
use crate::chat::{ChatClient, TextChannel, VoiceChannelRef, VoiceConnection, VoiceGateway};
use crate::controller::ConnectionWatch;
use crate::error::{BridgeError, BridgeResult};
use crate::music::{MusicCredentials, MusicService};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub fn general() -> VoiceChannelRef {
    VoiceChannelRef {
        guild_id: 1,
        channel_id: 10,
        name: "General".to_string(),
    }
}

pub fn lounge() -> VoiceChannelRef {
    VoiceChannelRef {
        guild_id: 1,
        channel_id: 11,
        name: "Lounge".to_string(),
    }
}

/// Ordered log of everything the doubles saw.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Number of entries containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.entries().iter().filter(|e| e.contains(needle)).count()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    /// Items with `prefix` still open at the end of the journal.
    pub fn live(&self, prefix: &str, open: &str, close: &str) -> usize {
        self.replay(prefix, open, close).0
    }

    /// Largest number of items with `prefix` open at the same time.
    pub fn max_live(&self, prefix: &str, open: &str, close: &str) -> usize {
        self.replay(prefix, open, close).1
    }

    fn replay(&self, prefix: &str, open: &str, close: &str) -> (usize, usize) {
        let mut live = HashSet::new();
        let mut peak = 0;
        for entry in self.entries() {
            let Some((item, action)) = entry.split_once(' ') else {
                continue;
            };
            if !item.starts_with(prefix) {
                continue;
            }
            if action.starts_with(open) {
                live.insert(item.to_string());
            } else if action.starts_with(close) {
                live.remove(item);
            }
            peak = peak.max(live.len());
        }
        (live.len(), peak)
    }
}

pub struct MockConnection {
    id: u64,
    journal: Journal,
}

impl MockConnection {
    pub fn new(id: u64, journal: Journal) -> Self {
        Self { id, journal }
    }
}

#[async_trait]
impl VoiceConnection for MockConnection {
    async fn play_stream(&mut self, _stream: CaptureStream, bitrate: u32) -> BridgeResult<()> {
        self.journal
            .record(format!("connection#{} play bitrate={}", self.id, bitrate));
        Ok(())
    }

    async fn disconnect(&mut self) -> BridgeResult<()> {
        self.journal.record(format!("connection#{} disconnect", self.id));
        Ok(())
    }
}

/// Voice gateway that hands out [`MockConnection`]s.
///
/// `hold_next(n)` parks the next `n` joins until `gate` is notified, to test what
/// happens while a join is in flight.
pub struct MockGateway {
    pub journal: Journal,
    pub joins: AtomicUsize,
    pub waiting: AtomicUsize,
    pub gate: Notify,
    hold: AtomicUsize,
    next_id: AtomicU64,
    fail: Mutex<Option<BridgeError>>,
    watches: Mutex<Vec<ConnectionWatch>>,
}

impl MockGateway {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            joins: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
            gate: Notify::new(),
            hold: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            fail: Mutex::new(None),
            watches: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_next(&self, err: BridgeError) {
        *self.fail.lock().unwrap() = Some(err);
    }

    pub fn hold_next(&self, joins: usize) {
        self.hold.store(joins, Ordering::SeqCst);
    }

    pub fn last_watch(&self) -> Option<ConnectionWatch> {
        self.watches.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl VoiceGateway for MockGateway {
    async fn join(
        &self,
        channel: &VoiceChannelRef,
        watch: ConnectionWatch,
    ) -> BridgeResult<Box<dyn VoiceConnection>> {
        self.joins.fetch_add(1, Ordering::SeqCst);

        let held = self
            .hold
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if held {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }

        if let Some(err) = self.fail.lock().unwrap().take() {
            return Err(err);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.journal
            .record(format!("connection#{} join {}", id, channel.name));
        self.watches.lock().unwrap().push(watch);
        Ok(Box::new(MockConnection::new(id, self.journal.clone())))
    }
}

pub struct MockCapture {
    id: u64,
    journal: Journal,
    stream_taken: bool,
    destroyed: bool,
}

impl MockCapture {
    pub fn new(id: u64, journal: Journal) -> Self {
        Self {
            id,
            journal,
            stream_taken: false,
            destroyed: false,
        }
    }
}

#[async_trait]
impl AudioCapture for MockCapture {
    fn take_stream(&mut self) -> Option<CaptureStream> {
        if self.stream_taken {
            return None;
        }
        self.stream_taken = true;
        Some(Box::new(tokio::io::empty()))
    }

    async fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.journal.record(format!("capture#{} destroy", self.id));
        }
    }
}

pub struct MockCaptureFactory {
    pub journal: Journal,
    pub fail: AtomicBool,
    next_id: AtomicU64,
}

impl MockCaptureFactory {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            fail: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }
}

impl CaptureFactory for MockCaptureFactory {
    fn start(&self) -> BridgeResult<Box<dyn AudioCapture>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BridgeError::Capture(
                "capture device hw:Loopback,1,0 is busy".to_string(),
            ));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.journal.record(format!("capture#{} start", id));
        Ok(Box::new(MockCapture::new(id, self.journal.clone())))
    }
}

/// Text channel collecting everything sent to it.
pub struct MockTextChannel {
    name: String,
    messages: Mutex<Vec<String>>,
}

impl MockTextChannel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextChannel for MockTextChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, text: &str) -> BridgeResult<()> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Music service recording each call as `music <operation> [argument]`.
pub struct MockMusic {
    pub journal: Journal,
    pub fail: AtomicBool,
    pub now_playing: Mutex<String>,
}

impl MockMusic {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            fail: AtomicBool::new(false),
            now_playing: Mutex::new("Daft Punk - One More Time".to_string()),
        }
    }

    fn call(&self, entry: String) -> BridgeResult<()> {
        self.journal.record(entry);
        if self.fail.load(Ordering::SeqCst) {
            return Err(BridgeError::MusicService("player is not running".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MusicService for MockMusic {
    async fn login(&self, credentials: &MusicCredentials) -> BridgeResult<()> {
        self.call(format!("music login {}", credentials.username))
    }

    async fn logout(&self) -> BridgeResult<()> {
        self.call("music logout".to_string())
    }

    async fn play(&self) -> BridgeResult<()> {
        self.call("music play".to_string())
    }

    async fn play_url(&self, url: &str) -> BridgeResult<()> {
        self.call(format!("music play_url {}", url))
    }

    async fn search_and_play(&self, query: &str) -> BridgeResult<()> {
        self.call(format!("music search {}", query))
    }

    async fn pause(&self) -> BridgeResult<()> {
        self.call("music pause".to_string())
    }

    async fn previous(&self) -> BridgeResult<()> {
        self.call("music previous".to_string())
    }

    async fn next(&self) -> BridgeResult<()> {
        self.call("music next".to_string())
    }

    async fn start_radio(&self) -> BridgeResult<()> {
        self.call("music radio".to_string())
    }

    async fn now_playing_info(&self) -> BridgeResult<String> {
        self.call("music now_playing".to_string())?;
        Ok(self.now_playing.lock().unwrap().clone())
    }
}

#[derive(Clone)]
pub struct MockChatClient {
    journal: Journal,
}

impl MockChatClient {
    pub fn new(journal: Journal) -> Self {
        Self { journal }
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn release(&self) -> BridgeResult<()> {
        self.journal.record("chat release");
        Ok(())
    }
}
