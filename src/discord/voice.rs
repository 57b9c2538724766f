//! Songbird-backed voice connections.
//!
//! The capture subprocess writes s16le PCM; songbird's raw adapter wants interleaved
//! f32. [`PcmSource`] converts on the fly inside songbird's blocking reader.

use crate::audio::format::{s16le_to_f32le, CAPTURE_FORMAT};
use crate::audio::CaptureStream;
use crate::chat::{VoiceChannelRef, VoiceConnection, VoiceGateway};
use crate::controller::ConnectionWatch;
use crate::error::{BridgeError, BridgeResult};
use async_trait::async_trait;
use serenity::all::{ChannelId, GuildId};
use songbird::driver::Bitrate;
use songbird::events::{CoreEvent, Event, EventContext, EventHandler as VoiceEventHandler};
use songbird::input::{Input, RawAdapter};
use songbird::Songbird;
use std::io::{self, Read, Seek, SeekFrom};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use symphonia_core::io::MediaSource;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, info, warn};

/// Bytes pulled from the capture pipe per refill.
const READ_CHUNK: usize = 16 * 1024;

/// Which join attempt owns each guild's call.
///
/// songbird keeps one call per guild, so a newer join moves the same call an older,
/// superseded join produced. Only the newest claimant may register a disconnect watch
/// on it or remove it.
#[derive(Default)]
struct CallOwners {
    owners: Mutex<HashMap<u64, u64>>,
}

impl CallOwners {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, u64>> {
        self.owners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `generation` as the owner unless a newer join already claimed the guild.
    fn claim(&self, guild: u64, generation: u64) {
        let mut owners = self.lock();
        let owner = owners.entry(guild).or_insert(generation);
        *owner = (*owner).max(generation);
    }

    fn owns(&self, guild: u64, generation: u64) -> bool {
        self.lock().get(&guild) == Some(&generation)
    }
}

pub struct SongbirdGateway {
    manager: Arc<Songbird>,
    owners: Arc<CallOwners>,
}

impl SongbirdGateway {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self {
            manager,
            owners: Arc::new(CallOwners::default()),
        }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn join(
        &self,
        channel: &VoiceChannelRef,
        watch: ConnectionWatch,
    ) -> BridgeResult<Box<dyn VoiceConnection>> {
        let guild_id = GuildId::new(channel.guild_id);
        let channel_id = ChannelId::new(channel.channel_id);
        let generation = watch.generation();
        self.owners.claim(channel.guild_id, generation);

        let call = match self.manager.join(guild_id, channel_id).await {
            Ok(call) => call,
            Err(e) => {
                // A half-established call of the newest attempt would otherwise linger
                if self.owners.owns(channel.guild_id, generation) {
                    if let Err(leave) = self.manager.remove(guild_id).await {
                        debug!(guild = %guild_id, error = %leave, "Nothing to clean up after failed join");
                    }
                }
                return Err(BridgeError::Connection(e.to_string()));
            }
        };

        {
            let mut call = call.lock().await;
            if self.owners.owns(channel.guild_id, generation) {
                call.remove_all_global_events();
                call.add_global_event(
                    Event::Core(CoreEvent::DriverDisconnect),
                    DisconnectWatch { watch },
                );
            }
        }

        Ok(Box::new(SongbirdConnection {
            manager: self.manager.clone(),
            owners: self.owners.clone(),
            guild_id,
            generation,
        }))
    }
}

/// Forwards songbird's driver-disconnect event to the session.
struct DisconnectWatch {
    watch: ConnectionWatch,
}

#[async_trait]
impl VoiceEventHandler for DisconnectWatch {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::DriverDisconnect(data) = ctx {
            info!(
                generation = self.watch.generation(),
                reason = ?data.reason,
                "Voice driver disconnected"
            );
            self.watch.connection_lost().await;
        }
        None
    }
}

pub struct SongbirdConnection {
    manager: Arc<Songbird>,
    owners: Arc<CallOwners>,
    guild_id: GuildId,
    generation: u64,
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    async fn play_stream(&mut self, stream: CaptureStream, bitrate: u32) -> BridgeResult<()> {
        let call = self
            .manager
            .get(self.guild_id)
            .ok_or_else(|| BridgeError::Connection("voice call no longer exists".to_string()))?;

        let bits = i32::try_from(bitrate)
            .map_err(|_| BridgeError::InvalidInput(format!("bitrate {} is too large", bitrate)))?;

        let source = PcmSource::new(stream);
        let input: Input = RawAdapter::new(
            source,
            CAPTURE_FORMAT.sample_rate,
            u32::from(CAPTURE_FORMAT.channels),
        )
        .into();

        let mut call = call.lock().await;
        call.set_bitrate(Bitrate::BitsPerSecond(bits));
        call.stop();
        call.play_input(input);
        debug!(guild = %self.guild_id, bitrate, "Playing capture stream");
        Ok(())
    }

    /// Leave the call, unless a newer join has taken it over.
    async fn disconnect(&mut self) -> BridgeResult<()> {
        if !self.owners.owns(self.guild_id.get(), self.generation) {
            debug!(
                guild = %self.guild_id,
                generation = self.generation,
                "Call belongs to a newer join, not removing it"
            );
            return Ok(());
        }

        self.manager
            .remove(self.guild_id)
            .await
            .map_err(|e| BridgeError::Connection(format!("leave failed: {}", e)))
    }
}

/// Capture pipe as a songbird media source, converting s16le to f32le.
struct PcmSource {
    input: Mutex<SyncIoBridge<CaptureStream>>,
    raw: Vec<u8>,
    chunk: Vec<u8>,
    converted: Vec<u8>,
    offset: usize,
}

impl PcmSource {
    /// Must be called inside the tokio runtime; reads block on it.
    fn new(stream: CaptureStream) -> Self {
        Self {
            input: Mutex::new(SyncIoBridge::new(stream)),
            raw: Vec::new(),
            chunk: vec![0; READ_CHUNK],
            converted: Vec::new(),
            offset: 0,
        }
    }

    /// Convert more input. Returns `false` at end of stream.
    fn refill(&mut self) -> io::Result<bool> {
        let input = self
            .input
            .get_mut()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "capture reader poisoned"))?;

        self.converted.clear();
        self.offset = 0;
        while self.converted.is_empty() {
            let n = input.read(&mut self.chunk)?;
            if n == 0 {
                if !self.raw.is_empty() {
                    warn!(bytes = self.raw.len(), "Dropping partial sample at end of capture");
                }
                return Ok(false);
            }
            self.raw.extend_from_slice(&self.chunk[..n]);
            let consumed = s16le_to_f32le(&self.raw, &mut self.converted);
            self.raw.drain(..consumed);
        }
        Ok(true)
    }
}

impl Read for PcmSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.offset >= self.converted.len() && !self.refill()? {
            return Ok(0);
        }
        let available = &self.converted[self.offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        Ok(n)
    }
}

impl Seek for PcmSource {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "live capture cannot seek",
        ))
    }
}

impl MediaSource for PcmSource {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{LittleEndian, ReadBytesExt};
    use std::io::Cursor;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pcm_source_converts_samples() {
        // 0, 16384, -32768 as s16le
        let stream: CaptureStream = Box::new(Cursor::new(vec![0x00, 0x00, 0x00, 0x40, 0x00, 0x80]));
        let mut source = PcmSource::new(stream);

        let samples = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            source.read_to_end(&mut out).unwrap();
            let mut cursor = Cursor::new(out);
            let mut samples = Vec::new();
            while let Ok(sample) = cursor.read_f32::<LittleEndian>() {
                samples.push(sample);
            }
            samples
        })
        .await
        .unwrap();

        assert_eq!(samples, vec![0.0, 0.5, -1.0]);
    }

    #[test]
    fn test_newest_join_owns_the_call() {
        let owners = CallOwners::default();
        owners.claim(1, 2);
        owners.claim(1, 4);
        assert!(owners.owns(1, 4));
        assert!(!owners.owns(1, 2));

        // A superseded join finishing late does not take the call back
        owners.claim(1, 3);
        assert!(owners.owns(1, 4));
        assert!(!owners.owns(1, 3));
    }

    #[test]
    fn test_call_owners_are_per_guild() {
        let owners = CallOwners::default();
        owners.claim(1, 5);
        owners.claim(2, 6);
        assert!(owners.owns(1, 5));
        assert!(owners.owns(2, 6));
        assert!(!owners.owns(3, 5));
    }

    #[test]
    fn test_pcm_source_is_not_seekable() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        let mut source = PcmSource::new(Box::new(tokio::io::empty()));
        assert!(!source.is_seekable());
        assert!(source.seek(SeekFrom::Start(0)).is_err());
    }
}
