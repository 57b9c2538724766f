//! # PCM Format
//!
//! The capture subprocess always produces the same raw format, the one Discord voice
//! expects before Opus encoding:
//!
//! - **Sample format**: signed 16-bit little-endian integers
//! - **Sample rate**: 48kHz (48,000 Hz)
//! - **Channels**: Stereo (2 channels, interleaved)
//!
//! The voice library's raw input reads interleaved 32-bit floats, so the sample
//! representation is converted at that boundary. Values are only rescaled, never mixed
//! or resampled.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Raw sample encodings understood by the capture pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    /// Signed 16-bit little-endian
    S16Le,
}

impl SampleFormat {
    /// Name of the format as ffmpeg's `-f` option spells it.
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            SampleFormat::S16Le => "s16le",
        }
    }

    /// Size of one sample of one channel in bytes.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::S16Le => 2,
        }
    }
}

/// Fixed description of the PCM stream produced by the capture subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmFormat {
    pub sample_format: SampleFormat,
    pub sample_rate: u32,
    pub channels: u8,
}

/// The only format the bridge captures and streams.
pub const CAPTURE_FORMAT: PcmFormat = PcmFormat {
    sample_format: SampleFormat::S16Le,
    sample_rate: 48_000,
    channels: 2,
};

impl Default for PcmFormat {
    fn default() -> Self {
        CAPTURE_FORMAT
    }
}

impl PcmFormat {
    /// Bytes in one interleaved frame (one sample for every channel).
    pub fn frame_size(&self) -> usize {
        self.sample_format.bytes_per_sample() * self.channels as usize
    }

    /// Raw byte rate of the stream, logged when a capture starts.
    pub fn bytes_per_second(&self) -> usize {
        self.frame_size() * self.sample_rate as usize
    }

    /// ffmpeg output options that produce this format.
    pub fn ffmpeg_output_args(&self) -> Vec<String> {
        vec![
            "-f".to_string(),
            self.sample_format.ffmpeg_name().to_string(),
            "-ar".to_string(),
            self.sample_rate.to_string(),
            "-ac".to_string(),
            self.channels.to_string(),
        ]
    }
}

/// Convert s16le bytes into f32le bytes, appending to `output`.
///
/// ## Returns:
/// The number of input bytes consumed. A trailing odd byte is left unconsumed so the
/// caller can carry it over to the next read.
///
/// ## Conversion:
/// Scales from the 16-bit integer range [-32768, 32767] to [-1.0, 1.0).
pub fn s16le_to_f32le(input: &[u8], output: &mut Vec<u8>) -> usize {
    let whole = input.len() - input.len() % 2;
    let mut cursor = Cursor::new(&input[..whole]);
    output.reserve(whole * 2);

    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        // Writing into a Vec cannot fail
        let _ = output.write_f32::<LittleEndian>(sample as f32 / 32768.0);
    }

    whole
}
