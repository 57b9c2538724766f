//! # Audio Module
//!
//! Live audio capture for the voice stream.
//!
//! ## Key Components:
//! - **Capture**: The ffmpeg subprocess that records the input device ([`capture`])
//! - **Format**: The fixed PCM format and sample conversion helpers ([`format`])
//!
//! ## Audio Format:
//! - **Sample Rate**: 48kHz
//! - **Bit Depth**: 16-bit PCM, little-endian signed integers
//! - **Channels**: Stereo (2 channels)

pub mod capture;
pub mod format;

pub use capture::{AudioCapture, AudioCaptureHandle, CaptureConfig, CaptureFactory, CaptureStream, FfmpegCapture};
pub use format::{PcmFormat, SampleFormat, CAPTURE_FORMAT};
