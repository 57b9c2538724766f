//! # Audio Capture Handle
//!
//! Wraps one ffmpeg subprocess that records the configured input device and writes
//! raw PCM to its stdout. The handle owns the subprocess for its whole life:
//!
//! 1. **start**: spawn ffmpeg with the fixed output format, keep the stdout pipe
//! 2. **take_stream**: hand the pipe to the voice connection (once)
//! 3. **destroy**: kill and reap the subprocess, drop the pipe
//!
//! The subprocess is also killed when the handle is dropped, so a handle lost on an
//! error path never leaves ffmpeg running.

use crate::audio::format::{PcmFormat, CAPTURE_FORMAT};
use crate::error::{BridgeError, BridgeResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::io::AsyncRead;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

/// Readable raw PCM byte stream produced by a capture subprocess.
pub type CaptureStream = Box<dyn AsyncRead + Send + Unpin>;

/// Capture subprocess configuration.
///
/// ## Fields:
/// - `program`: Capture binary (ffmpeg)
/// - `input_driver`: ffmpeg input format for the device (`alsa`, `pulse`, `avfoundation`)
/// - `device`: Input device identifier (e.g. `hw:Loopback,1,0`); required to start
/// - `format`: Output PCM format, fixed to s16le / 48kHz / stereo
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub program: String,
    pub input_driver: String,
    pub device: Option<String>,
    #[serde(skip)]
    pub format: PcmFormat,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            input_driver: "alsa".to_string(),
            device: None,
            format: CAPTURE_FORMAT,
        }
    }
}

impl CaptureConfig {
    /// The configured device, if it is set to something non-blank.
    pub fn device(&self) -> Option<&str> {
        self.device
            .as_deref()
            .map(str::trim)
            .filter(|device| !device.is_empty())
    }

    /// Full ffmpeg argument list for capturing `device`.
    pub fn args(&self, device: &str) -> Vec<String> {
        let mut args: Vec<String> = [
            "-analyzeduration",
            "0",
            "-loglevel",
            "0",
            "-f",
            self.input_driver.as_str(),
            "-i",
            device,
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect();
        args.extend(self.format.ffmpeg_output_args());
        args.push("pipe:1".to_string());
        args
    }
}

/// A running (or finished) capture subprocess as seen by the session controller.
#[async_trait]
pub trait AudioCapture: Send {
    /// Take the output byte stream. Returns `None` once it has been handed out.
    fn take_stream(&mut self) -> Option<CaptureStream>;

    /// Terminate the subprocess and release its output.
    ///
    /// Idempotent, and safe when the subprocess has already exited on its own.
    async fn destroy(&mut self);
}

/// Creates capture handles for the controller.
pub trait CaptureFactory: Send + Sync {
    fn start(&self) -> BridgeResult<Box<dyn AudioCapture>>;
}

/// ffmpeg-backed capture handle.
pub struct AudioCaptureHandle {
    child: Option<Child>,
    stream: Option<ChildStdout>,
    device: String,
}

impl AudioCaptureHandle {
    /// Spawn the capture subprocess.
    ///
    /// ## Errors:
    /// - **Capture**: the device is unset, the program cannot be spawned, or it has no stdout
    pub fn start(config: &CaptureConfig) -> BridgeResult<Self> {
        let device = config.device().ok_or_else(|| {
            BridgeError::Capture("input device is not configured (set ALSA_DEVICE)".to_string())
        })?;

        let mut child = Command::new(&config.program)
            .args(config.args(device))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BridgeError::Capture(format!("failed to start {}: {}", config.program, e))
            })?;

        let stream = child.stdout.take().ok_or_else(|| {
            BridgeError::Capture(format!("{} has no output stream", config.program))
        })?;

        info!(
            pid = ?child.id(),
            device = %device,
            driver = %config.input_driver,
            bytes_per_second = config.format.bytes_per_second(),
            "Audio capture started"
        );

        Ok(Self {
            child: Some(child),
            stream: Some(stream),
            device: device.to_string(),
        })
    }

    /// Whether the subprocess is still alive.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

#[async_trait]
impl AudioCapture for AudioCaptureHandle {
    fn take_stream(&mut self) -> Option<CaptureStream> {
        self.stream
            .take()
            .map(|stream| Box::new(stream) as CaptureStream)
    }

    async fn destroy(&mut self) {
        self.stream.take();

        let Some(mut child) = self.child.take() else {
            return;
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(device = %self.device, %status, "Capture process had already exited");
            }
            _ => {
                if let Err(e) = child.kill().await {
                    warn!(device = %self.device, error = %e, "Failed to kill capture process");
                } else {
                    info!(device = %self.device, "Audio capture stopped");
                }
            }
        }
    }
}

/// Production factory: one ffmpeg process per stream.
#[derive(Debug, Clone)]
pub struct FfmpegCapture {
    config: CaptureConfig,
}

impl FfmpegCapture {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }
}

impl CaptureFactory for FfmpegCapture {
    fn start(&self) -> BridgeResult<Box<dyn AudioCapture>> {
        Ok(Box::new(AudioCaptureHandle::start(&self.config)?))
    }
}
