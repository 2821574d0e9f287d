use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

/// Opaque reference to one sealed segment of captured audio.
///
/// The file name carries the session id and sequence number; nothing else
/// about the on-disk format is part of the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentHandle {
    /// Local file holding the sealed audio
    pub path: PathBuf,
    /// Number of samples written into this segment
    pub sample_count: usize,
    /// Approximate captured duration in milliseconds
    pub duration_ms: u64,
}

/// Configuration for a capture device
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Directory where sealed segment files are written
    pub output_dir: PathBuf,
    /// Sample rate in Hz (16kHz is what the transcription service expects)
    pub sample_rate: u32,
    /// Number of channels (1 = mono)
    pub channels: u16,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("segments"),
            sample_rate: 16000,
            channels: 1,
        }
    }
}

/// Errors produced by a capture device.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("no segment is currently capturing")]
    NoActiveSegment,

    #[error("segment I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("segment encoding error: {0}")]
    Encode(#[from] hound::Error),
}

/// Capture primitive seam.
///
/// The microphone is a hard single-owner resource: exactly one device
/// instance holds it, and exactly one segment is capturing at a time
/// between `begin_segment` and `end_segment`.
#[async_trait::async_trait]
pub trait CaptureDevice: Send {
    /// Ask the platform for microphone permission.
    async fn request_permission(&mut self) -> Result<bool, CaptureError>;

    /// Acquire the capture hardware. Must be called before the first segment.
    async fn open(&mut self) -> Result<(), CaptureError>;

    /// Begin capturing a new segment for the given session and sequence.
    async fn begin_segment(&mut self, session_id: &str, sequence: u64) -> Result<(), CaptureError>;

    /// Stop the current segment and return a reference to the sealed audio.
    async fn end_segment(&mut self) -> Result<SegmentHandle, CaptureError>;

    /// Release the capture hardware.
    async fn close(&mut self) -> Result<(), CaptureError>;
}
