use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::device::{AudioFrame, CaptureConfig, CaptureDevice, CaptureError, SegmentHandle};

/// How many frames can sit in the feed channel between seals.
/// At 100ms frames a 30s segment is ~300 frames.
const FRAME_CHANNEL_CAPACITY: usize = 1024;

/// File-backed capture device writing each segment as a WAV file.
///
/// Audio frames arrive over an mpsc channel from whatever platform capture
/// feed is attached (see [`WavCaptureDevice::frame_sender`]); frames buffer
/// in the channel and are drained into the writer when the segment is
/// sealed.
pub struct WavCaptureDevice {
    config: CaptureConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
    frame_rx: mpsc::Receiver<AudioFrame>,
    opened: bool,
    active: Option<SegmentWriter>,
}

impl WavCaptureDevice {
    pub fn new(config: CaptureConfig) -> Self {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        Self {
            config,
            frame_tx,
            frame_rx,
            opened: false,
            active: None,
        }
    }

    /// Sender the platform capture feed pushes frames into.
    pub fn frame_sender(&self) -> mpsc::Sender<AudioFrame> {
        self.frame_tx.clone()
    }

    fn drain_frames(&mut self) -> Result<(), CaptureError> {
        while let Ok(frame) = self.frame_rx.try_recv() {
            if let Some(segment) = &mut self.active {
                segment.write_frame(&frame)?;
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CaptureDevice for WavCaptureDevice {
    async fn request_permission(&mut self) -> Result<bool, CaptureError> {
        // File-backed capture has no platform permission dialog.
        Ok(true)
    }

    async fn open(&mut self) -> Result<(), CaptureError> {
        fs::create_dir_all(&self.config.output_dir)?;
        self.opened = true;
        info!("capture device opened: {:?}", self.config.output_dir);
        Ok(())
    }

    async fn begin_segment(&mut self, session_id: &str, sequence: u64) -> Result<(), CaptureError> {
        if !self.opened {
            return Err(CaptureError::DeviceUnavailable("device not open".into()));
        }

        let path = self
            .config
            .output_dir
            .join(format!("{}-seg-{:03}.wav", session_id, sequence));

        self.active = Some(SegmentWriter::create(
            path,
            self.config.sample_rate,
            self.config.channels,
        )?);

        Ok(())
    }

    async fn end_segment(&mut self) -> Result<SegmentHandle, CaptureError> {
        self.drain_frames()?;

        let segment = self.active.take().ok_or(CaptureError::NoActiveSegment)?;
        let handle = segment.finish(self.config.sample_rate, self.config.channels)?;

        info!(
            "segment sealed: {:?} ({} samples, ~{}ms)",
            handle.path, handle.sample_count, handle.duration_ms
        );

        Ok(handle)
    }

    async fn close(&mut self) -> Result<(), CaptureError> {
        // A segment still open here means the caller skipped the seal; finish
        // it so no audio is silently dropped.
        if let Some(segment) = self.active.take() {
            warn!("closing device with an open segment; sealing it first");
            segment.finish(self.config.sample_rate, self.config.channels)?;
        }
        self.opened = false;
        Ok(())
    }
}

/// Writes a single segment to disk as a WAV file
struct SegmentWriter {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    path: PathBuf,
    sample_count: usize,
}

impl SegmentWriter {
    fn create(path: PathBuf, sample_rate: u32, channels: u16) -> Result<Self, CaptureError> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(&path, spec)?;

        Ok(Self {
            writer: Some(writer),
            path,
            sample_count: 0,
        })
    }

    fn write_frame(&mut self, frame: &AudioFrame) -> Result<(), CaptureError> {
        if let Some(writer) = &mut self.writer {
            for &sample in &frame.samples {
                writer.write_sample(sample)?;
            }
            self.sample_count += frame.samples.len();
        }
        Ok(())
    }

    fn finish(mut self, sample_rate: u32, channels: u16) -> Result<SegmentHandle, CaptureError> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }

        let frames = self.sample_count as u64 / channels.max(1) as u64;
        Ok(SegmentHandle {
            // `Drop` forbids moving the field out
            path: std::mem::take(&mut self.path),
            sample_count: self.sample_count,
            duration_ms: frames * 1000 / sample_rate.max(1) as u64,
        })
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("failed to finalize WAV writer on drop: {}", e);
            }
        }
    }
}
