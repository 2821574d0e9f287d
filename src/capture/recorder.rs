use serde::Serialize;
use tracing::{info, warn};

use super::device::{CaptureDevice, CaptureError, SegmentHandle};

/// Lifecycle of one audio segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    Capturing,
    Sealed,
    Uploading,
    Uploaded,
    Failed,
}

/// One fixed-duration slice of captured audio.
#[derive(Debug, Clone, Serialize)]
pub struct AudioSegment {
    /// Monotonically increasing within a session; no gaps while recording
    pub sequence: u64,
    /// Sealed media reference; `None` until the segment is sealed
    pub handle: Option<SegmentHandle>,
    pub status: SegmentStatus,
}

/// Owns the capture device and produces sealed segments on demand.
///
/// The rotation *timer* lives in the session controller; this type is the
/// seal-and-restart core it drives. While recording, exactly one segment is
/// capturing at any time: `rotate` seals the active segment and begins the
/// next one before returning, so no caller can observe zero or two active
/// segments.
pub struct SegmentRecorder {
    device: Box<dyn CaptureDevice>,
    session_id: Option<String>,
    /// Sequence of the currently capturing segment, if any
    active: Option<u64>,
    next_sequence: u64,
}

impl SegmentRecorder {
    pub fn new(device: Box<dyn CaptureDevice>) -> Self {
        Self {
            device,
            session_id: None,
            active: None,
            next_sequence: 0,
        }
    }

    /// Whether a segment is currently capturing.
    pub fn is_capturing(&self) -> bool {
        self.active.is_some()
    }

    /// Request permission, acquire the device, and begin segment 0.
    ///
    /// A refusal or device failure here is fatal to the session and is
    /// propagated to the caller.
    pub async fn start(&mut self, session_id: &str) -> Result<(), CaptureError> {
        if !self.device.request_permission().await? {
            return Err(CaptureError::PermissionDenied);
        }

        self.device.open().await?;

        self.session_id = Some(session_id.to_string());
        self.next_sequence = 0;
        self.device.begin_segment(session_id, 0).await?;
        self.active = Some(0);
        self.next_sequence = 1;

        info!("segment recorder started: session {}", session_id);
        Ok(())
    }

    /// Seal the active segment and hand it back; if `start_next`, begin the
    /// next segment before returning.
    ///
    /// Reentrant-safe: with no segment capturing this is a no-op returning
    /// `None`. A device failure while sealing is logged and treated as "no
    /// segment produced"; capture is not torn down, and the failed sequence
    /// number is consumed, never reused.
    pub async fn rotate(&mut self, start_next: bool) -> Result<Option<AudioSegment>, CaptureError> {
        let Some(sequence) = self.active.take() else {
            return Ok(None);
        };

        let sealed = match self.device.end_segment().await {
            Ok(handle) => Some(AudioSegment {
                sequence,
                handle: Some(handle),
                status: SegmentStatus::Sealed,
            }),
            Err(e) => {
                warn!("failed to seal segment {}: {}", sequence, e);
                None
            }
        };

        if start_next {
            let session_id = self
                .session_id
                .clone()
                .ok_or(CaptureError::NoActiveSegment)?;
            let next = self.next_sequence;
            self.device.begin_segment(&session_id, next).await?;
            self.active = Some(next);
            self.next_sequence = next + 1;
        }

        Ok(sealed)
    }

    /// Seal without restarting, release the device, and return the last
    /// sealed segment (or `None` if nothing was ever captured).
    ///
    /// The device is released even when sealing fails.
    pub async fn stop(&mut self) -> Result<Option<AudioSegment>, CaptureError> {
        let sealed = self.rotate(false).await;

        let closed = self.device.close().await;
        self.session_id = None;

        let sealed = sealed?;
        closed?;

        info!(
            "segment recorder stopped (last segment: {:?})",
            sealed.as_ref().map(|s| s.sequence)
        );
        Ok(sealed)
    }
}
