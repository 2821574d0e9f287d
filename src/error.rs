use thiserror::Error;

use crate::capture::CaptureError;

/// Session-level error taxonomy surfaced to the UI layer.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Fatal to session start; the user must retry consent.
    #[error("microphone permission denied")]
    PermissionDenied,

    /// Device-level failure; fatal when it happens at session start.
    #[error("capture device error: {0}")]
    CaptureDevice(String),

    /// Non-fatal: shown as a transient banner while capture continues.
    #[error("chunk upload failed: {0}")]
    UploadFailed(String),

    /// Raised by the health precheck; blocks one operation, not the session.
    #[error("recording service unavailable")]
    ServiceUnavailable,

    /// Guard rail: an operation was invoked with no current session.
    #[error("no active recording session")]
    NoActiveSession,

    /// Logged and marked only; never blocks navigation.
    #[error("finalize failed: {0}")]
    FinalizeFailed(String),

    /// Unclassified remote failure.
    #[error("backend request failed: {0}")]
    Backend(String),

    /// The requested transition is not valid in the current state.
    #[error("operation not valid in state {0}")]
    InvalidState(String),

    /// The controller task is no longer running.
    #[error("session controller stopped")]
    ControllerClosed,
}

impl From<CaptureError> for SessionError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::PermissionDenied => SessionError::PermissionDenied,
            other => SessionError::CaptureDevice(other.to_string()),
        }
    }
}
