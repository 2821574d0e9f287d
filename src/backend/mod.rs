//! Remote collaborator seam
//!
//! The backend owns session identity, transcript assembly, question
//! generation, and the final summary. This module only defines the client
//! seam; transcription itself happens server-side.

mod http;

pub use http::HttpBackend;

use thiserror::Error;

use crate::capture::{AudioSegment, SegmentHandle};

/// Structured classification of a backend failure.
///
/// The client edge maps transport/status details onto one of these kinds so
/// callers never inspect message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// No transcript fragments exist yet for this session
    NoTranscript,
    /// The service (or a dependency of it) is temporarily unavailable
    Unavailable,
    /// Anything else
    Other,
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Other, message)
    }
}

/// Remote operations the recording pipeline depends on.
#[async_trait::async_trait]
pub trait SummaryBackend: Send + Sync {
    /// Create a recording session and return its externally issued id.
    async fn create_session(&self) -> Result<String, BackendError>;

    /// Ship one sealed segment. No automatic retry: a failure is reported
    /// to the caller and the segment stays failed.
    async fn upload_chunk(
        &self,
        session_id: &str,
        sequence: u64,
        segment: &SegmentHandle,
    ) -> Result<(), BackendError>;

    /// Generate patient questions from the transcript uploaded so far.
    async fn generate_questions(&self, session_id: &str) -> Result<Vec<String>, BackendError>;

    /// Terminal server-side step producing the appointment summary from all
    /// uploaded segments. The client sends only the last chunk reference;
    /// reassembly happens server-side.
    async fn finalize(
        &self,
        session_id: &str,
        last_chunk: Option<&AudioSegment>,
    ) -> Result<(), BackendError>;

    /// Health-style precheck used before operations that require the backend.
    async fn health(&self) -> Result<(), BackendError>;
}
