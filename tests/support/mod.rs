// Shared test doubles for the capture and backend seams.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use visit_scribe::backend::{BackendError, BackendErrorKind, SummaryBackend};
use visit_scribe::capture::{AudioSegment, CaptureDevice, CaptureError, SegmentHandle};

/// One recorded backend interaction, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Health,
    CreateSession,
    UploadChunk { session_id: String, sequence: u64 },
    GenerateQuestions { session_id: String },
    Finalize { session_id: String, last_sequence: Option<u64> },
}

/// Scripted backend double. Records every call; behavior toggles are
/// plain atomics so tests can flip them mid-session.
pub struct MockBackend {
    pub calls: Mutex<Vec<BackendCall>>,
    pub fail_uploads: AtomicBool,
    pub healthy: AtomicBool,
    /// `None` means answer with the default question list
    pub questions_error: Mutex<Option<BackendErrorKind>>,
    pub questions: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail_uploads: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
            questions_error: Mutex::new(None),
            questions: Mutex::new(vec!["Ask about the new dosage".to_string()]),
        })
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn upload_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, BackendCall::UploadChunk { .. }))
            .count()
    }

    pub fn finalize_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, BackendCall::Finalize { .. }))
            .count()
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait::async_trait]
impl SummaryBackend for MockBackend {
    async fn create_session(&self) -> Result<String, BackendError> {
        self.record(BackendCall::CreateSession);
        Ok(format!("sess-{}", uuid::Uuid::new_v4()))
    }

    async fn upload_chunk(
        &self,
        session_id: &str,
        sequence: u64,
        _segment: &SegmentHandle,
    ) -> Result<(), BackendError> {
        self.record(BackendCall::UploadChunk {
            session_id: session_id.to_string(),
            sequence,
        });
        if self.fail_uploads.load(Ordering::SeqCst) {
            Err(BackendError::other("upload rejected"))
        } else {
            Ok(())
        }
    }

    async fn generate_questions(&self, session_id: &str) -> Result<Vec<String>, BackendError> {
        self.record(BackendCall::GenerateQuestions {
            session_id: session_id.to_string(),
        });
        match *self.questions_error.lock().unwrap() {
            Some(kind) => Err(BackendError::new(kind, "scripted failure")),
            None => Ok(self.questions.lock().unwrap().clone()),
        }
    }

    async fn finalize(
        &self,
        session_id: &str,
        last_chunk: Option<&AudioSegment>,
    ) -> Result<(), BackendError> {
        self.record(BackendCall::Finalize {
            session_id: session_id.to_string(),
            last_sequence: last_chunk.map(|s| s.sequence),
        });
        Ok(())
    }

    async fn health(&self) -> Result<(), BackendError> {
        self.record(BackendCall::Health);
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::new(BackendErrorKind::Unavailable, "down"))
        }
    }
}

/// Capture device double producing synthetic segment handles without
/// touching the filesystem.
pub struct MockDevice {
    pub grant_permission: bool,
    pub fail_seal: Arc<AtomicBool>,
    pub fail_close: Arc<AtomicBool>,
    current: Option<(String, u64)>,
    opened: bool,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            grant_permission: true,
            fail_seal: Arc::new(AtomicBool::new(false)),
            fail_close: Arc::new(AtomicBool::new(false)),
            current: None,
            opened: false,
        }
    }

    pub fn denying_permission() -> Self {
        Self {
            grant_permission: false,
            ..Self::new()
        }
    }
}

#[async_trait::async_trait]
impl CaptureDevice for MockDevice {
    async fn request_permission(&mut self) -> Result<bool, CaptureError> {
        Ok(self.grant_permission)
    }

    async fn open(&mut self) -> Result<(), CaptureError> {
        self.opened = true;
        Ok(())
    }

    async fn begin_segment(&mut self, session_id: &str, sequence: u64) -> Result<(), CaptureError> {
        if !self.opened {
            return Err(CaptureError::DeviceUnavailable("not open".into()));
        }
        self.current = Some((session_id.to_string(), sequence));
        Ok(())
    }

    async fn end_segment(&mut self) -> Result<SegmentHandle, CaptureError> {
        let (session_id, sequence) = self.current.take().ok_or(CaptureError::NoActiveSegment)?;
        if self.fail_seal.load(Ordering::SeqCst) {
            return Err(CaptureError::DeviceUnavailable("seal failed".into()));
        }
        Ok(SegmentHandle {
            path: PathBuf::from(format!("/tmp/{}-seg-{:03}.wav", session_id, sequence)),
            sample_count: 16000,
            duration_ms: 1000,
        })
    }

    async fn close(&mut self) -> Result<(), CaptureError> {
        self.opened = false;
        self.current = None;
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(CaptureError::DeviceUnavailable("release failed".into()));
        }
        Ok(())
    }
}

/// Let spawned tasks and internal events drain before asserting.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
