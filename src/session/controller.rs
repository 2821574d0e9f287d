use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant, Interval};
use tracing::{error, info, warn};

use super::finalize::spawn_finalize;
use super::questions::{classify_outcome, QuestionOutcome};
use super::state::{transition, SessionState, StateEvent};
use super::store::SessionStore;
use crate::backend::{BackendErrorKind, SummaryBackend};
use crate::capture::{AudioSegment, SegmentHandle, SegmentRecorder, SegmentStatus};
use crate::error::SessionError;

/// Timer and duration settings for a session.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Fixed segment rotation interval
    pub segment_interval: Duration,
    /// Hard cap after which the session is force-ended
    pub max_session_duration: Duration,
    /// How long a transient error banner stays visible
    pub error_dismiss_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            segment_interval: Duration::from_secs(30),
            max_session_duration: Duration::from_secs(30 * 60),
            error_dismiss_delay: Duration::from_secs(6),
        }
    }
}

/// Point-in-time view of the session, published to the UI layer.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub is_recording: bool,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: u64,
    /// One-way latch: true once the first chunk upload succeeds
    pub has_uploaded_segment: bool,
    /// Segment ledger for the current (or just-ended) session
    pub segments: Vec<AudioSegment>,
    /// Transient error banner, auto-dismissed after a short delay
    pub error: Option<String>,
}

impl SessionSnapshot {
    fn initial() -> Self {
        Self {
            state: SessionState::Idle,
            is_recording: false,
            session_id: None,
            started_at: None,
            elapsed_seconds: 0,
            has_uploaded_segment: false,
            segments: Vec::new(),
            error: None,
        }
    }
}

enum Command {
    RequestConsent {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    DeclineConsent {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Start {
        reply: oneshot::Sender<Result<String, SessionError>>,
    },
    Flush {
        reply: oneshot::Sender<Result<Option<SegmentHandle>, SessionError>>,
    },
    GenerateQuestions {
        reply: oneshot::Sender<Result<QuestionOutcome, SessionError>>,
    },
    End {
        reply: oneshot::Sender<Result<Option<SegmentHandle>, SessionError>>,
    },
    Retry {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Status {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// What woke the event loop up.
enum Wake {
    Command(Option<Command>),
    Upload(UploadOutcome),
    Rotation,
    Timeout,
    DismissBanner,
}

/// Outcome of a detached chunk upload, fed back into the event loop.
struct UploadOutcome {
    session_id: String,
    sequence: u64,
    result: Result<(), String>,
}

/// Handle to the session event loop. Clone-cheap; this is the only thing
/// the UI layer talks to.
#[derive(Clone)]
pub struct SessionController {
    cmd_tx: mpsc::Sender<Command>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    store: Arc<dyn SessionStore>,
}

impl SessionController {
    /// Spawn the event loop and return its handle.
    pub fn spawn(
        config: ControllerConfig,
        recorder: SegmentRecorder,
        backend: Arc<dyn SummaryBackend>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (upload_tx, upload_rx) = mpsc::channel(64);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::initial());

        let runner = Runner {
            config,
            recorder,
            backend,
            store: Arc::clone(&store),
            snapshot_tx,
            upload_tx,
            state: SessionState::Idle,
            session_id: None,
            started_at: None,
            has_uploaded: Arc::new(AtomicBool::new(false)),
            segments: Vec::new(),
            error_banner: None,
            rotation: None,
            timeout_at: None,
            dismiss_at: None,
        };

        tokio::spawn(runner.run(cmd_rx, upload_rx));

        Self {
            cmd_tx,
            snapshot_rx,
            store,
        }
    }

    async fn send<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(reply))
            .await
            .map_err(|_| SessionError::ControllerClosed)?;
        rx.await.map_err(|_| SessionError::ControllerClosed)
    }

    /// Move from `Idle` into `AwaitingConsent` (the consent dialog is up).
    pub async fn request_consent(&self) -> Result<(), SessionError> {
        self.send(|reply| Command::RequestConsent { reply }).await?
    }

    /// The user declined consent; return to `Idle`.
    pub async fn decline_consent(&self) -> Result<(), SessionError> {
        self.send(|reply| Command::DeclineConsent { reply }).await?
    }

    /// Consent approved: create the backend session, acquire the
    /// microphone, and begin recording. Returns the backend-issued id.
    pub async fn start_recording(&self) -> Result<String, SessionError> {
        self.send(|reply| Command::Start { reply }).await?
    }

    /// Force an out-of-schedule rotation; the next automatic rotation is a
    /// full interval away. Returns the sealed chunk ref, if one existed.
    pub async fn flush_chunk(&self) -> Result<Option<SegmentHandle>, SessionError> {
        self.send(|reply| Command::Flush { reply }).await?
    }

    /// Generate patient questions, flushing first if no chunk has been
    /// uploaded yet.
    pub async fn generate_questions(&self) -> Result<QuestionOutcome, SessionError> {
        self.send(|reply| Command::GenerateQuestions { reply }).await?
    }

    /// End the session and launch the detached finalization handoff.
    /// Returns the last sealed chunk ref (or `None`).
    pub async fn stop_recording(&self) -> Result<Option<SegmentHandle>, SessionError> {
        self.send(|reply| Command::End { reply }).await?
    }

    /// After an unrecoverable error, go back to the consent step.
    pub async fn retry_after_error(&self) -> Result<(), SessionError> {
        self.send(|reply| Command::Retry { reply }).await?
    }

    /// Fresh snapshot with elapsed time recomputed.
    pub async fn status(&self) -> Result<SessionSnapshot, SessionError> {
        self.send(|reply| Command::Status { reply }).await
    }

    /// Latest published snapshot without a round trip to the loop.
    pub fn latest(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn is_recording(&self) -> bool {
        self.latest().is_recording
    }

    /// Subscribe to snapshot updates.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    /// The next screen has picked up the completed session.
    pub fn acknowledge_completed(&self) {
        self.store.clear_last_completed_session_id();
    }

    pub fn last_completed_session_id(&self) -> Option<String> {
        self.store.last_completed_session_id()
    }
}

struct Runner {
    config: ControllerConfig,
    recorder: SegmentRecorder,
    backend: Arc<dyn SummaryBackend>,
    store: Arc<dyn SessionStore>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    upload_tx: mpsc::Sender<UploadOutcome>,

    state: SessionState,
    session_id: Option<String>,
    /// Monotonic start for elapsed time plus wall-clock start for display
    started_at: Option<(Instant, DateTime<Utc>)>,
    has_uploaded: Arc<AtomicBool>,
    segments: Vec<AudioSegment>,
    error_banner: Option<String>,

    rotation: Option<Interval>,
    timeout_at: Option<Instant>,
    dismiss_at: Option<Instant>,
}

/// Await the next rotation tick, or never if rotation is disarmed.
async fn rotation_tick(rotation: &mut Option<Interval>) {
    match rotation {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Sleep until an optional deadline, or never.
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl Runner {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut upload_rx: mpsc::Receiver<UploadOutcome>,
    ) {
        info!("session controller started");

        loop {
            // The select only resolves *which* event fired; handlers run
            // afterwards so they get the full &mut self.
            let wake = tokio::select! {
                cmd = cmd_rx.recv() => Wake::Command(cmd),
                Some(outcome) = upload_rx.recv() => Wake::Upload(outcome),
                _ = rotation_tick(&mut self.rotation) => Wake::Rotation,
                _ = sleep_until_opt(self.timeout_at) => Wake::Timeout,
                _ = sleep_until_opt(self.dismiss_at) => Wake::DismissBanner,
            };

            match wake {
                // All handles dropped; shut the loop down.
                Wake::Command(None) => break,
                Wake::Command(Some(cmd)) => self.handle_command(cmd).await,
                Wake::Upload(outcome) => self.on_upload_outcome(outcome),
                Wake::Rotation => self.on_rotation_tick().await,
                Wake::Timeout => self.on_auto_timeout().await,
                Wake::DismissBanner => {
                    self.error_banner = None;
                    self.dismiss_at = None;
                    self.emit();
                }
            }
        }

        // Never leave the microphone held on shutdown.
        if self.recorder.is_capturing() {
            if let Err(e) = self.recorder.stop().await {
                warn!("failed to release capture device on shutdown: {}", e);
            }
        }

        info!("session controller stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::RequestConsent { reply } => {
                let result = if self.apply(StateEvent::ConsentRequested) {
                    self.emit();
                    Ok(())
                } else {
                    Err(SessionError::InvalidState(format!("{:?}", self.state)))
                };
                let _ = reply.send(result);
            }
            Command::DeclineConsent { reply } => {
                let result = if self.apply(StateEvent::ConsentDeclined) {
                    self.emit();
                    Ok(())
                } else {
                    Err(SessionError::InvalidState(format!("{:?}", self.state)))
                };
                let _ = reply.send(result);
            }
            Command::Start { reply } => {
                let result = self.handle_start().await;
                let _ = reply.send(result);
            }
            Command::Flush { reply } => {
                let result = self.handle_flush().await;
                let _ = reply.send(result);
            }
            Command::GenerateQuestions { reply } => {
                self.handle_generate_questions(reply).await;
            }
            Command::End { reply } => {
                let result = self.end_session().await;
                let _ = reply.send(result);
            }
            Command::Retry { reply } => {
                let result = if self.apply(StateEvent::RetryRequested) {
                    self.error_banner = None;
                    self.dismiss_at = None;
                    self.emit();
                    Ok(())
                } else {
                    Err(SessionError::InvalidState(format!("{:?}", self.state)))
                };
                let _ = reply.send(result);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    // ------------------------------------------------------------------
    // Start
    // ------------------------------------------------------------------

    async fn handle_start(&mut self) -> Result<String, SessionError> {
        if transition(self.state, StateEvent::ConsentApproved).is_none() {
            return Err(SessionError::InvalidState(format!("{:?}", self.state)));
        }

        // Health precheck: blocks this operation only, never the session.
        if let Err(e) = self.backend.health().await {
            warn!("backend health precheck failed: {}", e);
            return Err(SessionError::ServiceUnavailable);
        }

        // The session id is issued by the backend before capture starts.
        let session_id = self.backend.create_session().await.map_err(|e| match e.kind {
            BackendErrorKind::Unavailable => SessionError::ServiceUnavailable,
            _ => SessionError::Backend(e.message),
        })?;

        if let Err(e) = self.recorder.start(&session_id).await {
            let err = SessionError::from(e);
            match err {
                SessionError::PermissionDenied => {
                    // The user must retry consent.
                    self.apply(StateEvent::ConsentRequested);
                    self.emit();
                }
                _ => {
                    self.apply(StateEvent::CaptureFailed);
                    self.emit();
                }
            }
            return Err(err);
        }

        self.apply(StateEvent::ConsentApproved);
        self.store.set_current_session_id(&session_id);
        self.session_id = Some(session_id.clone());
        self.started_at = Some((Instant::now(), Utc::now()));
        self.has_uploaded = Arc::new(AtomicBool::new(false));
        self.segments = vec![AudioSegment {
            sequence: 0,
            handle: None,
            status: SegmentStatus::Capturing,
        }];
        self.error_banner = None;
        self.dismiss_at = None;

        self.rotation = Some(time::interval_at(
            Instant::now() + self.config.segment_interval,
            self.config.segment_interval,
        ));
        self.timeout_at = Some(Instant::now() + self.config.max_session_duration);

        info!("recording started: session {}", session_id);
        self.emit();
        Ok(session_id)
    }

    // ------------------------------------------------------------------
    // Rotation and flush
    // ------------------------------------------------------------------

    async fn on_rotation_tick(&mut self) {
        if self.state != SessionState::Recording {
            return;
        }
        match self.rotate_active(true).await {
            Ok(Some(segment)) => {
                self.spawn_upload(&segment);
                self.emit();
            }
            Ok(None) => self.emit(),
            Err(e) => error!("rotation ended the session: {}", e),
        }
    }

    async fn handle_flush(&mut self) -> Result<Option<SegmentHandle>, SessionError> {
        if self.state != SessionState::Recording {
            return Err(SessionError::NoActiveSession);
        }

        let sealed = self.rotate_active(true).await?;
        self.reset_rotation();

        if let Some(segment) = &sealed {
            self.spawn_upload(segment);
        }
        self.emit();

        Ok(sealed.and_then(|s| s.handle))
    }

    /// Seal the active segment and restart capture, updating the ledger.
    ///
    /// Seal failures are non-fatal (`Ok(None)`); a failure to begin the
    /// next segment is fatal and tears the session down.
    async fn rotate_active(
        &mut self,
        start_next: bool,
    ) -> Result<Option<AudioSegment>, SessionError> {
        match self.recorder.rotate(start_next).await {
            Ok(Some(mut segment)) => {
                segment.status = SegmentStatus::Uploading;
                self.record_sealed(&segment, start_next);
                Ok(Some(segment))
            }
            Ok(None) => {
                self.record_seal_failure(start_next);
                Ok(None)
            }
            Err(e) => {
                let msg = e.to_string();
                self.fail_session(&msg).await;
                Err(SessionError::CaptureDevice(msg))
            }
        }
    }

    fn reset_rotation(&mut self) {
        // Full interval from the flush moment, not the original schedule.
        self.rotation = Some(time::interval_at(
            Instant::now() + self.config.segment_interval,
            self.config.segment_interval,
        ));
    }

    fn record_sealed(&mut self, segment: &AudioSegment, restarted: bool) {
        if let Some(entry) = self
            .segments
            .iter_mut()
            .find(|s| s.sequence == segment.sequence)
        {
            entry.status = segment.status;
            entry.handle = segment.handle.clone();
        }
        if restarted {
            self.segments.push(AudioSegment {
                sequence: segment.sequence + 1,
                handle: None,
                status: SegmentStatus::Capturing,
            });
        }
    }

    /// A seal attempt produced no segment; its sequence number is consumed.
    fn record_seal_failure(&mut self, restarted: bool) {
        let failed = self
            .segments
            .iter()
            .rposition(|s| s.status == SegmentStatus::Capturing);
        if let Some(idx) = failed {
            self.segments[idx].status = SegmentStatus::Failed;
            let next = self.segments[idx].sequence + 1;
            if restarted {
                self.segments.push(AudioSegment {
                    sequence: next,
                    handle: None,
                    status: SegmentStatus::Capturing,
                });
            }
        }
    }

    fn spawn_upload(&self, segment: &AudioSegment) {
        let (Some(session_id), Some(handle)) = (self.session_id.clone(), segment.handle.clone())
        else {
            return;
        };

        let backend = Arc::clone(&self.backend);
        let latch = Arc::clone(&self.has_uploaded);
        let upload_tx = self.upload_tx.clone();
        let sequence = segment.sequence;

        // Fire-and-forget: failures come back as an internal event and
        // never interrupt capture.
        tokio::spawn(async move {
            let result = match backend.upload_chunk(&session_id, sequence, &handle).await {
                Ok(()) => {
                    latch.store(true, Ordering::SeqCst);
                    Ok(())
                }
                Err(e) => Err(e.to_string()),
            };
            let _ = upload_tx
                .send(UploadOutcome {
                    session_id,
                    sequence,
                    result,
                })
                .await;
        });
    }

    fn on_upload_outcome(&mut self, outcome: UploadOutcome) {
        // Ignore events from a session that already ended.
        if self.session_id.as_deref() != Some(outcome.session_id.as_str()) {
            return;
        }

        if let Some(entry) = self
            .segments
            .iter_mut()
            .find(|s| s.sequence == outcome.sequence)
        {
            entry.status = match outcome.result {
                Ok(()) => SegmentStatus::Uploaded,
                Err(_) => SegmentStatus::Failed,
            };
        }

        if let Err(msg) = outcome.result {
            warn!(
                "chunk {} upload failed (recording continues): {}",
                outcome.sequence, msg
            );
            self.set_banner(SessionError::UploadFailed(msg).to_string());
        }
        self.emit();
    }

    // ------------------------------------------------------------------
    // Question generation
    // ------------------------------------------------------------------

    async fn handle_generate_questions(
        &mut self,
        reply: oneshot::Sender<Result<QuestionOutcome, SessionError>>,
    ) {
        if self.state != SessionState::Recording {
            let _ = reply.send(Err(SessionError::NoActiveSession));
            return;
        }
        let Some(session_id) = self.session_id.clone() else {
            let _ = reply.send(Err(SessionError::NoActiveSession));
            return;
        };

        let backend = Arc::clone(&self.backend);

        // Invariant: at least one chunk must have reached the backend
        // before the remote operation is invoked.
        if self.has_uploaded.load(Ordering::SeqCst) {
            tokio::spawn(async move {
                let result = backend.generate_questions(&session_id).await;
                let _ = reply.send(classify_outcome(result));
            });
            return;
        }

        // Force a flush and make the upload a strict happens-before edge
        // for the remote call.
        let sealed = match self.rotate_active(true).await {
            Ok(sealed) => sealed,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        self.reset_rotation();
        self.emit();

        let Some(segment) = sealed else {
            let _ = reply.send(Err(SessionError::UploadFailed(
                "no segment available to flush".into(),
            )));
            return;
        };
        let Some(handle) = segment.handle.clone() else {
            let _ = reply.send(Err(SessionError::UploadFailed(
                "sealed segment has no media".into(),
            )));
            return;
        };

        let latch = Arc::clone(&self.has_uploaded);
        let upload_tx = self.upload_tx.clone();
        let sequence = segment.sequence;

        tokio::spawn(async move {
            match backend.upload_chunk(&session_id, sequence, &handle).await {
                Ok(()) => {
                    latch.store(true, Ordering::SeqCst);
                    let _ = upload_tx
                        .send(UploadOutcome {
                            session_id: session_id.clone(),
                            sequence,
                            result: Ok(()),
                        })
                        .await;
                    let result = backend.generate_questions(&session_id).await;
                    let _ = reply.send(classify_outcome(result));
                }
                Err(e) => {
                    let _ = upload_tx
                        .send(UploadOutcome {
                            session_id,
                            sequence,
                            result: Err(e.to_string()),
                        })
                        .await;
                    let _ = reply.send(Err(SessionError::UploadFailed(e.to_string())));
                }
            }
        });
    }

    // ------------------------------------------------------------------
    // Ending
    // ------------------------------------------------------------------

    async fn on_auto_timeout(&mut self) {
        // Idempotent stop-if-still-recording: a racing manual end wins and
        // this becomes a no-op.
        if self.state != SessionState::Recording {
            self.timeout_at = None;
            return;
        }
        info!("maximum session duration reached; force-ending session");
        if let Err(e) = self.end_session().await {
            warn!("auto-timeout end failed: {}", e);
        }
    }

    async fn end_session(&mut self) -> Result<Option<SegmentHandle>, SessionError> {
        if !self.apply(StateEvent::StopRequested) {
            return Err(SessionError::NoActiveSession);
        }
        let Some(session_id) = self.session_id.clone() else {
            self.apply(StateEvent::StopFailed);
            self.emit();
            return Err(SessionError::NoActiveSession);
        };

        // Cancel both timers before touching the device, so nothing fires
        // against a half-torn-down session.
        self.rotation = None;
        self.timeout_at = None;
        self.emit();

        match self.recorder.stop().await {
            Ok(last) => {
                if let Some(segment) = &last {
                    let mut sealed = segment.clone();
                    sealed.status = SegmentStatus::Sealed;
                    self.record_sealed(&sealed, false);
                }

                self.apply(StateEvent::StopSucceeded);
                self.emit();

                self.store.set_last_completed_session_id(&session_id);

                // Detached: the UI proceeds without waiting for finalize.
                spawn_finalize(
                    Arc::clone(&self.backend),
                    Arc::clone(&self.store),
                    session_id,
                    last.clone(),
                );

                self.apply(StateEvent::HandoffLaunched);
                self.release_session();
                self.emit();

                Ok(last.and_then(|s| s.handle))
            }
            Err(e) => {
                // Best effort: record the problem and move the user on
                // rather than trapping them on the recording screen.
                warn!("stop failed for session {}: {}", session_id, e);
                self.store.mark_needs_attention(&session_id);

                self.apply(StateEvent::StopFailed);
                self.release_session();
                self.emit();

                Ok(None)
            }
        }
    }

    /// Unrecoverable capture failure mid-session.
    async fn fail_session(&mut self, msg: &str) {
        error!("capture failure, ending session: {}", msg);

        self.rotation = None;
        self.timeout_at = None;

        if let Some(session_id) = &self.session_id {
            self.store.mark_needs_attention(session_id);
        }
        if let Err(e) = self.recorder.stop().await {
            warn!("device release after capture failure: {}", e);
        }

        self.apply(StateEvent::CaptureFailed);
        self.store.clear_current_session_id();
        self.session_id = None;
        self.started_at = None;
        self.set_banner(msg.to_string());
        self.emit();
    }

    fn release_session(&mut self) {
        self.store.clear_current_session_id();
        self.session_id = None;
        self.started_at = None;
        self.error_banner = None;
        self.dismiss_at = None;
    }

    // ------------------------------------------------------------------
    // Bookkeeping
    // ------------------------------------------------------------------

    fn apply(&mut self, event: StateEvent) -> bool {
        match transition(self.state, event) {
            Some(next) => {
                if next != self.state {
                    info!("session state: {:?} -> {:?}", self.state, next);
                }
                self.state = next;
                true
            }
            None => false,
        }
    }

    fn set_banner(&mut self, message: String) {
        self.error_banner = Some(message);
        self.dismiss_at = Some(Instant::now() + self.config.error_dismiss_delay);
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            is_recording: self.state == SessionState::Recording,
            session_id: self.session_id.clone(),
            started_at: self.started_at.map(|(_, wall)| wall),
            elapsed_seconds: self
                .started_at
                .map(|(mono, _)| mono.elapsed().as_secs())
                .unwrap_or(0),
            has_uploaded_segment: self.has_uploaded.load(Ordering::SeqCst),
            segments: self.segments.clone(),
            error: self.error_banner.clone(),
        }
    }

    fn emit(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}
