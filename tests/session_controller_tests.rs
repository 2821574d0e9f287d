// Timed scenarios for the session controller.
//
// All tests run under tokio's paused clock, so the 30-second rotation and
// 30-minute auto-timeout fire instantly and deterministically.

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use support::{settle, BackendCall, MockBackend, MockDevice};
use visit_scribe::backend::{BackendErrorKind, SummaryBackend};
use visit_scribe::capture::{SegmentRecorder, SegmentStatus};
use visit_scribe::error::SessionError;
use visit_scribe::session::{
    ControllerConfig, MemorySessionStore, QuestionOutcome, SessionController, SessionState,
    SessionStore,
};

fn spawn_controller(
    backend: Arc<MockBackend>,
    device: MockDevice,
    config: ControllerConfig,
) -> (SessionController, Arc<MemorySessionStore>) {
    let store = Arc::new(MemorySessionStore::new());
    let dyn_backend: Arc<dyn SummaryBackend> = backend;
    let controller = SessionController::spawn(
        config,
        SegmentRecorder::new(Box::new(device)),
        dyn_backend,
        Arc::clone(&store) as Arc<dyn SessionStore>,
    );
    (controller, store)
}

fn uploads(backend: &MockBackend) -> Vec<u64> {
    backend
        .calls()
        .iter()
        .filter_map(|c| match c {
            BackendCall::UploadChunk { sequence, .. } => Some(*sequence),
            _ => None,
        })
        .collect()
}

async fn sleep(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

// ----------------------------------------------------------------------
// Rotation
// ----------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn segments_rotate_on_the_fixed_interval() {
    let backend = MockBackend::new();
    let (controller, _) =
        spawn_controller(Arc::clone(&backend), MockDevice::new(), ControllerConfig::default());

    let session_id = controller.start_recording().await.unwrap();

    sleep(31).await;
    settle().await;
    assert_eq!(uploads(&backend), vec![0]);

    sleep(30).await;
    settle().await;
    assert_eq!(uploads(&backend), vec![0, 1]);

    let status = controller.status().await.unwrap();
    assert_eq!(status.state, SessionState::Recording);
    assert_eq!(status.session_id.as_deref(), Some(session_id.as_str()));
    assert!(status.has_uploaded_segment);

    // Invariants: contiguous sequences, exactly one segment capturing.
    let sequences: Vec<u64> = status.segments.iter().map(|s| s.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2]);
    let capturing = status
        .segments
        .iter()
        .filter(|s| s.status == SegmentStatus::Capturing)
        .count();
    assert_eq!(capturing, 1);
    assert_eq!(status.segments[0].status, SegmentStatus::Uploaded);
    assert_eq!(status.segments[1].status, SegmentStatus::Uploaded);
}

#[tokio::test(start_paused = true)]
async fn flush_restarts_the_rotation_clock() {
    let backend = MockBackend::new();
    let (controller, _) =
        spawn_controller(Arc::clone(&backend), MockDevice::new(), ControllerConfig::default());

    controller.start_recording().await.unwrap();

    // Automatic rotation at t=30.
    sleep(45).await;
    settle().await;
    assert_eq!(uploads(&backend), vec![0]);

    // Flush at t=45 seals sequence 1 immediately.
    let chunk = controller.flush_chunk().await.unwrap();
    assert!(chunk.is_some());
    settle().await;
    assert_eq!(uploads(&backend), vec![0, 1]);

    // The next automatic rotation is a full interval from the flush
    // moment (t=75), not the originally scheduled t=60.
    sleep(29).await;
    settle().await;
    assert_eq!(uploads(&backend), vec![0, 1], "nothing before t=75");

    sleep(2).await;
    settle().await;
    assert_eq!(uploads(&backend), vec![0, 1, 2]);
}

// ----------------------------------------------------------------------
// Ending
// ----------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn stop_cancels_timers_and_hands_off_the_last_chunk() {
    let backend = MockBackend::new();
    let (controller, store) =
        spawn_controller(Arc::clone(&backend), MockDevice::new(), ControllerConfig::default());

    let session_id = controller.start_recording().await.unwrap();

    // Stop at t=10, before any rotation: the short segment 0 still exists.
    sleep(10).await;
    let last = controller.stop_recording().await.unwrap();
    let last = last.expect("short first segment sealed");
    assert!(last.path.to_string_lossy().contains("seg-000"));

    settle().await;
    let status = controller.status().await.unwrap();
    assert_eq!(status.state, SessionState::Idle);
    assert!(!status.is_recording);

    // The detached handoff uploaded the last chunk and finalized once.
    assert_eq!(uploads(&backend), vec![0]);
    assert_eq!(backend.finalize_count(), 1);
    assert!(backend.calls().contains(&BackendCall::Finalize {
        session_id: session_id.clone(),
        last_sequence: Some(0),
    }));

    // Session context released; completed marker set until acknowledged.
    assert_eq!(store.current_session_id(), None);
    assert_eq!(store.last_completed_session_id(), Some(session_id));
    controller.acknowledge_completed();
    assert_eq!(store.last_completed_session_id(), None);

    // No timer fires after stop.
    sleep(120).await;
    settle().await;
    assert_eq!(uploads(&backend), vec![0]);
    assert_eq!(backend.finalize_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn unattended_session_auto_ends_exactly_once() {
    let backend = MockBackend::new();
    let config = ControllerConfig {
        max_session_duration: Duration::from_secs(30 * 60),
        ..ControllerConfig::default()
    };
    let (controller, _) = spawn_controller(Arc::clone(&backend), MockDevice::new(), config);

    controller.start_recording().await.unwrap();

    sleep(30 * 60 + 1).await;
    settle().await;

    let status = controller.status().await.unwrap();
    assert_eq!(status.state, SessionState::Idle);
    assert_eq!(backend.finalize_count(), 1);

    // A late manual end hits the guard rail instead of finalizing again.
    let result = controller.stop_recording().await;
    assert!(matches!(result, Err(SessionError::NoActiveSession)));
    assert_eq!(backend.finalize_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn manual_end_racing_the_timeout_finalizes_once() {
    let backend = MockBackend::new();
    let config = ControllerConfig {
        max_session_duration: Duration::from_secs(60),
        ..ControllerConfig::default()
    };
    let (controller, _) = spawn_controller(Arc::clone(&backend), MockDevice::new(), config);

    controller.start_recording().await.unwrap();

    // Land exactly on the timeout deadline and race a manual end against
    // it. Whichever wins, stop/finalize must run exactly once.
    sleep(60).await;
    let _ = controller.stop_recording().await;
    settle().await;

    assert_eq!(backend.finalize_count(), 1);
    let status = controller.status().await.unwrap();
    assert_eq!(status.state, SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn stop_failure_still_moves_the_user_forward() {
    let backend = MockBackend::new();
    let device = MockDevice::new();
    let fail_close = Arc::clone(&device.fail_close);
    let (controller, store) =
        spawn_controller(Arc::clone(&backend), device, ControllerConfig::default());

    let session_id = controller.start_recording().await.unwrap();
    sleep(5).await;

    fail_close.store(true, Ordering::SeqCst);
    let last = controller.stop_recording().await.unwrap();
    assert!(last.is_none());

    settle().await;
    let status = controller.status().await.unwrap();
    assert_eq!(status.state, SessionState::Idle, "user is not trapped");
    assert!(store.needs_attention(&session_id));
    assert_eq!(backend.finalize_count(), 0);
}

// ----------------------------------------------------------------------
// Question generation
// ----------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn questions_force_a_flush_before_the_remote_call() {
    let backend = MockBackend::new();
    let (controller, _) =
        spawn_controller(Arc::clone(&backend), MockDevice::new(), ControllerConfig::default());

    controller.start_recording().await.unwrap();
    sleep(5).await;

    // Nothing uploaded yet; the flow must flush and await that upload.
    let outcome = controller.generate_questions().await.unwrap();
    assert_eq!(
        outcome,
        QuestionOutcome::Ready {
            questions: vec!["Ask about the new dosage".to_string()]
        }
    );

    let calls = backend.calls();
    let upload_pos = calls
        .iter()
        .position(|c| matches!(c, BackendCall::UploadChunk { sequence: 0, .. }))
        .expect("forced flush uploaded chunk 0");
    let questions_pos = calls
        .iter()
        .position(|c| matches!(c, BackendCall::GenerateQuestions { .. }))
        .expect("remote op invoked");
    assert!(upload_pos < questions_pos, "upload happens-before questions");

    let status = controller.status().await.unwrap();
    assert!(status.has_uploaded_segment);

    // The forced flush also reset the rotation clock: the originally
    // scheduled t=30 tick is gone, the next seal lands at t=35.
    sleep(26).await;
    settle().await;
    assert_eq!(uploads(&backend), vec![0]);

    sleep(5).await;
    settle().await;
    assert_eq!(uploads(&backend), vec![0, 1]);
}

#[tokio::test(start_paused = true)]
async fn questions_skip_the_flush_once_a_chunk_is_uploaded() {
    let backend = MockBackend::new();
    let (controller, _) =
        spawn_controller(Arc::clone(&backend), MockDevice::new(), ControllerConfig::default());

    controller.start_recording().await.unwrap();
    sleep(31).await;
    settle().await;
    assert_eq!(uploads(&backend), vec![0]);

    let outcome = controller.generate_questions().await.unwrap();
    assert!(matches!(outcome, QuestionOutcome::Ready { .. }));

    // Latch already true: no extra chunk was flushed for the call.
    assert_eq!(uploads(&backend), vec![0]);
}

#[tokio::test(start_paused = true)]
async fn question_outcomes_map_to_user_visible_states() {
    let backend = MockBackend::new();
    let (controller, _) =
        spawn_controller(Arc::clone(&backend), MockDevice::new(), ControllerConfig::default());

    controller.start_recording().await.unwrap();
    sleep(31).await;
    settle().await;

    *backend.questions_error.lock().unwrap() = Some(BackendErrorKind::NoTranscript);
    assert_eq!(
        controller.generate_questions().await.unwrap(),
        QuestionOutcome::StillProcessing
    );

    *backend.questions_error.lock().unwrap() = Some(BackendErrorKind::Unavailable);
    assert_eq!(
        controller.generate_questions().await.unwrap(),
        QuestionOutcome::ServiceUnavailable
    );

    *backend.questions_error.lock().unwrap() = None;
    backend.questions.lock().unwrap().clear();
    assert_eq!(
        controller.generate_questions().await.unwrap(),
        QuestionOutcome::NoneAvailable
    );

    // None of those outcomes ended the session.
    assert!(controller.status().await.unwrap().is_recording);
}

// ----------------------------------------------------------------------
// Failure handling
// ----------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn upload_failure_is_a_transient_banner_not_a_session_error() {
    let backend = MockBackend::new();
    backend.fail_uploads.store(true, Ordering::SeqCst);
    let (controller, _) =
        spawn_controller(Arc::clone(&backend), MockDevice::new(), ControllerConfig::default());

    controller.start_recording().await.unwrap();

    sleep(31).await;
    settle().await;

    let status = controller.status().await.unwrap();
    assert!(status.is_recording, "capture continues through the failure");
    assert!(status.error.is_some());
    assert!(!status.has_uploaded_segment);
    assert_eq!(status.segments[0].status, SegmentStatus::Failed);

    // Banner auto-dismisses; the failed chunk is not re-queued.
    sleep(7).await;
    settle().await;
    let status = controller.status().await.unwrap();
    assert!(status.error.is_none());

    // The next rotation uploads normally and sets the latch.
    backend.fail_uploads.store(false, Ordering::SeqCst);
    sleep(30).await;
    settle().await;
    let status = controller.status().await.unwrap();
    assert!(status.has_uploaded_segment);
    assert_eq!(status.segments[1].status, SegmentStatus::Uploaded);
}

#[tokio::test(start_paused = true)]
async fn seal_failure_consumes_the_sequence_and_recording_continues() {
    let backend = MockBackend::new();
    let device = MockDevice::new();
    let fail_seal = Arc::clone(&device.fail_seal);
    let (controller, _) =
        spawn_controller(Arc::clone(&backend), device, ControllerConfig::default());

    controller.start_recording().await.unwrap();

    // The t=30 seal fails: no chunk produced, nothing uploaded.
    fail_seal.store(true, Ordering::SeqCst);
    sleep(31).await;
    settle().await;
    assert_eq!(uploads(&backend), Vec::<u64>::new());

    let status = controller.status().await.unwrap();
    assert!(status.is_recording, "capture is not torn down");
    assert_eq!(status.segments[0].status, SegmentStatus::Failed);

    // The failed sequence number is consumed, never reused: exactly one
    // segment is capturing and it is sequence 1.
    let capturing: Vec<u64> = status
        .segments
        .iter()
        .filter(|s| s.status == SegmentStatus::Capturing)
        .map(|s| s.sequence)
        .collect();
    assert_eq!(capturing, vec![1]);

    // The next rotation seals and uploads sequence 1 as usual.
    fail_seal.store(false, Ordering::SeqCst);
    sleep(30).await;
    settle().await;
    assert_eq!(uploads(&backend), vec![1]);
    let status = controller.status().await.unwrap();
    assert_eq!(status.segments[1].status, SegmentStatus::Uploaded);
    assert!(status.has_uploaded_segment);
}

#[tokio::test(start_paused = true)]
async fn permission_refusal_returns_to_the_consent_step() {
    let backend = MockBackend::new();
    let (controller, _) = spawn_controller(
        Arc::clone(&backend),
        MockDevice::denying_permission(),
        ControllerConfig::default(),
    );

    let result = controller.start_recording().await;
    assert!(matches!(result, Err(SessionError::PermissionDenied)));

    let status = controller.status().await.unwrap();
    assert_eq!(status.state, SessionState::AwaitingConsent);
    assert!(status.session_id.is_none());
}

#[tokio::test(start_paused = true)]
async fn unavailable_backend_blocks_start_but_nothing_else() {
    let backend = MockBackend::new();
    backend.healthy.store(false, Ordering::SeqCst);
    let (controller, _) =
        spawn_controller(Arc::clone(&backend), MockDevice::new(), ControllerConfig::default());

    let result = controller.start_recording().await;
    assert!(matches!(result, Err(SessionError::ServiceUnavailable)));
    assert_eq!(controller.status().await.unwrap().state, SessionState::Idle);

    // The precheck blocked one operation, not the session: retrying works.
    backend.healthy.store(true, Ordering::SeqCst);
    controller.start_recording().await.unwrap();
    assert!(controller.status().await.unwrap().is_recording);
}

#[tokio::test(start_paused = true)]
async fn operations_without_a_session_hit_the_guard_rail() {
    let backend = MockBackend::new();
    let (controller, _) =
        spawn_controller(Arc::clone(&backend), MockDevice::new(), ControllerConfig::default());

    assert!(matches!(
        controller.flush_chunk().await,
        Err(SessionError::NoActiveSession)
    ));
    assert!(matches!(
        controller.generate_questions().await,
        Err(SessionError::NoActiveSession)
    ));
    assert!(matches!(
        controller.stop_recording().await,
        Err(SessionError::NoActiveSession)
    ));
}

#[tokio::test(start_paused = true)]
async fn consent_can_be_declined_and_reopened() {
    let backend = MockBackend::new();
    let (controller, _) =
        spawn_controller(Arc::clone(&backend), MockDevice::new(), ControllerConfig::default());

    controller.request_consent().await.unwrap();
    assert_eq!(
        controller.status().await.unwrap().state,
        SessionState::AwaitingConsent
    );

    controller.decline_consent().await.unwrap();
    assert_eq!(controller.status().await.unwrap().state, SessionState::Idle);

    // Approving from the consent step starts recording.
    controller.request_consent().await.unwrap();
    controller.start_recording().await.unwrap();
    assert!(controller.is_recording());
}
