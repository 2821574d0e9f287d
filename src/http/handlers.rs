use super::state::AppState;
use crate::error::SessionError;
use crate::session::{QuestionOutcome, SessionSnapshot};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use tracing::info;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StartRecordingResponse {
    pub session_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct StopRecordingResponse {
    pub status: String,
    /// Local reference to the last sealed chunk, if any
    pub last_chunk: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FlushResponse {
    pub chunk: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(err: SessionError) -> axum::response::Response {
    let status = match &err {
        SessionError::PermissionDenied => StatusCode::FORBIDDEN,
        SessionError::NoActiveSession => StatusCode::NOT_FOUND,
        SessionError::InvalidState(_) => StatusCode::CONFLICT,
        SessionError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::UploadFailed(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /session/consent
/// The consent dialog is up
pub async fn request_consent(State(state): State<AppState>) -> impl IntoResponse {
    match state.controller.request_consent().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /session/consent/decline
pub async fn decline_consent(State(state): State<AppState>) -> impl IntoResponse {
    match state.controller.decline_consent().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /session/start
/// Consent approved: begin recording
pub async fn start_recording(State(state): State<AppState>) -> impl IntoResponse {
    match state.controller.start_recording().await {
        Ok(session_id) => {
            info!("recording started via API: {}", session_id);
            (
                StatusCode::OK,
                Json(StartRecordingResponse {
                    session_id,
                    status: "recording".to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => error_response(e),
    }
}

/// POST /session/stop
/// End the session; finalize runs detached
pub async fn stop_recording(State(state): State<AppState>) -> impl IntoResponse {
    match state.controller.stop_recording().await {
        Ok(last_chunk) => (
            StatusCode::OK,
            Json(StopRecordingResponse {
                status: "stopped".to_string(),
                last_chunk: last_chunk.map(|h| h.path.to_string_lossy().into_owned()),
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /session/flush
/// Force an out-of-schedule segment rotation
pub async fn flush_chunk(State(state): State<AppState>) -> impl IntoResponse {
    match state.controller.flush_chunk().await {
        Ok(chunk) => (
            StatusCode::OK,
            Json(FlushResponse {
                chunk: chunk.map(|h| h.path.to_string_lossy().into_owned()),
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /session/questions
/// Generate patient questions from the transcript so far
pub async fn generate_questions(State(state): State<AppState>) -> impl IntoResponse {
    match state.controller.generate_questions().await {
        Ok(outcome @ QuestionOutcome::ServiceUnavailable) => {
            (StatusCode::SERVICE_UNAVAILABLE, Json(outcome)).into_response()
        }
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /session/retry
/// Leave the error state and return to consent
pub async fn retry_after_error(State(state): State<AppState>) -> impl IntoResponse {
    match state.controller.retry_after_error().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /session/acknowledge
/// The next screen has picked up the completed session
pub async fn acknowledge_completed(State(state): State<AppState>) -> impl IntoResponse {
    state.controller.acknowledge_completed();
    StatusCode::NO_CONTENT.into_response()
}

/// GET /session/status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    match state.controller.status().await {
        Ok(snapshot) => Json::<SessionSnapshot>(snapshot).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
