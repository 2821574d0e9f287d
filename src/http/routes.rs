use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Consent flow
        .route("/session/consent", post(handlers::request_consent))
        .route(
            "/session/consent/decline",
            post(handlers::decline_consent),
        )
        // Recording control
        .route("/session/start", post(handlers::start_recording))
        .route("/session/stop", post(handlers::stop_recording))
        .route("/session/flush", post(handlers::flush_chunk))
        .route("/session/questions", post(handlers::generate_questions))
        .route("/session/retry", post(handlers::retry_after_error))
        .route(
            "/session/acknowledge",
            post(handlers::acknowledge_completed),
        )
        // Session queries
        .route("/session/status", get(handlers::get_status))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
