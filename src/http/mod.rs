//! HTTP API server for the UI layer
//!
//! This module provides a REST API for driving the recording session:
//! - POST /session/consent - Open the consent step
//! - POST /session/consent/decline - Decline consent
//! - POST /session/start - Start recording (consent approved)
//! - POST /session/stop - End recording; finalize runs detached
//! - POST /session/flush - Force an out-of-schedule rotation
//! - POST /session/questions - Generate patient questions
//! - POST /session/retry - Leave the error state
//! - POST /session/acknowledge - Clear the last-completed marker
//! - GET /session/status - Session snapshot
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
