use serde::Serialize;

use crate::backend::{BackendError, BackendErrorKind};
use crate::error::SessionError;

/// User-visible outcome of question generation.
///
/// The first three non-`Ready` variants are states, not errors: an empty
/// result, a transcript that is still being processed, and a temporarily
/// unavailable service all leave the session untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QuestionOutcome {
    Ready { questions: Vec<String> },
    NoneAvailable,
    StillProcessing,
    ServiceUnavailable,
}

/// Classify the remote result into the user-visible taxonomy.
pub fn classify_outcome(
    result: Result<Vec<String>, BackendError>,
) -> Result<QuestionOutcome, SessionError> {
    match result {
        Ok(questions) if questions.is_empty() => Ok(QuestionOutcome::NoneAvailable),
        Ok(questions) => Ok(QuestionOutcome::Ready { questions }),
        Err(e) => match e.kind {
            BackendErrorKind::NoTranscript => Ok(QuestionOutcome::StillProcessing),
            BackendErrorKind::Unavailable => Ok(QuestionOutcome::ServiceUnavailable),
            BackendErrorKind::Other => Err(SessionError::Backend(e.message)),
        },
    }
}
