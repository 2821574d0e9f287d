use serde::Serialize;

/// Top-level session lifecycle.
///
/// `Idle` and `Error` are the only states without an active microphone
/// hold. `Finalizing` is advisory: the controller enters it when stop
/// succeeds and leaves it as soon as the detached handoff is launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    AwaitingConsent,
    Recording,
    Ending,
    Finalizing,
    Error,
}

/// Inputs that move the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    ConsentRequested,
    ConsentApproved,
    ConsentDeclined,
    /// Manual end or auto-timeout
    StopRequested,
    StopSucceeded,
    StopFailed,
    /// The detached finalize task has been spawned
    HandoffLaunched,
    /// Unrecoverable capture failure
    CaptureFailed,
    RetryRequested,
}

/// Pure transition function. Returns `None` for inputs that are not valid
/// in the given state; callers treat that as a guard-rail, not a panic.
pub fn transition(state: SessionState, event: StateEvent) -> Option<SessionState> {
    use SessionState::*;
    use StateEvent::*;

    match (state, event) {
        (Idle, ConsentRequested) => Some(AwaitingConsent),
        (Idle | AwaitingConsent, ConsentApproved) => Some(Recording),
        (AwaitingConsent, ConsentDeclined) => Some(Idle),
        (Recording, StopRequested) => Some(Ending),
        (Ending, StopSucceeded) => Some(Finalizing),
        (Ending, StopFailed) => Some(Idle),
        (Finalizing, HandoffLaunched) => Some(Idle),
        (_, CaptureFailed) => Some(Error),
        (Error, RetryRequested) => Some(AwaitingConsent),
        _ => None,
    }
}
