pub mod backend;
pub mod capture;
pub mod config;
pub mod error;
pub mod http;
pub mod session;

pub use backend::{BackendError, BackendErrorKind, HttpBackend, SummaryBackend};
pub use capture::{
    AudioFrame, AudioSegment, CaptureConfig, CaptureDevice, CaptureError, SegmentHandle,
    SegmentRecorder, SegmentStatus, WavCaptureDevice,
};
pub use config::Config;
pub use error::SessionError;
pub use http::{create_router, AppState};
pub use session::{
    ControllerConfig, MemorySessionStore, QuestionOutcome, SessionController, SessionSnapshot,
    SessionState, SessionStore,
};
