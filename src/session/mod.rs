//! Recording session orchestration
//!
//! The [`SessionController`] is the single component the UI layer talks
//! to. It sequences consent, start, segment rotation, question generation,
//! end, and the detached finalization handoff, driven as an event loop
//! with commands in and state snapshots out.

mod controller;
mod finalize;
mod questions;
mod state;
mod store;

pub use controller::{ControllerConfig, SessionController, SessionSnapshot};
pub use finalize::spawn_finalize;
pub use questions::{classify_outcome, QuestionOutcome};
pub use state::{transition, SessionState, StateEvent};
pub use store::{MemorySessionStore, SessionStore};
