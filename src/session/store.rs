use std::collections::HashSet;
use std::sync::Mutex;

/// Key-value session context, owned by the controller and passed through
/// explicitly rather than living in a module-level singleton.
///
/// Intentionally not persisted across process restarts: a stale in-flight
/// session must not be silently resumable.
pub trait SessionStore: Send + Sync {
    fn set_current_session_id(&self, id: &str);
    fn current_session_id(&self) -> Option<String>;
    fn clear_current_session_id(&self);

    fn set_last_completed_session_id(&self, id: &str);
    fn last_completed_session_id(&self) -> Option<String>;
    /// Cleared when the next screen acknowledges the handoff.
    fn clear_last_completed_session_id(&self);

    /// Best-effort mark that the appointment record for this session needs
    /// attention (stop or finalize failed).
    fn mark_needs_attention(&self, id: &str);
    fn needs_attention(&self, id: &str) -> bool;
}

#[derive(Default)]
struct Inner {
    current: Option<String>,
    last_completed: Option<String>,
    needs_attention: HashSet<String>,
}

/// In-process store. Every operation is a short non-awaiting critical
/// section, so a std mutex is enough.
#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<Inner>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn set_current_session_id(&self, id: &str) {
        self.lock().current = Some(id.to_string());
    }

    fn current_session_id(&self) -> Option<String> {
        self.lock().current.clone()
    }

    fn clear_current_session_id(&self) {
        self.lock().current = None;
    }

    fn set_last_completed_session_id(&self, id: &str) {
        self.lock().last_completed = Some(id.to_string());
    }

    fn last_completed_session_id(&self) -> Option<String> {
        self.lock().last_completed.clone()
    }

    fn clear_last_completed_session_id(&self) {
        self.lock().last_completed = None;
    }

    fn mark_needs_attention(&self, id: &str) {
        self.lock().needs_attention.insert(id.to_string());
    }

    fn needs_attention(&self, id: &str) -> bool {
        self.lock().needs_attention.contains(id)
    }
}
