use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::store::SessionStore;
use crate::backend::SummaryBackend;
use crate::capture::AudioSegment;

/// Launch the detached finalization handoff.
///
/// The foreground flow never awaits this task: the user has already been
/// navigated on by the time it runs. The last sealed segment is uploaded
/// best-effort, then finalize is called once. Failures are logged and the
/// appointment record is marked as needing attention; nothing resurfaces
/// to a screen the user has left.
pub fn spawn_finalize(
    backend: Arc<dyn SummaryBackend>,
    store: Arc<dyn SessionStore>,
    session_id: String,
    last_segment: Option<AudioSegment>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Some(segment) = &last_segment {
            if let Some(handle) = &segment.handle {
                if let Err(e) = backend
                    .upload_chunk(&session_id, segment.sequence, handle)
                    .await
                {
                    // The backend can still summarize from earlier chunks.
                    warn!(
                        "last chunk upload failed for session {}: {}",
                        session_id, e
                    );
                }
            }
        }

        match backend.finalize(&session_id, last_segment.as_ref()).await {
            Ok(()) => info!("session {} finalized", session_id),
            Err(e) => {
                error!("finalize failed for session {}: {}", session_id, e);
                store.mark_needs_attention(&session_id);
            }
        }
    })
}
