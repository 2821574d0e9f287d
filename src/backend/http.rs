use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use super::{BackendError, BackendErrorKind, SummaryBackend};
use crate::capture::{AudioSegment, SegmentHandle};

/// HTTP client for the summary backend.
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct QuestionsResponse {
    questions: Vec<String>,
}

#[derive(Debug, Serialize)]
struct FinalizeRequest {
    last_sequence: Option<u64>,
    last_chunk: Option<String>,
}

/// Error body the backend returns alongside non-2xx statuses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| BackendError::other(e.to_string()))?;

        let base_url: String = base_url.into();
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map a non-2xx response onto the structured error taxonomy.
    async fn classify_failure(response: reqwest::Response) -> BackendError {
        let status = response.status();
        let body: Option<ErrorBody> = response.json().await.ok();

        let kind = match body.as_ref().and_then(|b| b.kind.as_deref()) {
            Some("no_transcript") => BackendErrorKind::NoTranscript,
            Some("unavailable") => BackendErrorKind::Unavailable,
            _ if status == StatusCode::SERVICE_UNAVAILABLE => BackendErrorKind::Unavailable,
            _ => BackendErrorKind::Other,
        };

        let message = body
            .and_then(|b| b.message)
            .unwrap_or_else(|| format!("backend returned {}", status));

        BackendError::new(kind, message)
    }

    fn transport_error(e: reqwest::Error) -> BackendError {
        // Connection-level failures read as "service unavailable" to callers.
        if e.is_connect() || e.is_timeout() {
            BackendError::new(BackendErrorKind::Unavailable, e.to_string())
        } else {
            BackendError::other(e.to_string())
        }
    }
}

#[async_trait::async_trait]
impl SummaryBackend for HttpBackend {
    async fn create_session(&self) -> Result<String, BackendError> {
        let response = self
            .client
            .post(self.url("/sessions"))
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(Self::classify_failure(response).await);
        }

        let created: CreateSessionResponse = response
            .json()
            .await
            .map_err(|e| BackendError::other(e.to_string()))?;

        info!("backend issued session id: {}", created.session_id);
        Ok(created.session_id)
    }

    async fn upload_chunk(
        &self,
        session_id: &str,
        sequence: u64,
        segment: &SegmentHandle,
    ) -> Result<(), BackendError> {
        let bytes = tokio::fs::read(&segment.path)
            .await
            .map_err(|e| BackendError::other(format!("failed to read segment: {}", e)))?;

        let response = self
            .client
            .post(self.url(&format!("/sessions/{}/chunks", session_id)))
            .query(&[("sequence", sequence)])
            .header(reqwest::header::CONTENT_TYPE, "audio/wav")
            .body(bytes)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(Self::classify_failure(response).await);
        }

        info!(
            "uploaded chunk {} for session {} ({} samples)",
            sequence, session_id, segment.sample_count
        );
        Ok(())
    }

    async fn generate_questions(&self, session_id: &str) -> Result<Vec<String>, BackendError> {
        let response = self
            .client
            .post(self.url(&format!("/sessions/{}/questions", session_id)))
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(Self::classify_failure(response).await);
        }

        let body: QuestionsResponse = response
            .json()
            .await
            .map_err(|e| BackendError::other(e.to_string()))?;

        Ok(body.questions)
    }

    async fn finalize(
        &self,
        session_id: &str,
        last_chunk: Option<&AudioSegment>,
    ) -> Result<(), BackendError> {
        let request = FinalizeRequest {
            last_sequence: last_chunk.map(|s| s.sequence),
            last_chunk: last_chunk
                .and_then(|s| s.handle.as_ref())
                .map(|h| h.path.to_string_lossy().into_owned()),
        };

        let response = self
            .client
            .post(self.url(&format!("/sessions/{}/finalize", session_id)))
            .json(&request)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(Self::classify_failure(response).await);
        }

        info!("finalize accepted for session {}", session_id);
        Ok(())
    }

    async fn health(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(BackendError::new(
                BackendErrorKind::Unavailable,
                format!("health check returned {}", response.status()),
            ));
        }

        Ok(())
    }
}
