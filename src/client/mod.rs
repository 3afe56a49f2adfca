//! Workflow API client.
//!
//! [`SessionApi`] is the seam the rest of the crate talks to;
//! [`HttpSessionClient`] implements it over HTTP/JSON. Every call returns a
//! tagged [`ApiError`] instead of panicking or bubbling transport types.

pub mod http;
pub mod manifest;
pub mod types;

pub use http::HttpSessionClient;
pub use manifest::VisualizationManifest;
pub use types::{ChatReply, ReplyBody, SessionId, SkipOutcome};

use async_trait::async_trait;

use crate::error::ApiError;
use crate::workflow::SessionState;

/// Operations offered by the workflow server.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Create a new session.
    async fn start(&self) -> Result<SessionId, ApiError>;

    /// Reopen a stored session by its server-side path.
    async fn resume(&self, session_path: &str) -> Result<SessionId, ApiError>;

    /// Paths of stored sessions that can be resumed.
    async fn list_sessions(&self) -> Result<Vec<String>, ApiError>;

    /// Send one user message. Delivered at most once: implementations must
    /// not retry this call on their own.
    async fn send_chat(&self, session_id: &SessionId, message: &str) -> Result<ChatReply, ApiError>;

    /// Ask the server to move to the next stage.
    async fn skip_stage(&self, session_id: &SessionId) -> Result<SkipOutcome, ApiError>;

    /// Fetch the full state snapshot.
    async fn fetch_state(&self, session_id: &SessionId) -> Result<SessionState, ApiError>;

    /// Flat list of visualization image paths.
    async fn fetch_visualization_manifest(&self, session_id: &SessionId) -> Result<Vec<String>, ApiError>;

    /// Typed visualization manifest, `Ok(None)` when the server lacks the endpoint.
    async fn check_visualization_files(
        &self,
        _session_id: &SessionId,
    ) -> Result<Option<VisualizationManifest>, ApiError> {
        Ok(None)
    }

    /// Turn a server-relative asset path into something a renderer can load.
    fn asset_url(&self, path: &str) -> String {
        path.to_string()
    }
}

/// Reject blank session paths before any request is made.
pub fn validate_session_path(path: &str) -> Result<&str, ApiError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(ApiError::InvalidInput("session path is empty".to_string()));
    }
    Ok(trimmed)
}

/// Reject blank chat messages before any request is made.
pub fn validate_message(message: &str) -> Result<&str, ApiError> {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return Err(ApiError::InvalidInput("message is empty".to_string()));
    }
    Ok(trimmed)
}
