//! HTTP/JSON implementation of [`SessionApi`] on top of reqwest.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{Instrument, debug, debug_span, warn};
use uuid::Uuid;

use super::manifest::VisualizationManifest;
use super::types::{ChatReply, ReplyBody, SessionId, SkipOutcome};
use super::{SessionApi, validate_message, validate_session_path};
use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::workflow::{SessionState, Stage};

// ── Wire payloads ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StartResponse {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct ListSessionsResponse {
    #[serde(default)]
    sessions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    response: serde_json::Value,
    #[serde(default)]
    stage_change: bool,
    #[serde(default)]
    next_stage: Option<String>,
    #[serde(default)]
    current_stage: Option<String>,
    #[serde(default)]
    stage_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SkipResponse {
    #[serde(default)]
    previous_stage: Option<String>,
    current_stage: String,
    #[serde(default)]
    stage_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VisualizeResponse {
    #[serde(default)]
    visualizations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct VisualizationFilesResponse {
    #[serde(default)]
    files: VisualizationManifest,
}

// ── Client ──────────────────────────────────────────────────────────────

/// Workflow API client over HTTP.
pub struct HttpSessionClient {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<SecretString>,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpSessionClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ApiError::Transport(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.get(self.api_url(path)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.post(self.api_url(path)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    /// Send a request built by `build`, retrying transport failures when
    /// `idempotent`. Returns the raw status and body.
    async fn execute<F>(
        &self,
        endpoint: &'static str,
        idempotent: bool,
        build: F,
    ) -> Result<(StatusCode, String), ApiError>
    where
        F: Fn() -> RequestBuilder,
    {
        let span = debug_span!("api", endpoint, request_id = %Uuid::new_v4());
        async {
            let attempts = if idempotent { self.max_retries + 1 } else { 1 };
            let mut attempt = 0;
            loop {
                attempt += 1;
                match send_once(build()).await {
                    Ok(result) => {
                        debug!(status = %result.0, attempt, "Response received");
                        return Ok(result);
                    }
                    Err(e) if attempt < attempts => {
                        warn!(error = %e, attempt, "Request failed; retrying");
                        tokio::time::sleep(self.retry_delay).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn call<T, F>(&self, endpoint: &'static str, idempotent: bool, build: F) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let (status, body) = self.execute(endpoint, idempotent, build).await?;
        decode(status, &body)
    }
}

async fn send_once(request: RequestBuilder) -> Result<(StatusCode, String), ApiError> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;
    Ok((status, body))
}

/// Classify a raw response.
///
/// An `error` field wins regardless of status; a non-success status without
/// one is reported as `Remote("HTTP <status>")`; a success body that does not
/// match the expected shape is a transport-level malformed response.
pub(crate) fn classify(status: StatusCode, body: &str) -> Result<serde_json::Value, ApiError> {
    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            if status.is_success() {
                return Err(ApiError::Transport(format!("malformed response: {e}")));
            }
            return Err(ApiError::Remote(format!("HTTP {status}")));
        }
    };

    if let Some(err) = value.get("error").filter(|e| !e.is_null()) {
        let message = err.as_str().map(str::to_string).unwrap_or_else(|| err.to_string());
        return Err(ApiError::Remote(message));
    }

    if !status.is_success() {
        return Err(ApiError::Remote(format!("HTTP {status}")));
    }

    Ok(value)
}

fn decode<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<T, ApiError> {
    let value = classify(status, body)?;
    serde_json::from_value(value).map_err(|e| ApiError::Transport(format!("malformed response: {e}")))
}

fn resolve_optional_stage(field: &str, value: Option<&str>) -> Option<Stage> {
    let raw = value?;
    let stage = Stage::parse(raw);
    if stage.is_none() {
        warn!(field, stage = %raw, "Ignoring unknown stage in reply");
    }
    stage
}

#[async_trait]
impl SessionApi for HttpSessionClient {
    async fn start(&self) -> Result<SessionId, ApiError> {
        let resp: StartResponse = self.call("start", true, || self.post("/api/start")).await?;
        Ok(SessionId::new(resp.session_id))
    }

    async fn resume(&self, session_path: &str) -> Result<SessionId, ApiError> {
        let path = validate_session_path(session_path)?;
        let body = serde_json::json!({ "session_path": path });
        let resp: StartResponse = self
            .call("resume", true, || self.post("/api/resume").json(&body))
            .await?;
        Ok(SessionId::new(resp.session_id))
    }

    async fn list_sessions(&self) -> Result<Vec<String>, ApiError> {
        let resp: ListSessionsResponse = self
            .call("list_sessions", true, || self.get("/api/list_sessions"))
            .await?;
        Ok(resp.sessions)
    }

    async fn send_chat(&self, session_id: &SessionId, message: &str) -> Result<ChatReply, ApiError> {
        let message = validate_message(message)?;
        let body = serde_json::json!({
            "session_id": session_id.as_str(),
            "message": message,
        });
        let resp: ChatResponse = self
            .call("chat", false, || self.post("/api/chat").json(&body))
            .await?;

        Ok(ChatReply {
            body: ReplyBody::from_value(resp.response),
            stage_change: resp.stage_change,
            next_stage: resolve_optional_stage("next_stage", resp.next_stage.as_deref()),
            current_stage: resolve_optional_stage("current_stage", resp.current_stage.as_deref()),
            stage_description: resp.stage_description,
        })
    }

    async fn skip_stage(&self, session_id: &SessionId) -> Result<SkipOutcome, ApiError> {
        let body = serde_json::json!({ "session_id": session_id.as_str() });
        let resp: SkipResponse = self
            .call("skip_stage", true, || self.post("/api/skip_stage").json(&body))
            .await?;

        let current_stage =
            Stage::parse(&resp.current_stage).ok_or(ApiError::Unresolvable(resp.current_stage))?;

        Ok(SkipOutcome {
            previous_stage: resolve_optional_stage("previous_stage", resp.previous_stage.as_deref()),
            current_stage,
            stage_description: resp.stage_description.unwrap_or_default(),
        })
    }

    async fn fetch_state(&self, session_id: &SessionId) -> Result<SessionState, ApiError> {
        self.call("state", true, || {
            self.get("/api/state").query(&[("session_id", session_id.as_str())])
        })
        .await
    }

    async fn fetch_visualization_manifest(&self, session_id: &SessionId) -> Result<Vec<String>, ApiError> {
        let resp: VisualizeResponse = self
            .call("visualize", true, || {
                self.get("/api/visualize").query(&[("session_id", session_id.as_str())])
            })
            .await?;
        Ok(resp.visualizations)
    }

    async fn check_visualization_files(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<VisualizationManifest>, ApiError> {
        let (status, body) = self
            .execute("check_visualization_files", true, || {
                self.get("/api/check_visualization_files")
                    .query(&[("session_id", session_id.as_str())])
            })
            .await?;

        if status == StatusCode::NOT_FOUND || status == StatusCode::METHOD_NOT_ALLOWED {
            debug!(%status, "Typed visualization manifest not offered by server");
            return Ok(None);
        }

        let resp: VisualizationFilesResponse = decode(status, &body)?;
        Ok(Some(resp.files))
    }

    fn asset_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }
}
