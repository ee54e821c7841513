use std::time::Duration;

use base64::Engine;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use plait_core::config::{ExecServerConfig, API_KEY_HEADER};
use plait_kernel::ExecutionResult;

use crate::error::{ClientError, Result};
use crate::sse::SseDecoder;

/// How long the health probe waits before declaring the server absent.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Deserialize)]
pub struct HealthInfo {
    pub status: String,
    pub version: String,
    pub active_sessions: usize,
}

/// Per-chunk output callback: `(stream, text)`.
pub type OnOutput<'a> = &'a mut (dyn FnMut(&str, &str) + Send);

/// Binds one execution session to a server URL, mirroring the local
/// kernel-session surface over HTTP/SSE.
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    session_id: String,
    timeout_secs: u64,
}

impl Client {
    pub fn new(config: &ExecServerConfig, session_id: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| ClientError::ServerUnreachable {
                url: config.url.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: (!config.api_key.is_empty()).then(|| config.api_key.clone()),
            session_id: session_id.into(),
            timeout_secs: config.timeout,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v1{path}", self.base_url)
    }

    fn with_key(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    /// Probe `/health` with a short deadline.
    pub async fn probe(&self) -> Result<HealthInfo> {
        let resp = self
            .http
            .get(self.api("/health"))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| ClientError::ServerUnreachable {
                url: self.base_url.clone(),
                reason: e.to_string(),
            })?;
        let health: HealthInfo = resp.json().await.map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(health)
    }

    /// Create the bound session; an already-existing id is fine.
    pub async fn ensure_session(&self) -> Result<()> {
        let resp = self
            .with_key(self.http.post(self.api("/sessions")))
            .json(&json!({ "session_id": self.session_id }))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        if resp.status() == reqwest::StatusCode::CONFLICT {
            debug!(session_id = %self.session_id, "session already exists");
            return Ok(());
        }
        self.check(resp).await?;
        Ok(())
    }

    pub async fn stop_session(&self) -> Result<()> {
        let resp = self
            .with_key(
                self.http
                    .delete(self.api(&format!("/sessions/{}", self.session_id))),
            )
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.check(resp).await?;
        Ok(())
    }

    /// Execute `code`, routing through the streaming endpoint when a
    /// callback is supplied and the synchronous one otherwise.
    pub async fn execute(
        &self,
        exec_id: &str,
        code: &str,
        on_output: Option<OnOutput<'_>>,
    ) -> Result<ExecutionResult> {
        match on_output {
            None => self.execute_sync(exec_id, code).await,
            Some(cb) => self.execute_streaming(exec_id, code, cb).await,
        }
    }

    async fn execute_sync(&self, exec_id: &str, code: &str) -> Result<ExecutionResult> {
        let resp = self
            .with_key(
                self.http
                    .post(self.api(&format!("/sessions/{}/execute", self.session_id))),
            )
            .json(&json!({ "exec_id": exec_id, "code": code, "stream": false }))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let resp = self.check(resp).await?;
        resp.json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn execute_streaming(
        &self,
        exec_id: &str,
        code: &str,
        on_output: OnOutput<'_>,
    ) -> Result<ExecutionResult> {
        let resp = self
            .with_key(
                self.http
                    .post(self.api(&format!("/sessions/{}/execute", self.session_id))),
            )
            .json(&json!({ "exec_id": exec_id, "code": code, "stream": true }))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let resp = self.check(resp).await?;
        let accepted: Value = resp
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        let stream_url = accepted["stream_url"]
            .as_str()
            .ok_or_else(|| ClientError::Decode("202 body without stream_url".to_string()))?;

        let resp = self
            .with_key(self.http.get(format!("{}{stream_url}", self.base_url)))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let resp = self.check(resp).await?;

        let mut decoder = SseDecoder::new();
        let mut result: Option<ExecutionResult> = None;
        let mut bytes = resp.bytes_stream();
        'stream: while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| self.transport_error(e))?;
            let text = String::from_utf8_lossy(&chunk);
            for event in decoder.push(&text) {
                match event.event.as_str() {
                    "output" => {
                        let frame: Value = serde_json::from_str(&event.data)
                            .map_err(|e| ClientError::Decode(e.to_string()))?;
                        let stream = frame["type"].as_str().unwrap_or("stdout");
                        let text = frame["text"].as_str().unwrap_or_default();
                        on_output(stream, text);
                    }
                    "result" => {
                        result = Some(
                            serde_json::from_str(&event.data)
                                .map_err(|e| ClientError::Decode(e.to_string()))?,
                        );
                    }
                    "done" => break 'stream,
                    other => debug!(event = other, "ignoring SSE event"),
                }
            }
        }

        result.ok_or_else(|| ClientError::Decode("stream ended without a result".to_string()))
    }

    pub async fn register_plugin(
        &self,
        name: &str,
        code: &str,
        config: Map<String, Value>,
    ) -> Result<()> {
        let resp = self
            .with_key(
                self.http
                    .post(self.api(&format!("/sessions/{}/plugins", self.session_id))),
            )
            .json(&json!({ "name": name, "code": code, "config": config }))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.check(resp).await?;
        Ok(())
    }

    pub async fn update_variables(&self, variables: Map<String, Value>) -> Result<()> {
        let resp = self
            .with_key(
                self.http
                    .post(self.api(&format!("/sessions/{}/variables", self.session_id))),
            )
            .json(&json!({ "variables": variables }))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.check(resp).await?;
        Ok(())
    }

    pub async fn upload_file(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        let content = base64::engine::general_purpose::STANDARD.encode(bytes);
        let resp = self
            .with_key(
                self.http
                    .post(self.api(&format!("/sessions/{}/files", self.session_id))),
            )
            .json(&json!({
                "filename": filename,
                "content": content,
                "encoding": "base64"
            }))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.check(resp).await?;
        Ok(())
    }

    pub async fn download_artifact(&self, name: &str) -> Result<Vec<u8>> {
        let resp = self
            .with_key(self.http.get(self.api(&format!(
                "/sessions/{}/artifacts/{name}",
                self.session_id
            ))))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let resp = self.check(resp).await?;
        Ok(resp
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?
            .to_vec())
    }

    /// Map non-2xx responses to structured errors, lifting the body's
    /// `detail` field as the message.
    async fn check(&self, resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ClientError::AuthRequired);
        }
        let detail = resp
            .json::<Value>()
            .await
            .ok()
            .and_then(|v| v["detail"].as_str().map(str::to_string))
            .unwrap_or_else(|| status.to_string());
        Err(ClientError::Api {
            status: status.as_u16(),
            detail,
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> ClientError {
        if e.is_timeout() {
            ClientError::Timeout {
                secs: self.timeout_secs,
            }
        } else {
            ClientError::ServerUnreachable {
                url: self.base_url.clone(),
                reason: e.to_string(),
            }
        }
    }
}
