//! VLM client abstraction
//!
//! The subconscious loop and the fallback path (C9) both need "ask a
//! vision-language model something"; both go through this trait so tests
//! and the CLI can swap in a [`MockVlmClient`] without touching the real
//! network stack.

use async_trait::async_trait;

/// One request to the VLM: an optional image plus a text prompt. The
/// subconscious loop always supplies an image; the fallback query path
/// may be text-only (clarifying a query against accumulated context).
#[derive(Debug, Clone)]
pub struct VlmRequest {
    pub prompt: String,
    pub image_jpeg: Option<Vec<u8>>,
    /// System-level instructions, composed by the caller — for the
    /// fallback path this carries the current whiteboard state (task
    /// display name, step id, step title, tools needed) alongside the
    /// fallback prompt hygiene instructions (spec.md §4.9).
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VlmResponse {
    pub text: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum VlmError {
    #[error("VLM request timed out")]
    Timeout,
    #[error("VLM transport error: {0}")]
    Transport(String),
    #[error("VLM returned a non-success status: {0}")]
    BadStatus(u16),
}

#[async_trait]
pub trait VlmClient: Send + Sync {
    async fn complete(&self, request: VlmRequest) -> Result<VlmResponse, VlmError>;
}

/// Production client: a vision-language model behind an HTTP API
/// (OpenAI-compatible chat-completions shape), reached via `reqwest`.
pub struct HttpVlmClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpVlmClient {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: std::time::Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl VlmClient for HttpVlmClient {
    async fn complete(&self, request: VlmRequest) -> Result<VlmResponse, VlmError> {
        use base64::Engine;

        let mut content = vec![serde_json::json!({"type": "text", "text": request.prompt})];
        if let Some(image) = &request.image_jpeg {
            let encoded = base64::engine::general_purpose::STANDARD.encode(image);
            content.push(serde_json::json!({
                "type": "image_url",
                "image_url": { "url": format!("data:image/jpeg;base64,{encoded}") }
            }));
        }

        let mut messages = Vec::new();
        if let Some(system_prompt) = &request.system_prompt {
            messages.push(serde_json::json!({ "role": "system", "content": system_prompt }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": content }));

        let body = serde_json::json!({ "messages": messages });

        let mut req = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                VlmError::Timeout
            } else {
                VlmError::Transport(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(VlmError::BadStatus(response.status().as_u16()));
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| VlmError::Transport(e.to_string()))?;

        let text = parsed["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        Ok(VlmResponse { text })
    }
}

/// Deterministic stand-in for tests and local demos: echoes a canned
/// response (or simulates a failure) without any network I/O.
pub struct MockVlmClient {
    pub fixed_response: String,
    pub fail: bool,
}

impl MockVlmClient {
    pub fn responding(text: impl Into<String>) -> Self {
        Self {
            fixed_response: text.into(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fixed_response: String::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl VlmClient for MockVlmClient {
    async fn complete(&self, _request: VlmRequest) -> Result<VlmResponse, VlmError> {
        if self.fail {
            return Err(VlmError::Transport("mock failure".to_string()));
        }
        Ok(VlmResponse {
            text: self.fixed_response.clone(),
        })
    }
}
