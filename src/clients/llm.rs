//! Chat-completion client (OpenAI API) with streaming support.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT_SECS: u64 = 120;
const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 1000;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid API key")]
    Unauthorized,

    #[error("rate limited")]
    RateLimited,

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("unexpected response status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Timeout
                | LlmError::Connection(_)
                | LlmError::Network(_)
                | LlmError::RateLimited
                | LlmError::Server { .. }
        )
    }
}

/// One chat completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the API to constrain output to a JSON object.
    pub json_only: bool,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            model: model.into(),
            temperature: 0.3,
            max_tokens: 4000,
            json_only: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn json_only(mut self) -> Self {
        self.json_only = true;
        self
    }
}

/// One streamed delta; `done` marks the end-of-stream sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionChunk {
    pub delta: String,
    pub done: bool,
}

impl CompletionChunk {
    pub fn delta(text: impl Into<String>) -> Self {
        Self { delta: text.into(), done: false }
    }

    pub fn done() -> Self {
        Self { delta: String::new(), done: true }
    }
}

/// A stream of completion chunks.
pub struct CompletionStream {
    inner: BoxStream<'static, Result<CompletionChunk, LlmError>>,
}

impl CompletionStream {
    pub fn new(inner: BoxStream<'static, Result<CompletionChunk, LlmError>>) -> Self {
        Self { inner }
    }

    /// Fake a stream from a completed response. Fallback for providers that
    /// cannot stream.
    pub fn from_complete(text: String) -> Self {
        let chunks = vec![Ok(CompletionChunk::delta(text)), Ok(CompletionChunk::done())];
        Self { inner: futures::stream::iter(chunks).boxed() }
    }
}

impl Stream for CompletionStream {
    type Item = Result<CompletionChunk, LlmError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

/// Chat completion capability as the agents see it.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;

    /// Default implementation falls back to a single-chunk stream over
    /// [`CompletionProvider::complete`].
    async fn stream(&self, request: &CompletionRequest) -> Result<CompletionStream, LlmError> {
        let text = self.complete(request).await?;
        Ok(CompletionStream::from_complete(text))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI chat-completions client.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client,
            max_retries: MAX_RETRIES,
        }
    }

    /// Point the client at a different server. Used by tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    fn request_body(&self, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if request.json_only {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        if stream {
            body["stream"] = serde_json::json!(true);
        }
        body
    }

    async fn send(
        &self,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else if e.is_connect() {
                    LlmError::Connection(e.to_string())
                } else {
                    LlmError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            401 | 403 => LlmError::Unauthorized,
            429 => LlmError::RateLimited,
            s if (500..600).contains(&s) => LlmError::Server { status: s, message },
            s => LlmError::Http { status: s, message },
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let body = self.request_body(request, false);
        let mut attempt = 0;
        loop {
            let result = async {
                let response = self.send(&body).await?;
                let parsed: ChatResponse = response
                    .json()
                    .await
                    .map_err(|e| LlmError::Parse(e.to_string()))?;
                parsed
                    .choices
                    .into_iter()
                    .next()
                    .map(|c| c.message.content)
                    .ok_or_else(|| LlmError::Parse("response contained no choices".to_string()))
            }
            .await;

            match result {
                Ok(text) => return Ok(text),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let delay = RETRY_BASE_DELAY_MS * 2u64.pow(attempt);
                    warn!(model = %request.model, attempt, delay_ms = delay, error = %err, "retrying completion");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Stream the completion over server-sent events. Streaming requests are
    /// not retried; the caller decides what to do with partial output.
    async fn stream(&self, request: &CompletionRequest) -> Result<CompletionStream, LlmError> {
        let body = self.request_body(request, true);
        debug!(model = %request.model, "starting streamed completion");
        let response = self.send(&body).await?;
        let bytes = response.bytes_stream();
        Ok(CompletionStream::new(SseAdapter::new(bytes).boxed()))
    }
}

/// Adapts a raw SSE byte stream into [`CompletionChunk`]s.
///
/// Bytes are buffered until a full line is available; `data:` lines carry a
/// JSON event or the `[DONE]` sentinel, anything else is ignored.
struct SseAdapter<S> {
    bytes: S,
    buffer: String,
    finished: bool,
}

impl<S> SseAdapter<S> {
    fn new(bytes: S) -> Self {
        Self { bytes, buffer: String::new(), finished: false }
    }

    /// Parse one complete SSE line. Returns `Some(None)` for lines with no
    /// content to emit.
    fn parse_line(line: &str) -> Option<Result<CompletionChunk, LlmError>> {
        let line = line.trim();
        let data = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:"))?;
        if data == "[DONE]" {
            return Some(Ok(CompletionChunk::done()));
        }
        match serde_json::from_str::<StreamEvent>(data) {
            Ok(event) => {
                let delta = event
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta.content)
                    .unwrap_or_default();
                if delta.is_empty() {
                    None
                } else {
                    Some(Ok(CompletionChunk::delta(delta)))
                }
            }
            Err(e) => Some(Err(LlmError::Parse(format!("bad stream event: {e}")))),
        }
    }

    fn next_buffered(&mut self) -> Option<Result<CompletionChunk, LlmError>> {
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            if let Some(item) = Self::parse_line(&line) {
                if matches!(item, Ok(CompletionChunk { done: true, .. })) {
                    self.finished = true;
                }
                return Some(item);
            }
        }
        None
    }
}

impl<S> Stream for SseAdapter<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<CompletionChunk, LlmError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if self.finished {
                return Poll::Ready(None);
            }
            if let Some(item) = self.next_buffered() {
                return Poll::Ready(Some(item));
            }
            match self.bytes.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    self.buffer.push_str(&String::from_utf8_lossy(&bytes));
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(LlmError::StreamInterrupted(e.to_string()))));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    // Stream ended without [DONE]; flush any trailing line.
                    if !self.buffer.trim().is_empty() {
                        let rest = std::mem::take(&mut self.buffer);
                        if let Some(item) = Self::parse_line(&rest) {
                            return Poll::Ready(Some(item));
                        }
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Strip a markdown code fence wrapping a JSON payload, if present.
pub fn strip_json_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}
