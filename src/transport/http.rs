//! Async transport over the Gemini v1beta REST API.
//!
//! Authentication is the `key` query parameter. Streaming uses
//! `streamGenerateContent?alt=sse` and parses one JSON chunk per `data:`
//! line.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::json;
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{Content, CountTokensResponse, GenerateResponse, GenerationConfig};

use super::{AsyncChatHandle, AsyncTransport, ResponseStream};

pub(crate) const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Async Gemini REST transport for one API key.
#[derive(Clone)]
pub struct HttpTransport {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("api_key", &"***")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HttpTransport {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: GEMINI_API_BASE.to_string(),
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Point the transport at a different endpoint (mock servers in tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn api_url(&self, model: &str, verb: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, model, verb)
    }
}

/// `generateContent` / `countTokens` request body.
pub(crate) fn request_body(
    contents: &[Content],
    config: Option<&GenerationConfig>,
) -> serde_json::Value {
    let mut body = json!({ "contents": contents });
    if let Some(config) = config {
        body["generationConfig"] = json!(config);
        if !config.safety_settings.is_empty() {
            body["safetySettings"] = json!(config.safety_settings);
        }
    }
    body
}

/// Turn a non-success response body into [`Error::Api`], preferring the
/// structured `error.message` when the body carries one.
pub(crate) fn api_error(status: u16, body: &str) -> Error {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string());
    Error::Api { status, message }
}

/// Parse one SSE line into a response chunk. Blank lines, comments, and the
/// terminator are skipped.
pub(crate) fn parse_sse_line(line: &str) -> Option<Result<GenerateResponse>> {
    let line = line.trim();
    let data = line.strip_prefix("data:").unwrap_or(line).trim();
    if data.is_empty() || data == "[DONE]" || line.starts_with(':') {
        return None;
    }
    Some(serde_json::from_str(data).map_err(Error::from))
}

struct SseState {
    body: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buf: Vec<u8>,
    ready: VecDeque<Result<GenerateResponse>>,
    done: bool,
}

impl SseState {
    /// Split complete lines off the byte buffer and queue parsed chunks.
    /// Splitting on `\n` keeps multi-byte UTF-8 sequences intact.
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(chunk) = parse_sse_line(&line) {
                self.ready.push_back(chunk);
            }
        }
    }
}

fn sse_stream(body: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static) -> ResponseStream {
    let state = SseState {
        body: Box::pin(body),
        buf: Vec::new(),
        ready: VecDeque::new(),
        done: false,
    };
    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(chunk) = state.ready.pop_front() {
                return Some((chunk, state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    state.buf.extend_from_slice(&bytes);
                    state.drain_lines();
                }
                Some(Err(err)) => {
                    state.done = true;
                    state.ready.push_back(Err(err.into()));
                }
                None => {
                    state.done = true;
                    // Trailing line without a final newline.
                    if !state.buf.is_empty() {
                        let rest = String::from_utf8_lossy(&state.buf).into_owned();
                        state.buf.clear();
                        if let Some(chunk) = parse_sse_line(&rest) {
                            state.ready.push_back(chunk);
                        }
                    }
                }
            }
        }
    }))
}

#[async_trait]
impl AsyncTransport for HttpTransport {
    async fn count_tokens(&self, model: &str, contents: &[Content]) -> Result<u64> {
        let response = self
            .client
            .post(self.api_url(model, "countTokens"))
            .query(&[("key", self.api_key.as_str())])
            .json(&request_body(contents, None))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status.as_u16(), &response.text().await?));
        }
        let counted: CountTokensResponse = response.json().await?;
        Ok(counted.total_tokens)
    }

    async fn generate(
        &self,
        model: &str,
        contents: &[Content],
        config: &GenerationConfig,
    ) -> Result<GenerateResponse> {
        debug!(model, turns = contents.len(), "generateContent");
        let response = self
            .client
            .post(self.api_url(model, "generateContent"))
            .query(&[("key", self.api_key.as_str())])
            .json(&request_body(contents, Some(config)))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status.as_u16(), &response.text().await?));
        }
        Ok(response.json().await?)
    }

    async fn generate_stream(
        &self,
        model: &str,
        contents: &[Content],
        config: &GenerationConfig,
    ) -> Result<ResponseStream> {
        debug!(model, turns = contents.len(), "streamGenerateContent");
        let response = self
            .client
            .post(self.api_url(model, "streamGenerateContent"))
            .query(&[("key", self.api_key.as_str()), ("alt", "sse")])
            .json(&request_body(contents, Some(config)))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status.as_u16(), &response.text().await?));
        }
        Ok(sse_stream(response.bytes_stream()))
    }

    fn create_chat(
        &self,
        model: &str,
        config: &GenerationConfig,
        history: Vec<Content>,
    ) -> Box<dyn AsyncChatHandle> {
        Box::new(HttpChat {
            transport: self.clone(),
            model: model.to_string(),
            config: config.clone(),
            history: Arc::new(Mutex::new(history)),
        })
    }
}

/// One async conversation over [`HttpTransport`]. Turns are appended only
/// after the model call for them succeeds.
pub struct HttpChat {
    transport: HttpTransport,
    model: String,
    config: GenerationConfig,
    history: Arc<Mutex<Vec<Content>>>,
}

fn lock_history(history: &Mutex<Vec<Content>>) -> std::sync::MutexGuard<'_, Vec<Content>> {
    history.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Wrap a chunk stream so the aggregate model reply is committed to the
/// history once the stream ends cleanly.
pub(crate) fn recording_stream(
    inner: ResponseStream,
    history: Arc<Mutex<Vec<Content>>>,
    user_turn: Content,
) -> ResponseStream {
    struct State {
        inner: ResponseStream,
        history: Arc<Mutex<Vec<Content>>>,
        user_turn: Content,
        aggregate: String,
        failed: bool,
    }
    let state = State {
        inner,
        history,
        user_turn,
        aggregate: String::new(),
        failed: false,
    };
    Box::pin(futures::stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        match state.inner.next().await {
            Some(Ok(chunk)) => {
                state.aggregate.push_str(&chunk.text());
                Some((Ok(chunk), Some(state)))
            }
            Some(Err(err)) => {
                state.failed = true;
                Some((Err(err), Some(state)))
            }
            None => {
                if !state.failed {
                    let mut history = lock_history(&state.history);
                    history.push(state.user_turn.clone());
                    history.push(Content::model(std::mem::take(&mut state.aggregate)));
                }
                None
            }
        }
    }))
}

#[async_trait]
impl AsyncChatHandle for HttpChat {
    fn history(&self) -> Vec<Content> {
        lock_history(&self.history).clone()
    }

    async fn send(&mut self, message: Content) -> Result<GenerateResponse> {
        let mut contents = self.history();
        contents.push(message.clone());
        let response = self
            .transport
            .generate(&self.model, &contents, &self.config)
            .await?;
        let reply = response
            .candidates
            .first()
            .and_then(|c| c.content.clone())
            .unwrap_or_else(|| Content::model(""));
        let mut history = lock_history(&self.history);
        history.push(message);
        history.push(reply);
        Ok(response)
    }

    async fn send_stream(&mut self, message: Content) -> Result<ResponseStream> {
        let mut contents = self.history();
        contents.push(message.clone());
        let inner = self
            .transport
            .generate_stream(&self.model, &contents, &self.config)
            .await?;
        Ok(recording_stream(inner, self.history.clone(), message))
    }
}
