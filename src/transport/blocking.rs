//! Blocking transport over the Gemini v1beta REST API.
//!
//! Mirror of [`super::http::HttpTransport`] on `reqwest::blocking`. SSE
//! bodies are read line by line off a buffered reader.

use std::fmt;
use std::io::{BufRead, BufReader, Lines};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::error::Result;
use crate::types::{Content, CountTokensResponse, GenerateResponse, GenerationConfig};

use super::http::{api_error, parse_sse_line, request_body, GEMINI_API_BASE};
use super::{ChatHandle, ResponseIter, Transport};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Blocking Gemini REST transport for one API key.
#[derive(Clone)]
pub struct BlockingTransport {
    api_key: String,
    base_url: String,
    client: reqwest::blocking::Client,
}

impl fmt::Debug for BlockingTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingTransport")
            .field("api_key", &"***")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl BlockingTransport {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: GEMINI_API_BASE.to_string(),
            client: reqwest::blocking::Client::builder()
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

/// Iterator over SSE lines of a blocking response body.
struct SseLines {
    lines: Lines<BufReader<reqwest::blocking::Response>>,
}

impl Iterator for SseLines {
    type Item = Result<GenerateResponse>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.lines.next()? {
                Ok(line) => {
                    if let Some(chunk) = parse_sse_line(&line) {
                        return Some(chunk);
                    }
                }
                Err(err) => return Some(Err(err.into())),
            }
        }
    }
}

impl Transport for BlockingTransport {
    fn count_tokens(&self, model: &str, contents: &[Content]) -> Result<u64> {
        let response = self
            .client
            .post(self.api_url(model, "countTokens"))
            .query(&[("key", self.api_key.as_str())])
            .json(&request_body(contents, None))
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status.as_u16(), &response.text()?));
        }
        let counted: CountTokensResponse = response.json()?;
        Ok(counted.total_tokens)
    }

    fn generate(
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
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status.as_u16(), &response.text()?));
        }
        Ok(response.json()?)
    }

    fn generate_stream(
        &self,
        model: &str,
        contents: &[Content],
        config: &GenerationConfig,
    ) -> Result<ResponseIter> {
        debug!(model, turns = contents.len(), "streamGenerateContent");
        let response = self
            .client
            .post(self.api_url(model, "streamGenerateContent"))
            .query(&[("key", self.api_key.as_str()), ("alt", "sse")])
            .json(&request_body(contents, Some(config)))
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status.as_u16(), &response.text()?));
        }
        Ok(Box::new(SseLines {
            lines: BufReader::new(response).lines(),
        }))
    }

    fn create_chat(
        &self,
        model: &str,
        config: &GenerationConfig,
        history: Vec<Content>,
    ) -> Box<dyn ChatHandle> {
        Box::new(BlockingChat {
            transport: self.clone(),
            model: model.to_string(),
            config: config.clone(),
            history: Arc::new(Mutex::new(history)),
        })
    }
}

/// One blocking conversation over [`BlockingTransport`]. Turns are appended
/// only after the model call for them succeeds.
pub struct BlockingChat {
    transport: BlockingTransport,
    model: String,
    config: GenerationConfig,
    history: Arc<Mutex<Vec<Content>>>,
}

fn lock_history(history: &Mutex<Vec<Content>>) -> std::sync::MutexGuard<'_, Vec<Content>> {
    history.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Iterator wrapper committing the aggregate model reply to the history once
/// the stream ends cleanly.
pub(crate) struct RecordingIter {
    inner: ResponseIter,
    history: Arc<Mutex<Vec<Content>>>,
    user_turn: Content,
    aggregate: String,
    failed: bool,
    finished: bool,
}

impl RecordingIter {
    pub(crate) fn new(
        inner: ResponseIter,
        history: Arc<Mutex<Vec<Content>>>,
        user_turn: Content,
    ) -> Self {
        Self {
            inner,
            history,
            user_turn,
            aggregate: String::new(),
            failed: false,
            finished: false,
        }
    }
}

impl Iterator for RecordingIter {
    type Item = Result<GenerateResponse>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.inner.next() {
            Some(Ok(chunk)) => {
                self.aggregate.push_str(&chunk.text());
                Some(Ok(chunk))
            }
            Some(Err(err)) => {
                self.failed = true;
                Some(Err(err))
            }
            None => {
                self.finished = true;
                if !self.failed {
                    let mut history = lock_history(&self.history);
                    history.push(self.user_turn.clone());
                    history.push(Content::model(std::mem::take(&mut self.aggregate)));
                }
                None
            }
        }
    }
}

impl ChatHandle for BlockingChat {
    fn history(&self) -> Vec<Content> {
        lock_history(&self.history).clone()
    }

    fn send(&mut self, message: Content) -> Result<GenerateResponse> {
        let mut contents = self.history();
        contents.push(message.clone());
        let response = self.transport.generate(&self.model, &contents, &self.config)?;
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

    fn send_stream(&mut self, message: Content) -> Result<ResponseIter> {
        let mut contents = self.history();
        contents.push(message.clone());
        let inner = self
            .transport
            .generate_stream(&self.model, &contents, &self.config)?;
        Ok(Box::new(RecordingIter::new(
            inner,
            self.history.clone(),
            message,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_recording_iter_commits_aggregate_on_clean_end() {
        let history = Arc::new(Mutex::new(Vec::new()));
        let chunks: Vec<Result<GenerateResponse>> = vec![
            Ok(serde_json::from_str(
                r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hel"}]}}]}"#,
            )
            .unwrap()),
            Ok(serde_json::from_str(
                r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"lo"}]}}]}"#,
            )
            .unwrap()),
        ];
        let iter = RecordingIter::new(
            Box::new(chunks.into_iter()),
            history.clone(),
            Content::user("hi"),
        );
        let collected: Vec<_> = iter.collect();
        assert_eq!(collected.len(), 2);

        let history = history.lock().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text(), "hi");
        assert_eq!(history[1].text(), "Hello");
    }

    #[test]
    fn test_recording_iter_skips_commit_after_error() {
        let history = Arc::new(Mutex::new(Vec::new()));
        let chunks: Vec<Result<GenerateResponse>> = vec![Err(Error::Api {
            status: 503,
            message: "unavailable".to_string(),
        })];
        let iter = RecordingIter::new(
            Box::new(chunks.into_iter()),
            history.clone(),
            Content::user("hi"),
        );
        let collected: Vec<_> = iter.collect();
        assert_eq!(collected.len(), 1);
        assert!(collected[0].is_err());
        assert!(history.lock().unwrap().is_empty());
    }

    #[test]
    fn test_blocking_debug_redacts_api_key() {
        let transport = BlockingTransport::new("secret-key");
        let rendered = format!("{transport:?}");
        assert!(!rendered.contains("secret-key"), "{rendered}");
    }
}
