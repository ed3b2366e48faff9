//! Scripted transports shared by the session, client, and pool tests.
//!
//! A [`Script`] holds a fixed token cost per message and a queue of replies;
//! the transports built from it pop one reply per send. Both transport
//! families share the same queue, so a test can interleave blocking and
//! async sessions against one script.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::transport::blocking::RecordingIter;
use crate::transport::http::recording_stream;
use crate::transport::{
    AsyncChatHandle, AsyncTransport, ChatHandle, ResponseIter, ResponseStream, Transport,
};
use crate::types::{Candidate, Content, GenerateResponse, GenerationConfig};

#[derive(Clone)]
pub(crate) enum ScriptedReply {
    Text { text: String, tokens: u64 },
    Stream(Vec<(String, u64)>),
    ApiError { status: u16, message: String },
}

impl ScriptedReply {
    pub(crate) fn text(text: &str, tokens: u64) -> Self {
        Self::Text {
            text: text.to_string(),
            tokens,
        }
    }

    pub(crate) fn stream(chunks: Vec<(&str, u64)>) -> Self {
        Self::Stream(
            chunks
                .into_iter()
                .map(|(text, tokens)| (text.to_string(), tokens))
                .collect(),
        )
    }

    pub(crate) fn api_error(status: u16, message: &str) -> Self {
        Self::ApiError {
            status,
            message: message.to_string(),
        }
    }
}

/// Scripted behavior: `tokens_per_message` per counted message, replies
/// popped in order.
#[derive(Clone)]
pub(crate) struct Script {
    tokens_per_message: u64,
    replies: Arc<Mutex<VecDeque<ScriptedReply>>>,
}

impl Script {
    pub(crate) fn new(tokens_per_message: u64) -> Self {
        Self {
            tokens_per_message,
            replies: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub(crate) fn reply(self, reply: ScriptedReply) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    fn count(&self, contents: &[Content]) -> u64 {
        contents.len() as u64 * self.tokens_per_message
    }

    fn pop(&self) -> ScriptedReply {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("script ran out of replies")
    }
}

pub(crate) fn scripted(script: &Script) -> Arc<dyn Transport> {
    Arc::new(ScriptedTransport {
        script: script.clone(),
    })
}

pub(crate) fn async_scripted(script: &Script) -> Arc<dyn AsyncTransport> {
    Arc::new(AsyncScriptedTransport {
        script: script.clone(),
    })
}

fn chunk_response(text: &str, tokens: u64) -> GenerateResponse {
    GenerateResponse {
        candidates: vec![Candidate {
            content: Some(Content::model(text)),
            finish_reason: None,
            token_count: Some(tokens),
        }],
        usage_metadata: None,
    }
}

/// Resolve one scripted reply into the one-shot response shape.
fn resolve(reply: ScriptedReply) -> Result<GenerateResponse> {
    match reply {
        ScriptedReply::Text { text, tokens } => Ok(chunk_response(&text, tokens)),
        ScriptedReply::ApiError { status, message } => Err(Error::Api { status, message }),
        ScriptedReply::Stream(_) => panic!("script expected a one-shot send, got a stream reply"),
    }
}

/// Resolve one scripted reply into stream chunks.
fn resolve_stream(reply: ScriptedReply) -> Result<Vec<Result<GenerateResponse>>> {
    match reply {
        ScriptedReply::Stream(chunks) => Ok(chunks
            .into_iter()
            .map(|(text, tokens)| Ok(chunk_response(&text, tokens)))
            .collect()),
        ScriptedReply::Text { text, tokens } => Ok(vec![Ok(chunk_response(&text, tokens))]),
        ScriptedReply::ApiError { status, message } => Err(Error::Api { status, message }),
    }
}

pub(crate) struct ScriptedTransport {
    script: Script,
}

impl Transport for ScriptedTransport {
    fn count_tokens(&self, _model: &str, contents: &[Content]) -> Result<u64> {
        Ok(self.script.count(contents))
    }

    fn generate(
        &self,
        _model: &str,
        _contents: &[Content],
        _config: &GenerationConfig,
    ) -> Result<GenerateResponse> {
        resolve(self.script.pop())
    }

    fn generate_stream(
        &self,
        _model: &str,
        _contents: &[Content],
        _config: &GenerationConfig,
    ) -> Result<ResponseIter> {
        let chunks = resolve_stream(self.script.pop())?;
        Ok(Box::new(chunks.into_iter()))
    }

    fn create_chat(
        &self,
        _model: &str,
        _config: &GenerationConfig,
        history: Vec<Content>,
    ) -> Box<dyn ChatHandle> {
        Box::new(ScriptedChat {
            script: self.script.clone(),
            history: Arc::new(Mutex::new(history)),
        })
    }
}

pub(crate) struct ScriptedChat {
    script: Script,
    history: Arc<Mutex<Vec<Content>>>,
}

impl ChatHandle for ScriptedChat {
    fn history(&self) -> Vec<Content> {
        self.history.lock().unwrap().clone()
    }

    fn send(&mut self, message: Content) -> Result<GenerateResponse> {
        let response = resolve(self.script.pop())?;
        let reply = response
            .candidates
            .first()
            .and_then(|c| c.content.clone())
            .unwrap_or_else(|| Content::model(""));
        let mut history = self.history.lock().unwrap();
        history.push(message);
        history.push(reply);
        Ok(response)
    }

    fn send_stream(&mut self, message: Content) -> Result<ResponseIter> {
        let chunks = resolve_stream(self.script.pop())?;
        Ok(Box::new(RecordingIter::new(
            Box::new(chunks.into_iter()),
            self.history.clone(),
            message,
        )))
    }
}

pub(crate) struct AsyncScriptedTransport {
    script: Script,
}

#[async_trait]
impl AsyncTransport for AsyncScriptedTransport {
    async fn count_tokens(&self, _model: &str, contents: &[Content]) -> Result<u64> {
        Ok(self.script.count(contents))
    }

    async fn generate(
        &self,
        _model: &str,
        _contents: &[Content],
        _config: &GenerationConfig,
    ) -> Result<GenerateResponse> {
        resolve(self.script.pop())
    }

    async fn generate_stream(
        &self,
        _model: &str,
        _contents: &[Content],
        _config: &GenerationConfig,
    ) -> Result<ResponseStream> {
        let chunks = resolve_stream(self.script.pop())?;
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    fn create_chat(
        &self,
        _model: &str,
        _config: &GenerationConfig,
        history: Vec<Content>,
    ) -> Box<dyn AsyncChatHandle> {
        Box::new(AsyncScriptedChat {
            script: self.script.clone(),
            history: Arc::new(Mutex::new(history)),
        })
    }
}

pub(crate) struct AsyncScriptedChat {
    script: Script,
    history: Arc<Mutex<Vec<Content>>>,
}

#[async_trait]
impl AsyncChatHandle for AsyncScriptedChat {
    fn history(&self) -> Vec<Content> {
        self.history.lock().unwrap().clone()
    }

    async fn send(&mut self, message: Content) -> Result<GenerateResponse> {
        let response = resolve(self.script.pop())?;
        let reply = response
            .candidates
            .first()
            .and_then(|c| c.content.clone())
            .unwrap_or_else(|| Content::model(""));
        let mut history = self.history.lock().unwrap();
        history.push(message);
        history.push(reply);
        Ok(response)
    }

    async fn send_stream(&mut self, message: Content) -> Result<ResponseStream> {
        let chunks = resolve_stream(self.script.pop())?;
        Ok(recording_stream(
            Box::pin(futures::stream::iter(chunks)),
            self.history.clone(),
            message,
        ))
    }
}
