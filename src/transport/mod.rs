//! Transport seams between sessions and the Gemini REST API.
//!
//! Two trait families mirror each other: [`Transport`] / [`ChatHandle`] for
//! blocking callers and [`AsyncTransport`] / [`AsyncChatHandle`] for async
//! ones. Sessions and clients talk only to these traits; tests substitute
//! scripted implementations, production uses [`http::HttpTransport`] and
//! [`blocking::BlockingTransport`].
//!
//! Chat handles own the curated history of one conversation: a turn is
//! appended only after the model call for it succeeds, so a failed or
//! rejected send leaves the history untouched.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::Result;
use crate::types::{Content, GenerateResponse, GenerationConfig};

pub mod blocking;
pub mod http;

pub use blocking::BlockingTransport;
pub use http::HttpTransport;

/// Blocking stream of response chunks.
pub type ResponseIter = Box<dyn Iterator<Item = Result<GenerateResponse>> + Send>;

/// Async stream of response chunks.
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<GenerateResponse>> + Send>>;

/// Blocking Gemini operations for one API key.
pub trait Transport: Send + Sync {
    /// Count input tokens for `contents` under `model`.
    fn count_tokens(&self, model: &str, contents: &[Content]) -> Result<u64>;

    /// One-shot `generateContent`.
    fn generate(
        &self,
        model: &str,
        contents: &[Content],
        config: &GenerationConfig,
    ) -> Result<GenerateResponse>;

    /// One-shot `streamGenerateContent`, chunk by chunk.
    fn generate_stream(
        &self,
        model: &str,
        contents: &[Content],
        config: &GenerationConfig,
    ) -> Result<ResponseIter>;

    /// Open a conversation handle seeded with `history`.
    fn create_chat(
        &self,
        model: &str,
        config: &GenerationConfig,
        history: Vec<Content>,
    ) -> Box<dyn ChatHandle>;
}

/// One blocking conversation: curated history plus send.
pub trait ChatHandle: Send {
    /// Snapshot of the curated history.
    fn history(&self) -> Vec<Content>;

    /// Send one turn; on success the user turn and the model reply are
    /// appended to the history.
    fn send(&mut self, message: Content) -> Result<GenerateResponse>;

    /// Streaming send; the aggregate model reply is appended when the stream
    /// finishes.
    fn send_stream(&mut self, message: Content) -> Result<ResponseIter>;
}

/// Async mirror of [`Transport`].
#[async_trait]
pub trait AsyncTransport: Send + Sync {
    async fn count_tokens(&self, model: &str, contents: &[Content]) -> Result<u64>;

    async fn generate(
        &self,
        model: &str,
        contents: &[Content],
        config: &GenerationConfig,
    ) -> Result<GenerateResponse>;

    async fn generate_stream(
        &self,
        model: &str,
        contents: &[Content],
        config: &GenerationConfig,
    ) -> Result<ResponseStream>;

    /// Open a conversation handle seeded with `history`.
    fn create_chat(
        &self,
        model: &str,
        config: &GenerationConfig,
        history: Vec<Content>,
    ) -> Box<dyn AsyncChatHandle>;
}

/// Async mirror of [`ChatHandle`].
#[async_trait]
pub trait AsyncChatHandle: Send {
    fn history(&self) -> Vec<Content>;

    async fn send(&mut self, message: Content) -> Result<GenerateResponse>;

    async fn send_stream(&mut self, message: Content) -> Result<ResponseStream>;
}
