//! Metered chat sessions.
//!
//! A session pairs one transport-level conversation handle with its own
//! [`RateLimiter`]. Every send counts the outgoing message first, reserves
//! that many input tokens against all four budgets, and only then performs
//! the model call; output tokens are recorded against the context budget
//! afterwards. Streaming sends meter each chunk as it arrives.
//!
//! [`Chat`] is the blocking session, [`AsyncChat`] the async one. They are
//! distinct types; a caller holding the wrong kind finds out at the client's
//! dispatch boundary, not here.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use futures::Stream;
use tracing::info;

use crate::clock::Clock;
use crate::error::Result;
use crate::limiter::{ContextUsage, DayUsage, MinuteUsage, RateLimiter};
use crate::settings::ModelSettings;
use crate::transport::{
    AsyncChatHandle, AsyncTransport, ChatHandle, ResponseIter, ResponseStream, Transport,
};
use crate::types::{Content, GenerateResponse};

/// Whether a session is the blocking or the async variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Sync,
    Async,
}

impl fmt::Display for ChatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatKind::Sync => write!(f, "synchronous"),
            ChatKind::Async => write!(f, "asynchronous"),
        }
    }
}

/// A blocking chat session with its own budgets.
pub struct Chat {
    transport: Arc<dyn Transport>,
    handle: Box<dyn ChatHandle>,
    limiter: RateLimiter,
    settings: ModelSettings,
    clock: Arc<dyn Clock>,
}

impl Chat {
    /// Open a session. A non-empty seed history is token-counted to
    /// initialize context usage; an empty one starts from the carried
    /// `context_used` in `settings`.
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: ModelSettings,
        history: Vec<Content>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let handle = transport.create_chat(
            &settings.model_name,
            &settings.generation_config,
            history.clone(),
        );
        let limiter = settings.build_limiter(clock.clone());
        if !history.is_empty() {
            let counted = transport.count_tokens(&settings.model_name, &history)?;
            limiter.set_context(counted);
        }
        Ok(Self {
            transport,
            handle,
            limiter,
            settings,
            clock,
        })
    }

    /// Send one turn. Input tokens are reserved before the call; output
    /// tokens are recorded after it. On failure the history is untouched,
    /// but reserved input tokens stay spent.
    pub fn send(&mut self, message: Content) -> Result<GenerateResponse> {
        let input_tokens = self
            .transport
            .count_tokens(&self.settings.model_name, std::slice::from_ref(&message))?;
        self.limiter.reserve(input_tokens)?;
        let response = self.handle.send(message)?;
        self.limiter.record_output(response.output_token_sum())?;
        Ok(response)
    }

    /// Streaming send. Each yielded chunk has already had its output tokens
    /// recorded; a chunk that overruns the context budget is replaced by the
    /// budget error and ends the stream.
    pub fn send_stream(&mut self, message: Content) -> Result<MeteredIter<'_>> {
        let input_tokens = self
            .transport
            .count_tokens(&self.settings.model_name, std::slice::from_ref(&message))?;
        self.limiter.reserve(input_tokens)?;
        let inner = self.handle.send_stream(message)?;
        Ok(MeteredIter {
            inner,
            limiter: &self.limiter,
            done: false,
        })
    }

    /// Swap in new settings, keeping the conversation. The history is
    /// re-counted under the new model and the budgets start over from the
    /// new settings.
    pub fn change_settings(&mut self, settings: ModelSettings) -> Result<()> {
        let history = self.handle.history();
        let handle = self.transport.create_chat(
            &settings.model_name,
            &settings.generation_config,
            history.clone(),
        );
        let limiter = settings.build_limiter(self.clock.clone());
        let counted = if history.is_empty() {
            0
        } else {
            self.transport
                .count_tokens(&settings.model_name, &history)?
        };
        limiter.set_context(counted);
        info!(model = %settings.model_name, context_tokens = counted, "settings changed");
        self.handle = handle;
        self.limiter = limiter;
        self.settings = settings;
        Ok(())
    }

    /// Drop the whole conversation and zero context usage.
    pub fn clear_history(&mut self) {
        self.handle = self.transport.create_chat(
            &self.settings.model_name,
            &self.settings.generation_config,
            Vec::new(),
        );
        self.limiter.clear_context();
    }

    /// Replace the conversation wholesale; context usage is re-counted.
    pub fn reset_history(&mut self, history: Vec<Content>) -> Result<()> {
        let counted = if history.is_empty() {
            0
        } else {
            self.transport
                .count_tokens(&self.settings.model_name, &history)?
        };
        self.handle = self.transport.create_chat(
            &self.settings.model_name,
            &self.settings.generation_config,
            history,
        );
        self.limiter.set_context(counted);
        Ok(())
    }

    /// Keep only `history[start..end]` (indices clamped; an inverted range
    /// empties the history) and re-count context usage.
    pub fn slice_history(&mut self, start: Option<usize>, end: Option<usize>) -> Result<()> {
        let history = self.handle.history();
        let len = history.len();
        let start = start.unwrap_or(0).min(len);
        let end = end.unwrap_or(len).min(len);
        let sliced = if start >= end {
            Vec::new()
        } else {
            history[start..end].to_vec()
        };
        self.reset_history(sliced)
    }

    pub fn history(&self) -> Vec<Content> {
        self.handle.history()
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    pub fn model_name(&self) -> &str {
        &self.settings.model_name
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn context_usage(&self) -> ContextUsage {
        self.limiter.context_usage()
    }

    pub fn day_usage(&self) -> DayUsage {
        self.limiter.day_usage()
    }

    pub fn minute_usage(&self) -> MinuteUsage {
        self.limiter.minute_usage()
    }
}

/// Blocking chunk iterator that records output tokens as chunks arrive.
pub struct MeteredIter<'a> {
    inner: ResponseIter,
    limiter: &'a RateLimiter,
    done: bool,
}

impl<'a> MeteredIter<'a> {
    pub(crate) fn new(inner: ResponseIter, limiter: &'a RateLimiter) -> Self {
        Self {
            inner,
            limiter,
            done: false,
        }
    }
}

impl Iterator for MeteredIter<'_> {
    type Item = Result<GenerateResponse>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.next() {
            Some(Ok(chunk)) => {
                if let Err(err) = self.limiter.record_output(chunk.output_token_sum()) {
                    self.done = true;
                    return Some(Err(err));
                }
                Some(Ok(chunk))
            }
            Some(Err(err)) => {
                self.done = true;
                Some(Err(err))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

/// An async chat session with its own budgets.
pub struct AsyncChat {
    transport: Arc<dyn AsyncTransport>,
    handle: Box<dyn AsyncChatHandle>,
    limiter: RateLimiter,
    settings: ModelSettings,
    clock: Arc<dyn Clock>,
}

impl AsyncChat {
    /// Async mirror of [`Chat::new`].
    pub async fn new(
        transport: Arc<dyn AsyncTransport>,
        settings: ModelSettings,
        history: Vec<Content>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let handle = transport.create_chat(
            &settings.model_name,
            &settings.generation_config,
            history.clone(),
        );
        let limiter = settings.build_limiter(clock.clone());
        if !history.is_empty() {
            let counted = transport
                .count_tokens(&settings.model_name, &history)
                .await?;
            limiter.set_context(counted);
        }
        Ok(Self {
            transport,
            handle,
            limiter,
            settings,
            clock,
        })
    }

    /// Async mirror of [`Chat::send`].
    pub async fn send(&mut self, message: Content) -> Result<GenerateResponse> {
        let input_tokens = self
            .transport
            .count_tokens(&self.settings.model_name, std::slice::from_ref(&message))
            .await?;
        self.limiter.reserve_async(input_tokens).await?;
        let response = self.handle.send(message).await?;
        self.limiter.record_output(response.output_token_sum())?;
        Ok(response)
    }

    /// Async mirror of [`Chat::send_stream`].
    pub async fn send_stream(&mut self, message: Content) -> Result<MeteredStream<'_>> {
        let input_tokens = self
            .transport
            .count_tokens(&self.settings.model_name, std::slice::from_ref(&message))
            .await?;
        self.limiter.reserve_async(input_tokens).await?;
        let inner = self.handle.send_stream(message).await?;
        Ok(MeteredStream {
            inner,
            limiter: &self.limiter,
            done: false,
        })
    }

    /// Async mirror of [`Chat::change_settings`].
    pub async fn change_settings(&mut self, settings: ModelSettings) -> Result<()> {
        let history = self.handle.history();
        let handle = self.transport.create_chat(
            &settings.model_name,
            &settings.generation_config,
            history.clone(),
        );
        let limiter = settings.build_limiter(self.clock.clone());
        let counted = if history.is_empty() {
            0
        } else {
            self.transport
                .count_tokens(&settings.model_name, &history)
                .await?
        };
        limiter.set_context(counted);
        info!(model = %settings.model_name, context_tokens = counted, "settings changed");
        self.handle = handle;
        self.limiter = limiter;
        self.settings = settings;
        Ok(())
    }

    pub fn clear_history(&mut self) {
        self.handle = self.transport.create_chat(
            &self.settings.model_name,
            &self.settings.generation_config,
            Vec::new(),
        );
        self.limiter.clear_context();
    }

    /// Async mirror of [`Chat::reset_history`].
    pub async fn reset_history(&mut self, history: Vec<Content>) -> Result<()> {
        let counted = if history.is_empty() {
            0
        } else {
            self.transport
                .count_tokens(&self.settings.model_name, &history)
                .await?
        };
        self.handle = self.transport.create_chat(
            &self.settings.model_name,
            &self.settings.generation_config,
            history,
        );
        self.limiter.set_context(counted);
        Ok(())
    }

    /// Async mirror of [`Chat::slice_history`].
    pub async fn slice_history(&mut self, start: Option<usize>, end: Option<usize>) -> Result<()> {
        let history = self.handle.history();
        let len = history.len();
        let start = start.unwrap_or(0).min(len);
        let end = end.unwrap_or(len).min(len);
        let sliced = if start >= end {
            Vec::new()
        } else {
            history[start..end].to_vec()
        };
        self.reset_history(sliced).await
    }

    pub fn history(&self) -> Vec<Content> {
        self.handle.history()
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    pub fn model_name(&self) -> &str {
        &self.settings.model_name
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn context_usage(&self) -> ContextUsage {
        self.limiter.context_usage()
    }

    pub fn day_usage(&self) -> DayUsage {
        self.limiter.day_usage()
    }

    pub fn minute_usage(&self) -> MinuteUsage {
        self.limiter.minute_usage()
    }
}

/// Async chunk stream that records output tokens as chunks arrive.
pub struct MeteredStream<'a> {
    inner: ResponseStream,
    limiter: &'a RateLimiter,
    done: bool,
}

impl<'a> MeteredStream<'a> {
    pub(crate) fn new(inner: ResponseStream, limiter: &'a RateLimiter) -> Self {
        Self {
            inner,
            limiter,
            done: false,
        }
    }
}

impl Stream for MeteredStream<'_> {
    type Item = Result<GenerateResponse>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.inner.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(chunk))) => {
                if let Err(err) = this.limiter.record_output(chunk.output_token_sum()) {
                    this.done = true;
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.done = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
        }
    }
}
