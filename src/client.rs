//! One API key: a client-level budget, one-shot calls, and a list of chat
//! sessions.
//!
//! The client owns its own [`RateLimiter`] for one-shot `generate` calls;
//! every chat session carries a separate limiter of its own. Sessions of
//! both kinds live in one list and are addressed by index (negative indices
//! count from the end). Dispatching a send to a session of the wrong kind
//! fails with [`Error::ChatKind`] before any token is counted or reserved.

use std::sync::Arc;

use tracing::info;

use crate::chat::{AsyncChat, Chat, ChatKind, MeteredIter, MeteredStream};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::limiter::{ContextUsage, DayUsage, MinuteUsage, RateLimiter};
use crate::settings::{ClientSettings, ModelSettings};
use crate::transport::{AsyncTransport, BlockingTransport, HttpTransport, Transport};
use crate::types::{Content, GenerateResponse, GenerationConfig};

/// A chat session of either kind.
pub enum Session {
    Sync(Chat),
    Async(AsyncChat),
}

impl Session {
    pub fn kind(&self) -> ChatKind {
        match self {
            Session::Sync(_) => ChatKind::Sync,
            Session::Async(_) => ChatKind::Async,
        }
    }

    pub fn model_name(&self) -> &str {
        match self {
            Session::Sync(chat) => chat.model_name(),
            Session::Async(chat) => chat.model_name(),
        }
    }

    pub fn history(&self) -> Vec<Content> {
        match self {
            Session::Sync(chat) => chat.history(),
            Session::Async(chat) => chat.history(),
        }
    }
}

/// Gemini client for one API key.
pub struct Client {
    api_key: String,
    settings: ModelSettings,
    limiter: RateLimiter,
    transport: Arc<dyn Transport>,
    async_transport: Arc<dyn AsyncTransport>,
    chats: Vec<Session>,
    clock: Arc<dyn Clock>,
}

impl Client {
    /// Production client over the REST transports.
    pub fn new(settings: ClientSettings) -> Self {
        let transport: Arc<dyn Transport> = Arc::new(BlockingTransport::new(&settings.api_key));
        let async_transport: Arc<dyn AsyncTransport> =
            Arc::new(HttpTransport::new(&settings.api_key));
        Self::with_transports(settings, transport, async_transport, Arc::new(SystemClock::new()))
    }

    /// Client over caller-supplied transports and clock.
    pub fn with_transports(
        settings: ClientSettings,
        transport: Arc<dyn Transport>,
        async_transport: Arc<dyn AsyncTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let limiter = settings.model_settings.build_limiter(clock.clone());
        Self {
            api_key: settings.api_key,
            settings: settings.model_settings,
            limiter,
            transport,
            async_transport,
            chats: Vec::new(),
            clock,
        }
    }

    // ── one-shot calls ──

    /// Metered one-shot `generateContent` against the client budget.
    pub fn generate(
        &self,
        message: Content,
        config: Option<&GenerationConfig>,
    ) -> Result<GenerateResponse> {
        let contents = [message];
        let input_tokens = self
            .transport
            .count_tokens(&self.settings.model_name, &contents)?;
        self.limiter.reserve(input_tokens)?;
        let response = self.transport.generate(
            &self.settings.model_name,
            &contents,
            config.unwrap_or(&self.settings.generation_config),
        )?;
        self.limiter.record_output(response.output_token_sum())?;
        Ok(response)
    }

    /// Metered one-shot streaming call against the client budget.
    pub fn generate_stream(
        &self,
        message: Content,
        config: Option<&GenerationConfig>,
    ) -> Result<MeteredIter<'_>> {
        let contents = [message];
        let input_tokens = self
            .transport
            .count_tokens(&self.settings.model_name, &contents)?;
        self.limiter.reserve(input_tokens)?;
        let inner = self.transport.generate_stream(
            &self.settings.model_name,
            &contents,
            config.unwrap_or(&self.settings.generation_config),
        )?;
        Ok(MeteredIter::new(inner, &self.limiter))
    }

    /// Async mirror of [`Client::generate`].
    pub async fn generate_async(
        &self,
        message: Content,
        config: Option<&GenerationConfig>,
    ) -> Result<GenerateResponse> {
        let contents = [message];
        let input_tokens = self
            .async_transport
            .count_tokens(&self.settings.model_name, &contents)
            .await?;
        self.limiter.reserve_async(input_tokens).await?;
        let response = self
            .async_transport
            .generate(
                &self.settings.model_name,
                &contents,
                config.unwrap_or(&self.settings.generation_config),
            )
            .await?;
        self.limiter.record_output(response.output_token_sum())?;
        Ok(response)
    }

    /// Async mirror of [`Client::generate_stream`].
    pub async fn generate_stream_async(
        &self,
        message: Content,
        config: Option<&GenerationConfig>,
    ) -> Result<MeteredStream<'_>> {
        let contents = [message];
        let input_tokens = self
            .async_transport
            .count_tokens(&self.settings.model_name, &contents)
            .await?;
        self.limiter.reserve_async(input_tokens).await?;
        let inner = self
            .async_transport
            .generate_stream(
                &self.settings.model_name,
                &contents,
                config.unwrap_or(&self.settings.generation_config),
            )
            .await?;
        Ok(MeteredStream::new(inner, &self.limiter))
    }

    // ── session management ──

    /// Open a blocking chat session. `settings` defaults to the client's
    /// own; `history` seeds the conversation.
    pub fn start_chat(
        &mut self,
        settings: Option<ModelSettings>,
        history: Vec<Content>,
    ) -> Result<&mut Chat> {
        let settings = settings.unwrap_or_else(|| self.settings.clone());
        info!(model = %settings.model_name, "starting chat session");
        let chat = Chat::new(
            self.transport.clone(),
            settings,
            history,
            self.clock.clone(),
        )?;
        self.chats.push(Session::Sync(chat));
        match self.chats.last_mut() {
            Some(Session::Sync(chat)) => Ok(chat),
            _ => unreachable!("just pushed a sync session"),
        }
    }

    /// Open an async chat session.
    pub async fn start_async_chat(
        &mut self,
        settings: Option<ModelSettings>,
        history: Vec<Content>,
    ) -> Result<&mut AsyncChat> {
        let settings = settings.unwrap_or_else(|| self.settings.clone());
        info!(model = %settings.model_name, "starting async chat session");
        let chat = AsyncChat::new(
            self.async_transport.clone(),
            settings,
            history,
            self.clock.clone(),
        )
        .await?;
        self.chats.push(Session::Async(chat));
        match self.chats.last_mut() {
            Some(Session::Async(chat)) => Ok(chat),
            _ => unreachable!("just pushed an async session"),
        }
    }

    /// Session at `index`; negative indices count from the end.
    pub fn chat(&mut self, index: isize) -> Result<&mut Session> {
        let resolved = self.resolve_index(index)?;
        Ok(&mut self.chats[resolved])
    }

    /// Remove and return the session at `index`.
    pub fn close_chat(&mut self, index: isize) -> Result<Session> {
        let resolved = self.resolve_index(index)?;
        Ok(self.chats.remove(resolved))
    }

    /// Send a turn through the blocking session at `index`.
    pub fn send(&mut self, index: isize, message: Content) -> Result<GenerateResponse> {
        let resolved = self.resolve_index(index)?;
        match &mut self.chats[resolved] {
            Session::Sync(chat) => chat.send(message),
            Session::Async(_) => Err(Error::ChatKind {
                index,
                expected: ChatKind::Sync,
            }),
        }
    }

    /// Streaming send through the blocking session at `index`.
    pub fn send_stream(&mut self, index: isize, message: Content) -> Result<MeteredIter<'_>> {
        let resolved = self.resolve_index(index)?;
        match &mut self.chats[resolved] {
            Session::Sync(chat) => chat.send_stream(message),
            Session::Async(_) => Err(Error::ChatKind {
                index,
                expected: ChatKind::Sync,
            }),
        }
    }

    /// Send a turn through the async session at `index`.
    pub async fn send_async(&mut self, index: isize, message: Content) -> Result<GenerateResponse> {
        let resolved = self.resolve_index(index)?;
        match &mut self.chats[resolved] {
            Session::Async(chat) => chat.send(message).await,
            Session::Sync(_) => Err(Error::ChatKind {
                index,
                expected: ChatKind::Async,
            }),
        }
    }

    /// Streaming send through the async session at `index`.
    pub async fn send_stream_async(
        &mut self,
        index: isize,
        message: Content,
    ) -> Result<MeteredStream<'_>> {
        let resolved = self.resolve_index(index)?;
        match &mut self.chats[resolved] {
            Session::Async(chat) => chat.send_stream(message).await,
            Session::Sync(_) => Err(Error::ChatKind {
                index,
                expected: ChatKind::Async,
            }),
        }
    }

    fn resolve_index(&self, index: isize) -> Result<usize> {
        let len = self.chats.len() as isize;
        let resolved = if index < 0 { len + index } else { index };
        if resolved < 0 || resolved >= len {
            return Err(Error::InvalidArgument(format!(
                "chat index {index} out of range for {len} session(s)"
            )));
        }
        Ok(resolved as usize)
    }

    // ── budget state ──

    /// True iff the client budget still admits a request today.
    pub fn has_daily_capacity(&self) -> bool {
        self.limiter.has_daily_capacity()
    }

    /// Veto this client for the rest of the day.
    pub fn exhaust_day(&self) {
        self.limiter.exhaust_day();
    }

    /// Veto this client for a full minute window.
    pub fn exhaust_minute(&self) {
        self.limiter.exhaust_minute();
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

    // ── accessors ──

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn model_name(&self) -> &str {
        &self.settings.model_name
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    pub fn generation_config(&self) -> &GenerationConfig {
        &self.settings.generation_config
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn chats(&self) -> &[Session] {
        &self.chats
    }
}
