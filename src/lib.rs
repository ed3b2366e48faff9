//! Rate-limited, multi-client Gemini chat orchestration.
//!
//! The crate layers four pieces:
//!
//! - [`limiter`] — pre-increment accounting against four budgets: requests
//!   per day, requests per minute, tokens per minute, and context tokens per
//!   conversation. Minute exhaustion either raises or waits out the window.
//! - [`chat`] — blocking ([`Chat`]) and async ([`AsyncChat`]) sessions, each
//!   with its own limiter and curated history.
//! - [`client`] — one API key: one-shot calls against a client-level budget
//!   plus an indexed list of sessions of either kind.
//! - [`pool`] — rotation over many clients, skipping keys with no remaining
//!   daily capacity.
//!
//! Budgets resolve from a model-limit table ([`limits`]) keyed by base model
//! name, so `gemini-2.0-flash-001` and `gemini-2.0-flash-latest` share
//! limits. Time is injectable ([`clock::Clock`]): daily windows follow the
//! calendar day in a reference timezone (America/New_York by default),
//! minute windows a monotonic reading.
//!
//! ```no_run
//! use gemini_throttle::{Client, ClientSettings, Content};
//!
//! fn main() -> gemini_throttle::Result<()> {
//!     let mut client = Client::new(ClientSettings::new("api-key")?);
//!     let chat = client.start_chat(None, Vec::new())?;
//!     let reply = chat.send(Content::user("What is the airspeed of a laden swallow?"))?;
//!     println!("{}", reply.text());
//!     Ok(())
//! }
//! ```

pub mod chat;
pub mod client;
pub mod clock;
pub mod error;
pub mod limiter;
pub mod limits;
pub mod pool;
pub mod settings;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use chat::{AsyncChat, Chat, ChatKind, MeteredIter, MeteredStream};
pub use client::{Client, Session};
pub use clock::{Clock, ManualClock, SystemClock, DEFAULT_TIMEZONE};
pub use error::{Error, Result};
pub use limiter::{Budget, ContextUsage, DayUsage, MinuteUsage, RateLimiter, UsageSnapshot};
pub use limits::{base_model_name, LimitTable, ModelLimits};
pub use pool::ClientPool;
pub use settings::{ClientSettings, ModelSettings, ModelSettingsBuilder, DEFAULT_MODEL};
pub use transport::{
    AsyncChatHandle, AsyncTransport, BlockingTransport, ChatHandle, HttpTransport, Transport,
};
pub use types::{
    Candidate, Content, GenerateResponse, GenerationConfig, Part, Role, SafetySetting,
    UsageMetadata,
};
