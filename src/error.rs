//! Crate-wide error taxonomy.
//!
//! Budget errors (`DayLimitExceeded`, `MinuteLimitExceeded`,
//! `ContextLimitExceeded`) surface to the immediate caller; nothing in this
//! crate retries or swallows them. Transport failures travel through the
//! `Http` / `Api` / `Decode` / `Io` carriers unchanged.

use thiserror::Error;

use crate::chat::ChatKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The daily request budget is exhausted and the day has not rolled.
    #[error("daily request limit exhausted")]
    DayLimitExceeded,

    /// A per-minute request or token budget is exhausted and the limiter was
    /// configured to raise instead of waiting out the window.
    #[error("per-minute request or token limit exhausted")]
    MinuteLimitExceeded,

    /// Cumulative input + output tokens exceeded the session's context budget.
    #[error("context window limit exhausted")]
    ContextLimitExceeded,

    /// A limit could not be resolved from the model-limit table and no
    /// explicit value was supplied.
    #[error("'{model_name}' is not in the model-limit table; specify '{which_limit}' explicitly")]
    Config {
        which_limit: &'static str,
        model_name: String,
    },

    /// A send call was dispatched to a chat of the wrong kind.
    #[error("chat at index {index} is not {expected}; use the matching send variant")]
    ChatKind { index: isize, expected: ChatKind },

    /// A caller-side precondition was violated.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The HTTP layer failed before a Gemini response was produced.
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Gemini returned a non-success status.
    #[error("Gemini API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// A response or stream chunk could not be decoded.
    #[error("failed to decode Gemini response: {0}")]
    Decode(#[from] serde_json::Error),

    /// A streaming response body could not be read.
    #[error("stream read error: {0}")]
    Io(#[from] std::io::Error),
}
