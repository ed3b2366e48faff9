//! Model-limit table and base-model-name normalization.
//!
//! Published Gemini rate limits are keyed by base model name; concrete
//! deployments add revision suffixes (`gemini-2.0-flash-001`,
//! `gemini-1.5-pro-latest`, `gemini-2.0-flash-exp-0827`). The table here is
//! plain data: the bundled defaults cover the free-tier models, and callers
//! can load or edit their own table instead of relying on the constants.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Per-model budget ceilings, as published per base model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelLimits {
    pub requests_per_day: u64,
    pub requests_per_minute: u64,
    pub tokens_per_minute: u64,
    pub context: u64,
}

/// Editable `base model name -> limits` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct LimitTable {
    models: HashMap<String, ModelLimits>,
}

impl LimitTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up limits for a (possibly suffixed) model name.
    pub fn get(&self, model_name: &str) -> Option<&ModelLimits> {
        self.models.get(&base_model_name(model_name))
    }

    /// Insert or replace the limits for a base model name.
    pub fn insert(&mut self, base_name: impl Into<String>, limits: ModelLimits) {
        self.models.insert(base_name.into(), limits);
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// The bundled free-tier table.
pub fn defaults() -> &'static LimitTable {
    static DEFAULTS: Lazy<LimitTable> = Lazy::new(|| {
        let mut table = LimitTable::new();
        let mut add = |name: &str, rpd: u64, rpm: u64, tpm: u64, context: u64| {
            table.insert(
                name,
                ModelLimits {
                    requests_per_day: rpd,
                    requests_per_minute: rpm,
                    tokens_per_minute: tpm,
                    context,
                },
            );
        };
        add("gemini-2.5-pro", 100, 5, 250_000, 1_048_576);
        add("gemini-2.5-flash", 250, 10, 250_000, 1_048_576);
        add("gemini-2.5-flash-lite", 1_000, 15, 250_000, 1_048_576);
        add("gemini-2.0-flash", 1_500, 15, 1_000_000, 1_048_576);
        add("gemini-2.0-flash-lite", 1_500, 30, 1_000_000, 1_048_576);
        add("gemini-1.5-flash", 1_500, 15, 1_000_000, 1_048_576);
        add("gemini-1.5-flash-8b", 1_500, 15, 1_000_000, 1_048_576);
        add("gemini-1.5-pro", 50, 2, 32_000, 2_097_152);
        table
    });
    &DEFAULTS
}

/// Normalize a model name to the base name used as a table key.
///
/// Lowercases, then repeatedly strips a trailing `-latest`, `-exp`, or
/// all-digit revision segment, so `gemini-2.0-flash-001`,
/// `gemini-2.0-flash-exp-0827` and `Gemini-2.0-Flash-latest` all resolve to
/// `gemini-2.0-flash`.
pub fn base_model_name(model_name: &str) -> String {
    let mut name = model_name.to_ascii_lowercase();
    loop {
        let Some((head, tail)) = name.rsplit_once('-') else {
            return name;
        };
        let strippable =
            tail == "latest" || tail == "exp" || (!tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()));
        if !strippable {
            return name;
        }
        name = head.to_string();
    }
}
