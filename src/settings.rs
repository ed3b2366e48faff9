//! Model and client configuration.
//!
//! [`ModelSettings`] pairs a model name with a generation config and a
//! resolved [`Budget`]. Limits the caller does not pin explicitly are
//! resolved from a model-limit table at build time (the bundled defaults
//! unless a custom table is supplied); a model absent from the table with a
//! limit left unresolved is a configuration error, caught before any request
//! is made.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::limiter::{Budget, RateLimiter, UsageSnapshot};
use crate::limits::{self, LimitTable};
use crate::types::GenerationConfig;

/// Model used when a client is created from an API key alone.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Fully resolved settings for one model session.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub model_name: String,
    pub generation_config: GenerationConfig,
    /// Day anchor carried over from a previous run; `None` means today.
    pub start_day: Option<NaiveDate>,
    /// Requests already spent against `start_day`.
    pub requests_today: u64,
    /// Context tokens already spent. Ignored when a session is created with
    /// history, which is re-counted instead.
    pub context_used: u64,
    pub budget: Budget,
}

impl ModelSettings {
    /// Settings for `model_name` with every knob at its default, limits
    /// resolved from the bundled table.
    pub fn new(model_name: impl Into<String>) -> Result<Self> {
        Self::builder(model_name).build()
    }

    pub fn builder(model_name: impl Into<String>) -> ModelSettingsBuilder {
        ModelSettingsBuilder {
            model_name: model_name.into(),
            generation_config: None,
            start_day: None,
            requests_today: 0,
            context_used: 0,
            requests_per_day: None,
            requests_per_minute: None,
            tokens_per_minute: None,
            context: None,
            raise_on_minute_limit: true,
            table: None,
        }
    }

    /// Build the limiter these settings describe, seeded with any carried
    /// usage.
    pub(crate) fn build_limiter(&self, clock: Arc<dyn Clock>) -> RateLimiter {
        let snapshot = UsageSnapshot {
            day_anchor: self.start_day.unwrap_or_else(|| clock.today()),
            requests_today: self.requests_today,
            context_tokens: self.context_used,
        };
        RateLimiter::with_usage(self.budget, snapshot, clock)
    }
}

/// Builder for [`ModelSettings`]. Limits left unset are resolved from the
/// table at [`ModelSettingsBuilder::build`].
#[derive(Debug, Clone)]
pub struct ModelSettingsBuilder {
    model_name: String,
    generation_config: Option<GenerationConfig>,
    start_day: Option<NaiveDate>,
    requests_today: u64,
    context_used: u64,
    requests_per_day: Option<u64>,
    requests_per_minute: Option<u64>,
    tokens_per_minute: Option<u64>,
    context: Option<u64>,
    raise_on_minute_limit: bool,
    table: Option<LimitTable>,
}

impl ModelSettingsBuilder {
    pub fn generation_config(mut self, config: GenerationConfig) -> Self {
        self.generation_config = Some(config);
        self
    }

    pub fn start_day(mut self, day: NaiveDate) -> Self {
        self.start_day = Some(day);
        self
    }

    pub fn requests_today(mut self, requests: u64) -> Self {
        self.requests_today = requests;
        self
    }

    pub fn context_used(mut self, tokens: u64) -> Self {
        self.context_used = tokens;
        self
    }

    pub fn requests_per_day(mut self, limit: u64) -> Self {
        self.requests_per_day = Some(limit);
        self
    }

    pub fn requests_per_minute(mut self, limit: u64) -> Self {
        self.requests_per_minute = Some(limit);
        self
    }

    pub fn tokens_per_minute(mut self, limit: u64) -> Self {
        self.tokens_per_minute = Some(limit);
        self
    }

    pub fn context_limit(mut self, limit: u64) -> Self {
        self.context = Some(limit);
        self
    }

    /// Wait out the minute window instead of raising when a per-minute
    /// budget is exhausted.
    pub fn wait_on_minute_limit(mut self) -> Self {
        self.raise_on_minute_limit = false;
        self
    }

    /// Resolve unset limits from this table instead of the bundled defaults.
    pub fn limit_table(mut self, table: LimitTable) -> Self {
        self.table = Some(table);
        self
    }

    pub fn build(self) -> Result<ModelSettings> {
        let table = self.table.as_ref().unwrap_or_else(|| limits::defaults());
        let known = table.get(&self.model_name).copied();

        let resolve = |explicit: Option<u64>,
                       from_table: Option<u64>,
                       which_limit: &'static str|
         -> Result<u64> {
            explicit.or(from_table).ok_or_else(|| Error::Config {
                which_limit,
                model_name: self.model_name.clone(),
            })
        };

        let budget = Budget {
            requests_per_day: resolve(
                self.requests_per_day,
                known.map(|l| l.requests_per_day),
                "requests_per_day_limit",
            )?,
            requests_per_minute: resolve(
                self.requests_per_minute,
                known.map(|l| l.requests_per_minute),
                "requests_per_minute_limit",
            )?,
            tokens_per_minute: resolve(
                self.tokens_per_minute,
                known.map(|l| l.tokens_per_minute),
                "tokens_per_minute_limit",
            )?,
            context: resolve(self.context, known.map(|l| l.context), "context_limit")?,
            raise_on_minute_limit: self.raise_on_minute_limit,
        };
        budget.validate()?;

        Ok(ModelSettings {
            model_name: self.model_name,
            generation_config: self.generation_config.unwrap_or_default(),
            start_day: self.start_day,
            requests_today: self.requests_today,
            context_used: self.context_used,
            budget,
        })
    }
}

/// One API key plus the model settings its client starts with.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub api_key: String,
    pub model_settings: ModelSettings,
}

impl ClientSettings {
    /// Key with the default model and bundled limits.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            api_key: api_key.into(),
            model_settings: ModelSettings::new(DEFAULT_MODEL)?,
        })
    }

    pub fn with_model_settings(api_key: impl Into<String>, model_settings: ModelSettings) -> Self {
        Self {
            api_key: api_key.into(),
            model_settings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::ModelLimits;

    #[test]
    fn test_known_model_resolves_from_bundled_table() {
        let settings = ModelSettings::new("gemini-2.0-flash").unwrap();
        assert_eq!(settings.budget.requests_per_day, 1_500);
        assert_eq!(settings.budget.requests_per_minute, 15);
        assert_eq!(settings.budget.tokens_per_minute, 1_000_000);
        assert_eq!(settings.budget.context, 1_048_576);
        assert!(settings.budget.raise_on_minute_limit);
    }

    #[test]
    fn test_suffixed_model_resolves_via_base_name() {
        let settings = ModelSettings::new("gemini-2.0-flash-001").unwrap();
        assert_eq!(settings.budget.requests_per_minute, 15);
        assert_eq!(settings.model_name, "gemini-2.0-flash-001");
    }

    #[test]
    fn test_unknown_model_without_explicit_limits_is_config_error() {
        let err = ModelSettings::new("my-finetune").unwrap_err();
        match err {
            Error::Config {
                which_limit,
                model_name,
            } => {
                assert_eq!(which_limit, "requests_per_day_limit");
                assert_eq!(model_name, "my-finetune");
            }
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn test_config_error_names_first_unresolved_limit() {
        let err = ModelSettings::builder("my-finetune")
            .requests_per_day(100)
            .requests_per_minute(5)
            .build()
            .unwrap_err();
        match err {
            Error::Config { which_limit, .. } => {
                assert_eq!(which_limit, "tokens_per_minute_limit");
            }
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn test_explicit_limits_override_table() {
        let settings = ModelSettings::builder("gemini-2.0-flash")
            .requests_per_minute(3)
            .build()
            .unwrap();
        assert_eq!(settings.budget.requests_per_minute, 3);
        // Unpinned limits still come from the table.
        assert_eq!(settings.budget.requests_per_day, 1_500);
    }

    #[test]
    fn test_unknown_model_with_all_limits_pinned_builds() {
        let settings = ModelSettings::builder("my-finetune")
            .requests_per_day(10)
            .requests_per_minute(2)
            .tokens_per_minute(5_000)
            .context_limit(8_192)
            .build()
            .unwrap();
        assert_eq!(settings.budget.context, 8_192);
    }

    #[test]
    fn test_custom_table_replaces_bundled_defaults() {
        let mut table = LimitTable::new();
        table.insert(
            "my-finetune",
            ModelLimits {
                requests_per_day: 7,
                requests_per_minute: 1,
                tokens_per_minute: 100,
                context: 1_024,
            },
        );
        let settings = ModelSettings::builder("my-finetune-001")
            .limit_table(table)
            .build()
            .unwrap();
        assert_eq!(settings.budget.requests_per_day, 7);
    }

    #[test]
    fn test_zero_limit_rejected() {
        let err = ModelSettings::builder("gemini-2.0-flash")
            .context_limit(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_client_settings_default_model() {
        let settings = ClientSettings::new("key-1").unwrap();
        assert_eq!(settings.model_settings.model_name, DEFAULT_MODEL);
        assert_eq!(settings.api_key, "key-1");
    }
}
