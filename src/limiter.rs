//! Budget enforcement and usage accounting for one `(api_key, model)` pair.
//!
//! [`RateLimiter`] owns four budgets: requests per day, requests per minute,
//! tokens per minute, and context tokens per conversation. Every request
//! pre-increments the counters via [`RateLimiter::reserve`], which then rolls
//! expired windows and validates. When a minute budget is exhausted the
//! limiter either raises [`Error::MinuteLimitExceeded`] or waits out the
//! remainder of the window, depending on [`Budget::raise_on_minute_limit`].
//! Output tokens are metered against the context budget only, via
//! [`RateLimiter::record_output`].
//!
//! Counters sit behind a mutex so sessions running on different threads (or
//! tasks) can share a limiter; the lock is never held across a wait or a
//! transport call.
//!
//! All limit comparisons are strict `>` after the pre-increment: a limit of
//! N admits N requests per window, and the N+1-th either raises or waits.
//! Under the wait policy the triggering request becomes the first request of
//! the fresh window and succeeds.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};

/// Length of the rolling minute window.
const MINUTE_WINDOW: Duration = Duration::from_secs(60);

/// Budget ceilings for one limiter. All numeric limits must be strictly
/// positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub requests_per_day: u64,
    pub requests_per_minute: u64,
    pub tokens_per_minute: u64,
    /// Input + output tokens accumulated within one conversation.
    pub context: u64,
    /// Raise `MinuteLimitExceeded` instead of waiting out the window.
    pub raise_on_minute_limit: bool,
}

impl Budget {
    pub(crate) fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("requests_per_day_limit", self.requests_per_day),
            ("requests_per_minute_limit", self.requests_per_minute),
            ("tokens_per_minute_limit", self.tokens_per_minute),
            ("context_limit", self.context),
        ] {
            if value == 0 {
                return Err(Error::InvalidArgument(format!(
                    "{name} must be strictly positive"
                )));
            }
        }
        Ok(())
    }
}

/// The persistable slice of a limiter's counters.
///
/// Minute-window state is process-local (it is anchored to a monotonic
/// instant) and restarts on restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub day_anchor: NaiveDate,
    pub requests_today: u64,
    pub context_tokens: u64,
}

#[derive(Debug)]
struct Counters {
    day_anchor: NaiveDate,
    requests_today: u64,
    /// Monotonic reading at which the current minute window started.
    minute_anchor: Duration,
    requests_this_minute: u64,
    tokens_this_minute: u64,
    context_tokens: u64,
}

/// Current context usage and limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContextUsage {
    pub context_used: u64,
    pub context_limit: u64,
}

/// Current per-day usage and limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayUsage {
    pub used_requests: u64,
    pub requests_limit: u64,
    pub date: NaiveDate,
}

/// Current per-minute usage and limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MinuteUsage {
    pub used_requests: u64,
    pub requests_limit: u64,
    pub used_tokens: u64,
    pub tokens_limit: u64,
}

/// Four-budget limiter for one `(api_key, model)` pair.
#[derive(Debug)]
pub struct RateLimiter {
    budget: Budget,
    counters: Mutex<Counters>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Fresh limiter: day anchored to today, all counters zero.
    pub fn new(budget: Budget, clock: Arc<dyn Clock>) -> Self {
        let snapshot = UsageSnapshot {
            day_anchor: clock.today(),
            requests_today: 0,
            context_tokens: 0,
        };
        Self::with_usage(budget, snapshot, clock)
    }

    /// Limiter seeded from a persisted [`UsageSnapshot`]. The minute window
    /// starts fresh.
    pub fn with_usage(budget: Budget, snapshot: UsageSnapshot, clock: Arc<dyn Clock>) -> Self {
        let counters = Counters {
            day_anchor: snapshot.day_anchor,
            requests_today: snapshot.requests_today,
            minute_anchor: clock.monotonic(),
            requests_this_minute: 0,
            tokens_this_minute: 0,
            context_tokens: snapshot.context_tokens,
        };
        Self {
            budget,
            counters: Mutex::new(counters),
            clock,
        }
    }

    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    /// Account one request consuming `input_tokens`, then validate.
    ///
    /// Blocks the current thread for the remainder of the minute window when
    /// a minute budget is exhausted and `raise_on_minute_limit` is false.
    pub fn reserve(&self, input_tokens: u64) -> Result<()> {
        match self.pre_account(input_tokens)? {
            None => Ok(()),
            Some(wait) => {
                warn!(
                    wait_secs = wait.as_secs_f64(),
                    "minute budget exhausted; blocking until the window rolls"
                );
                self.clock.sleep(wait);
                self.restart_window(input_tokens);
                Ok(())
            }
        }
    }

    /// Async variant of [`RateLimiter::reserve`]: suspends cooperatively
    /// instead of blocking.
    pub async fn reserve_async(&self, input_tokens: u64) -> Result<()> {
        match self.pre_account(input_tokens)? {
            None => Ok(()),
            Some(wait) => {
                warn!(
                    wait_secs = wait.as_secs_f64(),
                    "minute budget exhausted; suspending until the window rolls"
                );
                self.clock.sleep_async(wait).await;
                self.restart_window(input_tokens);
                Ok(())
            }
        }
    }

    /// Meter `output_tokens` against the context budget.
    ///
    /// Minute and day counters are untouched; output tokens do not count
    /// against per-minute budgets.
    pub fn record_output(&self, output_tokens: u64) -> Result<()> {
        let mut counters = self.lock();
        counters.context_tokens += output_tokens;
        if counters.context_tokens > self.budget.context {
            return Err(Error::ContextLimitExceeded);
        }
        Ok(())
    }

    /// True iff the next `reserve` will not immediately fail with
    /// `DayLimitExceeded`: either the anchored day is over (the next reserve
    /// rolls the day) or today's request count is below the limit.
    pub fn has_daily_capacity(&self) -> bool {
        let counters = self.lock();
        counters.day_anchor != self.clock.today()
            || counters.requests_today < self.budget.requests_per_day
    }

    /// Reset context usage to zero.
    pub fn clear_context(&self) {
        self.lock().context_tokens = 0;
    }

    /// Overwrite context usage (used when a conversation's history is
    /// replaced wholesale).
    pub fn set_context(&self, tokens: u64) {
        self.lock().context_tokens = tokens;
    }

    /// Subtract `tokens` from context usage. Fails without changing the
    /// counter if the result would be negative.
    pub fn decrease_context(&self, tokens: u64) -> Result<()> {
        let mut counters = self.lock();
        counters.context_tokens = counters.context_tokens.checked_sub(tokens).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "cannot decrease context usage below zero ({} - {tokens})",
                counters.context_tokens
            ))
        })?;
        Ok(())
    }

    /// Saturate today's request counter, vetoing further use for the day.
    pub fn exhaust_day(&self) {
        let today = self.clock.today();
        let mut counters = self.lock();
        counters.day_anchor = today;
        counters.requests_today = self.budget.requests_per_day;
    }

    /// Saturate the minute counters, vetoing further use for a full window.
    pub fn exhaust_minute(&self) {
        let now = self.clock.monotonic();
        let mut counters = self.lock();
        counters.minute_anchor = now;
        counters.requests_this_minute = self.budget.requests_per_minute;
        counters.tokens_this_minute = self.budget.tokens_per_minute;
    }

    pub fn context_usage(&self) -> ContextUsage {
        let counters = self.lock();
        ContextUsage {
            context_used: counters.context_tokens,
            context_limit: self.budget.context,
        }
    }

    pub fn day_usage(&self) -> DayUsage {
        let counters = self.lock();
        DayUsage {
            used_requests: counters.requests_today,
            requests_limit: self.budget.requests_per_day,
            date: counters.day_anchor,
        }
    }

    pub fn minute_usage(&self) -> MinuteUsage {
        let counters = self.lock();
        MinuteUsage {
            used_requests: counters.requests_this_minute,
            requests_limit: self.budget.requests_per_minute,
            used_tokens: counters.tokens_this_minute,
            tokens_limit: self.budget.tokens_per_minute,
        }
    }

    /// Persistable counter state.
    pub fn snapshot(&self) -> UsageSnapshot {
        let counters = self.lock();
        UsageSnapshot {
            day_anchor: counters.day_anchor,
            requests_today: counters.requests_today,
            context_tokens: counters.context_tokens,
        }
    }

    /// Increment counters for one request, roll expired windows, validate.
    ///
    /// Returns `Some(wait)` when a minute budget is exhausted and the policy
    /// is to wait; the caller sleeps without holding the lock and then calls
    /// [`RateLimiter::restart_window`].
    fn pre_account(&self, input_tokens: u64) -> Result<Option<Duration>> {
        let now = self.clock.monotonic();
        let today = self.clock.today();
        let mut counters = self.lock();

        counters.requests_today += 1;
        counters.requests_this_minute += 1;
        counters.tokens_this_minute += input_tokens;
        counters.context_tokens += input_tokens;

        if counters.day_anchor == today && counters.requests_today > self.budget.requests_per_day {
            return Err(Error::DayLimitExceeded);
        }
        if counters.context_tokens > self.budget.context {
            return Err(Error::ContextLimitExceeded);
        }

        let elapsed = now.saturating_sub(counters.minute_anchor);
        if elapsed < MINUTE_WINDOW {
            if counters.requests_today > self.budget.requests_per_day {
                // First request past midnight after an exhausted day: roll
                // the day and skip the minute check for this request.
                counters.requests_today = 1;
                counters.day_anchor = today;
            } else if counters.requests_this_minute > self.budget.requests_per_minute
                || counters.tokens_this_minute > self.budget.tokens_per_minute
            {
                if self.budget.raise_on_minute_limit {
                    return Err(Error::MinuteLimitExceeded);
                }
                return Ok(Some(MINUTE_WINDOW - elapsed));
            }
        } else {
            counters.requests_this_minute = 1;
            counters.tokens_this_minute = input_tokens;
            counters.minute_anchor = now;
        }

        debug!(
            input_tokens,
            requests_today = counters.requests_today,
            requests_this_minute = counters.requests_this_minute,
            tokens_this_minute = counters.tokens_this_minute,
            context_tokens = counters.context_tokens,
            "request reserved"
        );
        Ok(None)
    }

    /// Start a fresh minute window accounting only the request that waited.
    fn restart_window(&self, input_tokens: u64) {
        let now = self.clock.monotonic();
        let mut counters = self.lock();
        counters.requests_this_minute = 1;
        counters.tokens_this_minute = input_tokens;
        counters.minute_anchor = now;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
