//! Injectable time sources.
//!
//! Budget windows depend on two notions of "now": the calendar day in a
//! fixed reference timezone (daily budgets) and a monotonic instant (minute
//! windows). Both come from a [`Clock`] so that window rolls and the
//! wait-out-the-minute path are deterministically testable. [`SystemClock`]
//! is the production implementation; [`ManualClock`] advances only when told
//! to and is what the test suites use.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use chrono_tz::Tz;

/// Timezone used for daily budget boundaries unless overridden.
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::New_York;

/// Time capability used by the limiter: calendar day, monotonic elapsed
/// time, and both suspension primitives.
#[async_trait]
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic elapsed time since an arbitrary fixed origin.
    fn monotonic(&self) -> Duration;

    /// Calendar date in the reference timezone.
    fn today(&self) -> NaiveDate;

    /// Block the current thread for `duration`.
    fn sleep(&self, duration: Duration);

    /// Cooperatively suspend for `duration`.
    async fn sleep_async(&self, duration: Duration);
}

/// Wall-clock implementation over `std::time::Instant` and chrono-tz.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
    tz: Tz,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::with_timezone(DEFAULT_TIMEZONE)
    }

    /// Use a different reference timezone for day boundaries.
    pub fn with_timezone(tz: Tz) -> Self {
        Self {
            origin: Instant::now(),
            tz,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn monotonic(&self) -> Duration {
        self.origin.elapsed()
    }

    fn today(&self) -> NaiveDate {
        chrono::Utc::now().with_timezone(&self.tz).date_naive()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    async fn sleep_async(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A clock that only moves when told to.
///
/// `sleep` / `sleep_async` advance the monotonic reading by the requested
/// duration instead of suspending, so limiter wait paths run instantly and
/// deterministically under test. The calendar date is set explicitly via
/// [`ManualClock::set_today`].
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

#[derive(Debug)]
struct ManualState {
    now: Duration,
    today: NaiveDate,
}

impl ManualClock {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: Duration::ZERO,
                today,
            }),
        }
    }

    /// Move the monotonic reading forward.
    pub fn advance(&self, by: Duration) {
        self.state.lock().expect("clock state lock poisoned").now += by;
    }

    /// Set the calendar date returned by `today`.
    pub fn set_today(&self, today: NaiveDate) {
        self.state.lock().expect("clock state lock poisoned").today = today;
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn monotonic(&self) -> Duration {
        self.state.lock().expect("clock state lock poisoned").now
    }

    fn today(&self) -> NaiveDate {
        self.state.lock().expect("clock state lock poisoned").today
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }

    async fn sleep_async(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_manual_clock_starts_at_zero() {
        let clock = ManualClock::new(day(2025, 3, 1));
        assert_eq!(clock.monotonic(), Duration::ZERO);
        assert_eq!(clock.today(), day(2025, 3, 1));
    }

    #[test]
    fn test_manual_clock_advance_accumulates() {
        let clock = ManualClock::new(day(2025, 3, 1));
        clock.advance(Duration::from_secs(30));
        clock.advance(Duration::from_millis(500));
        assert_eq!(clock.monotonic(), Duration::from_millis(30_500));
    }

    #[test]
    fn test_manual_clock_sleep_advances_instead_of_blocking() {
        let clock = ManualClock::new(day(2025, 3, 1));
        let started = Instant::now();
        clock.sleep(Duration::from_secs(3600));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(clock.monotonic(), Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_manual_clock_async_sleep_advances() {
        let clock = ManualClock::new(day(2025, 3, 1));
        clock.sleep_async(Duration::from_secs(60)).await;
        assert_eq!(clock.monotonic(), Duration::from_secs(60));
    }

    #[test]
    fn test_manual_clock_set_today() {
        let clock = ManualClock::new(day(2025, 3, 1));
        clock.set_today(day(2025, 3, 2));
        assert_eq!(clock.today(), day(2025, 3, 2));
    }

    #[test]
    fn test_system_clock_monotonic_is_nondecreasing() {
        let clock = SystemClock::new();
        let a = clock.monotonic();
        let b = clock.monotonic();
        assert!(b >= a);
    }

    #[test]
    fn test_system_clock_default_timezone() {
        let clock = SystemClock::new();
        assert_eq!(clock.timezone(), DEFAULT_TIMEZONE);
    }
}
