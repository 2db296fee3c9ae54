//! Time service abstraction
//!
//! No component in the runtime reads the system clock directly. Everything
//! that needs "now" takes an `Arc<dyn TimeService>`, so tests can substitute
//! [`ManualTimeService`] and drive cooldowns, windows, and retention
//! deterministically.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Source of the current time.
pub trait TimeService: Send + Sync {
    /// Current time, timezone-aware (UTC).
    fn now(&self) -> DateTime<Utc>;

    /// Current time as an ISO8601/RFC3339 string.
    fn now_iso(&self) -> String {
        self.now().to_rfc3339()
    }

    /// Current time as float seconds since the Unix epoch.
    fn timestamp(&self) -> f64 {
        let now = self.now();
        now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
    }
}

/// Production time service backed by the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeService;

impl SystemTimeService {
    pub fn new() -> Self {
        Self
    }
}

impl TimeService for SystemTimeService {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced time service for tests.
pub struct ManualTimeService {
    now: Mutex<DateTime<Utc>>,
}

impl ManualTimeService {
    /// Create a manual clock starting at the given instant.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Create a manual clock starting at the real current time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = *now + by;
    }

    /// Advance the clock by whole seconds.
    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }

    /// Set the clock to an absolute instant.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Default for ManualTimeService {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeService for ManualTimeService {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
