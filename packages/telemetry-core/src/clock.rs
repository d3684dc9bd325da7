//! Monotonic and wall-clock time source.
//!
//! All time-dependent behavior (flush timers, retry backoff, alert cooldowns,
//! status-file freshness) is parameterized on a [`Clock`] rather than calling
//! `Instant::now()`/`SystemTime::now()` directly, so tests can substitute a
//! deterministic implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

/// A source of monotonic and wall-clock time.
pub trait Clock: Send + Sync {
    /// A monotonic instant, suitable for measuring elapsed durations.
    fn now_monotonic(&self) -> Instant;

    /// The current wall-clock time.
    fn now_utc(&self) -> DateTime<Utc>;

    /// The current Unix timestamp in milliseconds.
    fn now_millis(&self) -> u64 {
        self.now_utc().timestamp_millis().max(0) as u64
    }
}

/// Real clock backed by the OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_monotonic(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock for tests: advances only when told to.
///
/// Monotonic time is tracked as an offset from the process-start `Instant`;
/// wall-clock time is tracked as milliseconds since the Unix epoch.
pub struct FixedClock {
    start: Instant,
    monotonic_offset_ms: AtomicU64,
    wall_millis: AtomicU64,
}

impl FixedClock {
    /// Creates a clock anchored at the given wall-clock Unix-epoch milliseconds.
    pub fn new(wall_millis: u64) -> Self {
        Self {
            start: Instant::now(),
            monotonic_offset_ms: AtomicU64::new(0),
            wall_millis: AtomicU64::new(wall_millis),
        }
    }

    /// Advances both the monotonic and wall clocks by the same duration.
    pub fn advance(&self, duration: Duration) {
        self.monotonic_offset_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
        self.wall_millis
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for FixedClock {
    fn default() -> Self {
        Self::new(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
        )
    }
}

impl Clock for FixedClock {
    fn now_monotonic(&self) -> Instant {
        self.start + Duration::from_millis(self.monotonic_offset_ms.load(Ordering::SeqCst))
    }

    fn now_utc(&self) -> DateTime<Utc> {
        let millis = self.wall_millis.load(Ordering::SeqCst) as i64;
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }
}
