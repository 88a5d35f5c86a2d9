//! Monotonic-ish millisecond timestamps used by session expiry and queue
//! staleness checks. Backed by `SystemTime` rather than `Instant` since
//! tests construct timestamps directly without a running clock.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimestampMs(pub u64);

impl TimestampMs {
    pub fn now() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(now.as_millis() as u64)
    }

    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub fn checked_sub(self, earlier: TimestampMs) -> Option<Duration> {
        self.0
            .checked_sub(earlier.0)
            .map(Duration::from_millis)
    }

    pub fn saturating_add(self, d: Duration) -> Self {
        Self(self.0.saturating_add(d.as_millis() as u64))
    }
}
