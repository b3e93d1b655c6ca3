use std::sync::Arc;
use std::sync::Mutex;

use chrono::DateTime;
use chrono::Utc;

/// Most recent quota report from the API's response headers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimit {
    /// Calls left in the current window.
    pub remaining: i64,

    /// When the window resets.
    pub reset: DateTime<Utc>,
}

/// Shared tracker of the API quota, updated on every response that
/// carries the rate-limit headers.
#[derive(Debug, Clone, Default)]
pub struct RateLimitTracker {
    inner: Arc<Mutex<Option<RateLimit>>>,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest quota report.
    pub fn update(&self, limit: RateLimit) {
        if let Ok(mut inner) = self.inner.lock() {
            *inner = Some(limit);
        }
    }

    /// Latest quota report, if any response has carried one yet.
    pub fn snapshot(&self) -> Option<RateLimit> {
        self.inner.lock().ok().and_then(|inner| *inner)
    }

    /// Whether the quota is known to be used up as of `now`.
    pub fn is_exhausted(&self, now: DateTime<Utc>) -> bool {
        match self.snapshot() {
            Some(limit) => limit.remaining <= 0 && now < limit.reset,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn starts_unknown() {
        let tracker = RateLimitTracker::new();
        assert_eq!(tracker.snapshot(), None);
        assert!(!tracker.is_exhausted(Utc::now()));
    }

    #[test]
    fn exhaustion_clears_after_reset() {
        let tracker = RateLimitTracker::new();
        let reset = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();
        tracker.update(RateLimit { remaining: 0, reset });

        let before = Utc.with_ymd_and_hms(2024, 1, 1, 0, 4, 0).unwrap();
        assert!(tracker.is_exhausted(before));

        let after = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 1).unwrap();
        assert!(!tracker.is_exhausted(after));
    }

    #[test]
    fn positive_remaining_is_not_exhausted() {
        let tracker = RateLimitTracker::new();
        let reset = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();
        tracker.update(RateLimit {
            remaining: 12,
            reset,
        });
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 4, 0).unwrap();
        assert!(!tracker.is_exhausted(now));
    }
}
