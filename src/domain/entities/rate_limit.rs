//! Outbound message budget

use std::time::{Duration, Instant};

/// Length of a rate limit window
pub const PERIOD: Duration = Duration::from_secs(30);
/// Messages per window for a regular account
pub const USER_MESSAGE_LIMIT: u32 = 19;
/// Messages per window for a moderator account
pub const MOD_MESSAGE_LIMIT: u32 = 99;
/// Added to the remaining window time when postponing a message
pub const RETRY_MARGIN: Duration = Duration::from_millis(500);

/// Decision for a single outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Within budget, send now
    Send,
    /// Budget exhausted, retry after this delay
    Defer(Duration),
}

/// Counts messages sent in the current window.
///
/// The window is reset lazily by the first message attempted after it expired.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window_start: Option<Instant>,
    message_count: u32,
    message_limit: u32,
    period: Duration,
    retry_margin: Duration,
}

impl RateLimiter {
    pub fn new(message_limit: u32) -> Self {
        Self {
            window_start: None,
            message_count: 0,
            message_limit,
            period: PERIOD,
            retry_margin: RETRY_MARGIN,
        }
    }

    /// Limiter with the default limit for the account type
    pub fn for_account(is_mod: bool) -> Self {
        Self::new(if is_mod { MOD_MESSAGE_LIMIT } else { USER_MESSAGE_LIMIT })
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn with_retry_margin(mut self, margin: Duration) -> Self {
        self.retry_margin = margin;
        self
    }

    pub fn message_limit(&self) -> u32 {
        self.message_limit
    }

    pub fn message_count(&self) -> u32 {
        self.message_count
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Accounts for one message at `now`.
    pub fn admit(&mut self, now: Instant) -> Admission {
        let window_start = match self.window_start {
            Some(start) if now.saturating_duration_since(start) <= self.period => start,
            previous => {
                if let Some(start) = previous {
                    tracing::debug!(
                        "Rate limiter: {} messages sent in {:?} (limit is {} msgs / {:?})",
                        self.message_count,
                        now.saturating_duration_since(start),
                        self.message_limit,
                        self.period
                    );
                }
                self.window_start = Some(now);
                self.message_count = 0;
                now
            }
        };

        if self.message_count >= self.message_limit {
            let elapsed = now.saturating_duration_since(window_start);
            let delay = self.period.saturating_sub(elapsed) + self.retry_margin;
            return Admission::Defer(delay);
        }

        self.message_count += 1;
        Admission::Send
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_follow_account_type() {
        assert_eq!(RateLimiter::for_account(false).message_limit(), 19);
        assert_eq!(RateLimiter::for_account(true).message_limit(), 99);
    }

    #[test]
    fn never_admits_more_than_limit_per_window() {
        let mut limiter = RateLimiter::new(3);
        let start = Instant::now();

        let admitted = (0..10)
            .map(|i| limiter.admit(start + Duration::from_millis(i * 100)))
            .filter(|a| *a == Admission::Send)
            .count();

        assert_eq!(admitted, 3);
    }

    #[test]
    fn deferral_waits_for_rest_of_window_plus_margin() {
        let mut limiter = RateLimiter::new(1);
        let start = Instant::now();

        assert_eq!(limiter.admit(start), Admission::Send);
        assert_eq!(
            limiter.admit(start + Duration::from_secs(10)),
            Admission::Defer(Duration::from_secs(20) + RETRY_MARGIN)
        );
    }

    #[test]
    fn window_resets_lazily_after_period() {
        let mut limiter = RateLimiter::new(1).with_period(Duration::from_secs(30));
        let start = Instant::now();

        assert_eq!(limiter.admit(start), Admission::Send);
        assert!(matches!(limiter.admit(start + Duration::from_secs(30)), Admission::Defer(_)));
        assert_eq!(limiter.admit(start + Duration::from_secs(31)), Admission::Send);
        assert_eq!(limiter.message_count(), 1);
    }
}
