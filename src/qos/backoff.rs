//! Retry backoff strategies.

use std::time::Duration;

/// Maps a retry attempt (starting from 1) to the delay before that attempt.
///
/// Strategies must be cheap and side-effect free; the scheduler calls them
/// on every resend decision.
pub trait BackoffStrategy: Send + Sync {
    fn next_delay(&self, attempt: u32) -> Duration;
}

/// Delay grows linearly: `base * attempt`, capped at `max`.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    base: Duration,
    max: Duration,
}

impl LinearBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }
}

impl BackoffStrategy for LinearBackoff {
    fn next_delay(&self, attempt: u32) -> Duration {
        let delay = self.base.saturating_mul(attempt.max(1));
        delay.min(self.max)
    }
}

/// Delay doubles each attempt: `base * 2^(attempt-1)`, capped at `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.max(1) - 1;
        let delay = if shift >= 63 {
            self.max
        } else {
            self.base.saturating_mul(1u32 << shift.min(31))
        };
        delay.min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_shape() {
        let strategy = LinearBackoff::new(Duration::from_millis(10), Duration::from_millis(50));
        let delays: Vec<u64> = (1..=6)
            .map(|a| strategy.next_delay(a).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![10, 20, 30, 40, 50, 50]);
    }

    #[test]
    fn exponential_shape() {
        let strategy =
            ExponentialBackoff::new(Duration::from_millis(10), Duration::from_millis(80));
        let delays: Vec<u64> = (1..=5)
            .map(|a| strategy.next_delay(a).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![10, 20, 40, 80, 80]);
    }

    #[test]
    fn exponential_never_overflows() {
        let strategy = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(30));
        assert_eq!(strategy.next_delay(200), Duration::from_secs(30));
    }

    #[test]
    fn attempt_zero_treated_as_first() {
        let strategy = LinearBackoff::new(Duration::from_millis(10), Duration::from_millis(50));
        assert_eq!(strategy.next_delay(0), Duration::from_millis(10));
    }
}
