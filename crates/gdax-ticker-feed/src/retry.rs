/*
[INPUT]:  Consecutive failed connect or session attempts
[OUTPUT]: Capped exponential reconnect delays
[POS]:    Runtime layer - reconnect backoff
[UPDATE]: When changing the backoff curve or its reset rule
*/

use std::time::Duration;

use crate::config::RetryConfig;

/// Doubling backoff with a ceiling. The attempt counter resets on every
/// successful open.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    initial: Duration,
    max: Duration,
    attempts: u32,
}

impl RetryScheduler {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            attempts: 0,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.initial_delay(), config.max_delay())
    }

    /// Delay before the next attempt; counts the attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = backoff_duration(self.attempts, self.initial, self.max);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

pub fn backoff_duration(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let factor = 1u32 << attempt.min(31);
    initial.saturating_mul(factor).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 1)]
    #[case(1, 2)]
    #[case(2, 4)]
    #[case(6, 64)]
    #[case(7, 120)]
    #[case(40, 120)]
    fn backoff_doubles_then_clamps_at_120s(#[case] attempt: u32, #[case] expected_secs: u64) {
        assert_eq!(
            backoff_duration(attempt, Duration::from_secs(1), Duration::from_secs(120)),
            Duration::from_secs(expected_secs)
        );
    }

    #[test]
    fn next_delay_is_non_decreasing_up_to_cap() {
        let mut retry = RetryScheduler::new(Duration::from_millis(100), Duration::from_secs(2));
        let mut previous = Duration::ZERO;

        for _ in 0..20 {
            let delay = retry.next_delay();
            assert!(delay >= previous);
            assert!(delay <= Duration::from_secs(2));
            previous = delay;
        }
        assert_eq!(previous, Duration::from_secs(2));
        assert_eq!(retry.attempts(), 20);
    }

    #[test]
    fn reset_returns_to_initial_delay() {
        let mut retry = RetryScheduler::new(Duration::from_secs(1), Duration::from_secs(120));
        retry.next_delay();
        retry.next_delay();
        assert_eq!(retry.next_delay(), Duration::from_secs(4));

        retry.reset();
        assert_eq!(retry.attempts(), 0);
        assert_eq!(retry.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn max_below_initial_is_raised_to_initial() {
        let mut retry = RetryScheduler::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(retry.next_delay(), Duration::from_secs(5));
        assert_eq!(retry.next_delay(), Duration::from_secs(5));
    }
}
