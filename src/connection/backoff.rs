//! Exponential reconnect backoff

use std::time::Duration;

use crate::config::ReconnectPolicy;

/// Doubling delay schedule with a ceiling and an attempt budget
#[derive(Clone, Debug)]
pub struct Backoff {
    policy: ReconnectPolicy,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    /// Start a schedule at the policy's floor
    pub fn new(policy: ReconnectPolicy) -> Self {
        Backoff {
            policy,
            current: policy.initial_delay,
            attempts: 0,
        }
    }

    /// Delay for the next attempt; advances the schedule
    ///
    /// Returns `None` once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }

        let delay = self.current;
        self.attempts += 1;
        self.current = (self.current * 2).min(self.policy.max_delay);
        Some(delay)
    }

    /// Back to the floor with a full budget
    pub fn reset(&mut self) {
        self.current = self.policy.initial_delay;
        self.attempts = 0;
    }

    /// Attempts scheduled since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the attempt budget is spent
    pub fn exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubling_sequence_with_cap() {
        let mut backoff = Backoff::new(ReconnectPolicy::default());

        let delays: Vec<u128> = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_millis())
            .collect();

        assert_eq!(
            delays,
            [2000, 4000, 8000, 16000, 32000, 60000, 60000, 60000, 60000, 60000]
        );
        assert!(backoff.exhausted());
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(ReconnectPolicy::default());
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempts(), 2);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_custom_policy() {
        let mut backoff = Backoff::new(ReconnectPolicy {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(25),
            max_attempts: 3,
        });

        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(10)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(20)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(25)));
        assert_eq!(backoff.next_delay(), None);
    }
}
