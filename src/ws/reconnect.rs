use std::time::Duration;

use backoff::backoff::Backoff;

use super::config::ReconnectConfig;

/// Linear retry pacing: attempt `i` (1-based) waits `i * step`, up to `max_attempts`.
///
/// The policy itself holds no progress; [`LinearBackoff`] carries the attempt
/// index for the controller that owns it.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub step: Duration,
}

impl ReconnectPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, step: Duration) -> Self {
        Self { max_attempts, step }
    }

    /// Delay before attempt `attempt`, or `None` once the attempts are exhausted.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        self.step.checked_mul(attempt)
    }

    /// Fresh backoff sequence starting at attempt 1.
    #[must_use]
    pub const fn backoff(&self) -> LinearBackoff {
        LinearBackoff {
            policy: *self,
            attempt: 0,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectConfig::default().into()
    }
}

impl From<ReconnectConfig> for ReconnectPolicy {
    fn from(config: ReconnectConfig) -> Self {
        Self::new(config.max_attempts, config.step)
    }
}

#[derive(Debug, Clone)]
pub struct LinearBackoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl LinearBackoff {
    /// Index of the most recently scheduled attempt, `0` before the first one.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Backoff for LinearBackoff {
    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        let next = self.attempt.saturating_add(1);
        let delay = self.policy.delay(next)?;
        self.attempt = next;
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_waits_one_two_three_seconds() {
        let policy = ReconnectPolicy::default();

        assert_eq!(policy.delay(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay(2), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay(3), Some(Duration::from_secs(3)));
        assert_eq!(policy.delay(4), None);
        assert_eq!(policy.delay(0), None);
    }

    #[test]
    fn backoff_stops_after_max_attempts() {
        let mut backoff = ReconnectPolicy::default().backoff();

        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_backoff()).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3)
            ]
        );
        assert_eq!(backoff.attempt(), 3);
        assert_eq!(backoff.next_backoff(), None, "exhausted backoff stays exhausted");
    }

    #[test]
    fn reset_reseeds_to_first_attempt() {
        let mut backoff = ReconnectPolicy::new(2, Duration::from_millis(250)).backoff();
        _ = backoff.next_backoff();
        _ = backoff.next_backoff();
        assert_eq!(backoff.next_backoff(), None);

        backoff.reset();

        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(250)));
        assert_eq!(backoff.attempt(), 1);
    }

    #[test]
    fn zero_attempts_never_retries() {
        let mut backoff = ReconnectPolicy::new(0, Duration::from_secs(1)).backoff();

        assert_eq!(backoff.next_backoff(), None);
    }
}
