// ABOUTME: Exponential reconnect delays for chat sources: base * 2^attempt, capped, bounded attempts
// ABOUTME: A run that stayed up long enough resets the failure count

use std::time::Duration;
use streamtalk_core::config::ChatConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failures tolerated before the source is abandoned
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        (&ChatConfig::default()).into()
    }
}

impl From<&ChatConfig> for BackoffConfig {
    fn from(config: &ChatConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.reconnect_delay_ms),
            max_delay: Duration::from_millis(config.reconnect_max_delay_ms.max(config.reconnect_delay_ms)),
            max_attempts: config.reconnect_attempts.max(1),
        }
    }
}

#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    failures: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Count a failure and return the wait before the next attempt,
    /// or None once the attempt budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.failures >= self.config.max_attempts {
            return None;
        }
        let exponent = self.failures.min(16);
        self.failures += 1;
        let delay = self.config.base_delay.saturating_mul(1u32 << exponent);
        Some(delay.min(self.config.max_delay))
    }

    /// Runs at least this long count as healthy
    pub fn stable_after(&self) -> Duration {
        self.config.max_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_attempts: u32) -> BackoffConfig {
        BackoffConfig {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(20),
            max_attempts,
        }
    }

    #[test]
    fn test_delays_double_until_capped() {
        let mut backoff = Backoff::new(config(10));
        let delays: Vec<u64> = (0..6)
            .map(|_| backoff.next_delay().unwrap().as_secs())
            .collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 20, 20]);
    }

    #[test]
    fn test_attempts_are_bounded() {
        let mut backoff = Backoff::new(config(2));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.failures(), 2);
    }

    #[test]
    fn test_reset_starts_from_base_delay() {
        let mut backoff = Backoff::new(config(5));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_from_chat_config() {
        let chat = ChatConfig {
            reconnect_attempts: 0,
            ..ChatConfig::default()
        };
        let config = BackoffConfig::from(&chat);
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.base_delay, Duration::from_secs(2));
    }
}
