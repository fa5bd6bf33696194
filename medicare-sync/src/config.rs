//! Tunables for the session store and live subscriptions.

use std::time::Duration;

/// Retry schedule for role resolution.
///
/// Attempt `n` (1-based) that fails waits `initial_backoff * multiplier^(n-1)`
/// before the next one, so the defaults give 200ms then 600ms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor)
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            multiplier: 1,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            multiplier: 3,
        }
    }
}

/// Session store configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Role lookup retries
    pub retry: RetryPolicy,
    /// Identity changes buffered per `on_auth_state_change` listener
    pub auth_change_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            auth_change_capacity: 64,
        }
    }
}

/// Live subscription configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Events buffered per handle before slow listeners start lagging
    pub event_capacity: usize,
    /// Upper bound on a single remote write (None = rely on the store's own timeout)
    pub write_timeout: Option<Duration>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            event_capacity: 256,
            write_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(600));
        assert_eq!(policy.backoff(3), Duration::from_millis(1800));
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = RetryPolicy {
            max_attempts: 100,
            initial_backoff: Duration::from_secs(1),
            multiplier: 10,
        };
        // Must not panic on overflow
        let _ = policy.backoff(90);
    }

    #[test]
    fn test_sync_config_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.event_capacity, 256);
        assert!(config.write_timeout.is_none());
    }
}
