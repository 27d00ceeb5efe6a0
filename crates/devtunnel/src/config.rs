//! Connector configuration.

use std::time::Duration;

use devtunnel_core::config::TunnelSettings;

/// Fixed-delay retry policy for dialing a freshly forwarded port.
///
/// The wait is for the bridge daemon to finish wiring the forward, which takes
/// a short and roughly constant time, so the delay does not grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Dial attempts before giving up. At least one attempt is always made.
    pub max_attempts: u32,
    /// Pause between two attempts. Not applied after the last one.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Attempts that will actually be made.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Whether a pause follows attempt `attempt` (1-based).
    pub fn sleeps_after(&self, attempt: u32) -> bool {
        attempt < self.attempts()
    }

    /// Upper bound on time spent sleeping between attempts.
    pub fn total_delay(&self) -> Duration {
        self.delay.saturating_mul(self.attempts() - 1)
    }
}

/// Configuration for a [`Connector`](crate::Connector).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectorConfig {
    pub retry: RetryPolicy,
    /// How long the readiness probe waits for the first byte. `None` waits
    /// until the remote side writes or hangs up.
    pub probe_timeout: Option<Duration>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            probe_timeout: Some(Duration::from_secs(5)),
        }
    }
}

impl From<&TunnelSettings> for ConnectorConfig {
    fn from(settings: &TunnelSettings) -> Self {
        Self {
            retry: RetryPolicy {
                max_attempts: settings.max_attempts,
                delay: settings.retry_delay(),
            },
            probe_timeout: settings.probe_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_thirty_one_second_attempts() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts(), 30);
        assert_eq!(policy.delay, Duration::from_secs(1));
        assert_eq!(policy.total_delay(), Duration::from_secs(29));
    }

    #[test]
    fn no_sleep_after_last_attempt() {
        let policy = RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(100),
        };
        assert!(policy.sleeps_after(1));
        assert!(policy.sleeps_after(2));
        assert!(!policy.sleeps_after(3));
    }

    #[test]
    fn zero_attempts_still_dials_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            delay: Duration::from_secs(1),
        };
        assert_eq!(policy.attempts(), 1);
        assert!(!policy.sleeps_after(1));
        assert_eq!(policy.total_delay(), Duration::ZERO);
    }

    #[test]
    fn built_from_settings() {
        let settings = TunnelSettings {
            max_attempts: 4,
            retry_delay_ms: 250,
            probe_timeout_ms: None,
        };
        let config = ConnectorConfig::from(&settings);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.delay, Duration::from_millis(250));
        assert_eq!(config.probe_timeout, None);
    }
}
