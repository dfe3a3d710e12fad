// ── Reconnect backoff policy ──
//
// Shared by every change-feed subscriber: exponential delay, capped,
// with deterministic jitter, and a bounded attempt budget after which
// the subscriber enters degraded (polling-only) mode.

use std::time::Duration;

/// Exponential backoff configuration for feed resubscription.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first resubscription attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Attempts before the subscriber gives up and signals degraded
    /// mode. Default: 6.
    pub max_retries: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: 6,
        }
    }
}

/// Backoff delay for the given attempt (0-based).
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is ±25%, seeded deterministically from the attempt number so
/// tests are reproducible while still spreading resubscription storms.
pub fn backoff_delay(attempt: u32, config: &ReconnectConfig) -> Duration {
    #[allow(clippy::cast_possible_wrap, clippy::as_conversions)]
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(attempt.min(30) as i32);
    let capped = base.min(config.max_delay.as_secs_f64());

    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.max_retries, 6);
    }

    #[test]
    fn delay_increases_exponentially() {
        let config = ReconnectConfig::default();

        let d0 = backoff_delay(0, &config);
        let d1 = backoff_delay(1, &config);
        let d2 = backoff_delay(2, &config);

        // Each step should roughly double (within jitter bounds)
        assert!(d1 > d0, "d1 ({d1:?}) should be greater than d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should be greater than d1 ({d1:?})");
    }

    #[test]
    fn delay_caps_at_max() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_retries: 6,
        };

        // With jitter factor up to 1.25, max effective is 12.5s
        let d10 = backoff_delay(10, &config);
        assert!(
            d10 <= Duration::from_secs(13),
            "delay at attempt 10 ({d10:?}) should be capped near max_delay"
        );
    }

    #[test]
    fn delay_is_deterministic_per_attempt() {
        let config = ReconnectConfig::default();
        assert_eq!(backoff_delay(3, &config), backoff_delay(3, &config));
    }

    #[test]
    fn huge_attempt_numbers_do_not_overflow() {
        let config = ReconnectConfig::default();
        let d = backoff_delay(u32::MAX, &config);
        assert!(d <= Duration::from_secs(38));
    }
}
