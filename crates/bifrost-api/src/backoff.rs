//! Reconnect policy shared by every long-lived connection in the bridge.
//!
//! The bus listener and each controller handle run their own retry loop
//! with their own attempt counter, but they all draw delays from the same
//! [`ReconnectConfig`]: exponential growth from `initial_delay`, capped at
//! `max_delay`, with full jitter so a broker restart does not make every
//! client reconnect in lockstep. There is no retry limit: a bridge that
//! stops retrying can only be revived by a restart.

use std::time::Duration;

use rand::Rng;

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Base delay for the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Upper bound of the delay window for a given attempt.
///
/// `ceiling = min(initial * 2^attempt, max)`
pub fn backoff_ceiling(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exp = 2.0_f64.powf(f64::from(attempt.min(31)));
    let base = config.initial_delay.as_secs_f64() * exp;
    Duration::from_secs_f64(base.min(config.max_delay.as_secs_f64()))
}

/// Exponential backoff with full jitter.
///
/// The delay is drawn uniformly from `[0, ceiling]`.
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    calculate_backoff_with(attempt, config, &mut rand::thread_rng())
}

/// [`calculate_backoff`] with a caller-supplied random source.
pub fn calculate_backoff_with<R: Rng + ?Sized>(
    attempt: u32,
    config: &ReconnectConfig,
    rng: &mut R,
) -> Duration {
    let ceiling = backoff_ceiling(attempt, config).as_secs_f64();
    Duration::from_secs_f64(rng.gen_range(0.0..=ceiling))
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn ceiling_doubles_until_capped() {
        let config = ReconnectConfig::default();

        assert_eq!(backoff_ceiling(0, &config), Duration::from_secs(1));
        assert_eq!(backoff_ceiling(1, &config), Duration::from_secs(2));
        assert_eq!(backoff_ceiling(3, &config), Duration::from_secs(8));
        assert_eq!(backoff_ceiling(5, &config), Duration::from_secs(30));
        assert_eq!(backoff_ceiling(1000, &config), Duration::from_secs(30));
    }

    #[test]
    fn jittered_delay_stays_inside_window() {
        let config = ReconnectConfig::default();
        let mut rng = StdRng::seed_from_u64(7);

        for attempt in 0..12 {
            let ceiling = backoff_ceiling(attempt, &config);
            for _ in 0..50 {
                let delay = calculate_backoff_with(attempt, &config, &mut rng);
                assert!(
                    delay <= ceiling,
                    "attempt {attempt}: {delay:?} exceeds ceiling {ceiling:?}"
                );
            }
        }
    }

    #[test]
    fn jitter_actually_spreads_delays() {
        let config = ReconnectConfig::default();
        let mut rng = StdRng::seed_from_u64(42);

        let delays: Vec<Duration> = (0..20)
            .map(|_| calculate_backoff_with(4, &config, &mut rng))
            .collect();
        let first = delays[0];
        assert!(delays.iter().any(|d| *d != first));
    }
}
