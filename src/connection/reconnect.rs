/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

use std::time::Duration;
use tracing::{debug, warn};

use crate::connection::config::ReconnectionConfig;

/// What the strategist decided after a connection loss or failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPlan {
    /// Try again after `delay`.
    Retry {
        /// 1-based attempt number
        attempt: u32,
        /// Wait before the attempt
        delay: Duration,
    },
    /// The attempt ceiling was reached.
    Exhausted {
        /// Attempts made in this episode
        attempts: u32,
    },
    /// Automatic reconnection is turned off.
    Disabled,
}

/// Exponential backoff with jitter and an attempt ceiling.
///
/// `delay = min(initial * multiplier^(attempt-1), max_delay) + uniform(0, jitter_max)`
#[derive(Debug, Clone)]
pub struct ReconnectionStrategist {
    config: ReconnectionConfig,
    attempts: u32,
}

impl ReconnectionStrategist {
    /// Creates a strategist with a fresh attempt counter
    pub fn new(config: ReconnectionConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Attempts scheduled since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The configuration in use.
    pub fn config(&self) -> &ReconnectionConfig {
        &self.config
    }

    /// Starts a new episode. Called once a reconnection is verified by a heartbeat
    /// round-trip, or on an explicit user action.
    pub fn reset(&mut self) {
        if self.attempts > 0 {
            debug!("Reconnection counter reset after {} attempts", self.attempts);
        }
        self.attempts = 0;
    }

    /// Delay without jitter for the 1-based `attempt`, rounded to the millisecond.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let initial = self.config.initial_delay.as_millis() as f64;
        let max = self.config.max_delay.as_millis() as f64;
        let raw = initial * self.config.backoff_multiplier.powi(exponent);
        let capped = if raw.is_finite() { raw.min(max) } else { max };
        Duration::from_millis(capped.round() as u64)
    }

    /// Full delay for `attempt`, jitter included.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.config.jitter_enabled || self.config.jitter_max.is_zero() {
            return base;
        }
        let jitter_max = self.config.jitter_max.as_millis() as u64;
        base + Duration::from_millis(rand::random_range(0..=jitter_max))
    }

    /// Consumes one attempt and returns when to make it.
    pub fn schedule_next(&mut self) -> RetryPlan {
        if !self.config.enabled {
            debug!("Reconnection disabled");
            return RetryPlan::Disabled;
        }
        if let Some(max_attempts) = self.config.max_attempts
            && self.attempts >= max_attempts
        {
            warn!("Maximum reconnection attempts ({}) reached", max_attempts);
            return RetryPlan::Exhausted {
                attempts: self.attempts,
            };
        }
        self.attempts += 1;
        let delay = self.next_delay(self.attempts);
        debug!(
            "Reconnection attempt {} scheduled in {:?}",
            self.attempts, delay
        );
        RetryPlan::Retry {
            attempt: self.attempts,
            delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_base_delays() {
        let strategist = ReconnectionStrategist::new(ReconnectionConfig::default());
        let delays: Vec<u64> = (1..=6)
            .map(|attempt| strategist.base_delay(attempt).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 1500, 2250, 3375, 5063, 7594]);
    }

    #[test]
    fn test_delay_is_flat_at_max() {
        let strategist = ReconnectionStrategist::new(ReconnectionConfig::default());
        assert_eq!(strategist.base_delay(15), Duration::from_millis(30_000));
        assert_eq!(strategist.base_delay(40), Duration::from_millis(30_000));
        assert_eq!(strategist.base_delay(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let strategist = ReconnectionStrategist::new(ReconnectionConfig::default());
        for attempt in 1..=20 {
            let base = strategist.base_delay(attempt);
            for _ in 0..50 {
                let delay = strategist.next_delay(attempt);
                assert!(delay >= base);
                assert!(delay <= base + Duration::from_millis(1000));
            }
        }
    }

    #[test]
    fn test_no_jitter_when_disabled() {
        let config = ReconnectionConfig::default().with_jitter_enabled(false);
        let strategist = ReconnectionStrategist::new(config);
        assert_eq!(strategist.next_delay(2), Duration::from_millis(1500));
    }

    #[test]
    fn test_exhaustion_after_max_attempts() {
        let config = ReconnectionConfig::default()
            .with_max_attempts(2)
            .with_jitter_enabled(false);
        let mut strategist = ReconnectionStrategist::new(config);

        assert_eq!(
            strategist.schedule_next(),
            RetryPlan::Retry {
                attempt: 1,
                delay: Duration::from_millis(1000)
            }
        );
        assert_eq!(
            strategist.schedule_next(),
            RetryPlan::Retry {
                attempt: 2,
                delay: Duration::from_millis(1500)
            }
        );
        assert_eq!(
            strategist.schedule_next(),
            RetryPlan::Exhausted { attempts: 2 }
        );

        strategist.reset();
        assert_eq!(strategist.attempts(), 0);
        assert!(matches!(
            strategist.schedule_next(),
            RetryPlan::Retry { attempt: 1, .. }
        ));
    }

    #[test]
    fn test_disabled_never_retries() {
        let mut strategist = ReconnectionStrategist::new(ReconnectionConfig::disabled());
        assert_eq!(strategist.schedule_next(), RetryPlan::Disabled);
        assert_eq!(strategist.attempts(), 0);
    }

    #[test]
    fn test_unlimited_attempts() {
        let config = ReconnectionConfig::default().with_unlimited_attempts();
        let mut strategist = ReconnectionStrategist::new(config);
        for _ in 0..100 {
            assert!(matches!(strategist.schedule_next(), RetryPlan::Retry { .. }));
        }
        assert_eq!(strategist.attempts(), 100);
    }
}
