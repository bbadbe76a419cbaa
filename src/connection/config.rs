/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Configuration for the connection manager and its components.

use std::time::Duration;

use crate::utils::ChannelError;

/// Configuration for reconnection behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectionConfig {
    /// Whether automatic reconnection is enabled
    pub enabled: bool,
    /// Delay before the first reconnection attempt
    pub initial_delay: Duration,
    /// Upper bound for the exponential part of the delay
    pub max_delay: Duration,
    /// Maximum number of reconnection attempts (None for unlimited)
    pub max_attempts: Option<u32>,
    /// Growth factor applied per attempt
    pub backoff_multiplier: f64,
    /// Whether to add random jitter to delays to avoid thundering herd
    pub jitter_enabled: bool,
    /// Upper bound of the uniform jitter added to every delay
    pub jitter_max: Duration,
    /// Timeout for each connection attempt
    pub timeout: Duration,
}

/// Configuration for heartbeat monitoring
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatConfig {
    /// Whether heartbeat monitoring is enabled
    pub enabled: bool,
    /// Interval between probes on unmetered networks
    pub interval: Duration,
    /// Interval between probes on metered or cellular-like networks
    pub metered_interval: Duration,
    /// How long to wait for a probe reply
    pub timeout: Duration,
    /// Consecutive probe timeouts before the connection is suspected dead
    pub max_missed: u32,
}

/// Configuration for the outbound store-and-forward queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum number of pending items; the oldest is evicted on overflow
    pub capacity: usize,
    /// Send attempts allowed per item before it is dropped
    pub max_item_attempts: u32,
}

/// Complete configuration of a [`crate::connection::ConnectionManager`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    /// Reconnection strategy
    pub reconnection: ReconnectionConfig,
    /// Liveness probing
    pub heartbeat: HeartbeatConfig,
    /// Outbound queue bounds
    pub queue: QueueConfig,
    /// How often the session record is persisted while connected
    pub checkpoint_interval: Duration,
    /// Number of recent probe latencies kept for the quality assessment
    pub latency_window: usize,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: Some(10),
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_multiplier: 1.5,
            jitter_enabled: true,
            jitter_max: Duration::from_millis(1000),
            timeout: Duration::from_secs(30),
        }
    }
}

impl ReconnectionConfig {
    /// Creates a new reconnection config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a disabled reconnection config
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Creates a fast reconnection config for testing
    pub fn fast() -> Self {
        Self {
            enabled: true,
            max_attempts: Some(5),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 1.5,
            jitter_enabled: true,
            jitter_max: Duration::from_millis(100),
            timeout: Duration::from_secs(10),
        }
    }

    /// Creates a conservative reconnection config
    pub fn conservative() -> Self {
        Self {
            enabled: true,
            max_attempts: None,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300), // 5 minutes
            backoff_multiplier: 2.5,
            jitter_enabled: true,
            jitter_max: Duration::from_secs(5),
            timeout: Duration::from_secs(60),
        }
    }

    /// Sets whether reconnection is enabled
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the maximum number of reconnection attempts
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Retries forever
    #[must_use]
    pub fn with_unlimited_attempts(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Sets the initial delay between reconnection attempts
    #[must_use]
    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// Sets the maximum delay between reconnection attempts
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Sets the backoff multiplier
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets whether jitter is enabled
    #[must_use]
    pub fn with_jitter_enabled(mut self, jitter_enabled: bool) -> Self {
        self.jitter_enabled = jitter_enabled;
        self
    }

    /// Sets the jitter upper bound
    #[must_use]
    pub fn with_jitter_max(mut self, jitter_max: Duration) -> Self {
        self.jitter_max = jitter_max;
        self
    }

    /// Sets the connection timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max_attempts) = self.max_attempts
            && max_attempts == 0
        {
            return Err("max_attempts must be greater than 0".to_string());
        }

        if self.initial_delay.is_zero() {
            return Err("initial_delay must be greater than 0".to_string());
        }

        if self.max_delay < self.initial_delay {
            return Err("max_delay must be greater than or equal to initial_delay".to_string());
        }

        if self.backoff_multiplier < 1.0 {
            return Err("backoff_multiplier must be at least 1.0".to_string());
        }

        if self.timeout.is_zero() {
            return Err("timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(15),
            metered_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            max_missed: 3,
        }
    }
}

impl HeartbeatConfig {
    /// Creates a new heartbeat config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a disabled heartbeat config
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Creates a fast heartbeat config for testing
    pub fn fast() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(1),
            metered_interval: Duration::from_secs(2),
            timeout: Duration::from_millis(500),
            max_missed: 2,
        }
    }

    /// Sets whether heartbeat is enabled
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the heartbeat interval
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the heartbeat interval used on metered networks
    #[must_use]
    pub fn with_metered_interval(mut self, interval: Duration) -> Self {
        self.metered_interval = interval;
        self
    }

    /// Sets the heartbeat timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the maximum number of missed heartbeats
    #[must_use]
    pub fn with_max_missed(mut self, max_missed: u32) -> Self {
        self.max_missed = max_missed;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.interval.is_zero() || self.metered_interval.is_zero() {
            return Err("interval must be greater than 0".to_string());
        }

        if self.timeout.is_zero() {
            return Err("timeout must be greater than 0".to_string());
        }

        if self.timeout >= self.interval {
            return Err("timeout must be less than interval".to_string());
        }

        if self.max_missed == 0 {
            return Err("max_missed must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            max_item_attempts: 5,
        }
    }
}

impl QueueConfig {
    /// Sets the queue capacity
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the per-item retry ceiling
    #[must_use]
    pub fn with_max_item_attempts(mut self, attempts: u32) -> Self {
        self.max_item_attempts = attempts;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("capacity must be greater than 0".to_string());
        }
        if self.max_item_attempts == 0 {
            return Err("max_item_attempts must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reconnection: ReconnectionConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            queue: QueueConfig::default(),
            checkpoint_interval: Duration::from_secs(60),
            latency_window: 5,
        }
    }
}

impl ChannelConfig {
    /// Creates a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the reconnection configuration
    #[must_use]
    pub fn reconnection(mut self, reconnection: ReconnectionConfig) -> Self {
        self.reconnection = reconnection;
        self
    }

    /// Sets the heartbeat configuration
    #[must_use]
    pub fn heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Sets the queue configuration
    #[must_use]
    pub fn queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Sets the session checkpoint interval
    #[must_use]
    pub fn checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Sets the number of probe latencies averaged by the quality assessment
    #[must_use]
    pub fn latency_window(mut self, window: usize) -> Self {
        self.latency_window = window;
        self
    }

    /// Validates every section of the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Config`] naming the offending section.
    pub fn validate(&self) -> Result<(), ChannelError> {
        self.reconnection
            .validate()
            .map_err(|e| ChannelError::Config(format!("reconnection: {e}")))?;
        self.heartbeat
            .validate()
            .map_err(|e| ChannelError::Config(format!("heartbeat: {e}")))?;
        self.queue
            .validate()
            .map_err(|e| ChannelError::Config(format!("queue: {e}")))?;
        if self.checkpoint_interval.is_zero() {
            return Err(ChannelError::Config(
                "checkpoint_interval must be greater than 0".to_string(),
            ));
        }
        if self.latency_window == 0 {
            return Err(ChannelError::Config(
                "latency_window must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = ChannelConfig::default();
        assert_eq!(config.reconnection.initial_delay, Duration::from_millis(1000));
        assert_eq!(config.reconnection.max_delay, Duration::from_millis(30_000));
        assert_eq!(config.reconnection.backoff_multiplier, 1.5);
        assert_eq!(config.reconnection.jitter_max, Duration::from_millis(1000));
        assert_eq!(config.heartbeat.interval, Duration::from_secs(15));
        assert_eq!(config.heartbeat.metered_interval, Duration::from_secs(30));
        assert_eq!(config.heartbeat.timeout, Duration::from_secs(5));
        assert_eq!(config.heartbeat.max_missed, 3);
        assert_eq!(config.queue.max_item_attempts, 5);
        assert_eq!(config.checkpoint_interval, Duration::from_secs(60));
        assert_eq!(config.latency_window, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reconnection_validation() {
        assert!(ReconnectionConfig::fast().validate().is_ok());
        assert!(ReconnectionConfig::conservative().validate().is_ok());

        let zero_attempts = ReconnectionConfig::default().with_max_attempts(0);
        assert_eq!(
            zero_attempts.validate(),
            Err("max_attempts must be greater than 0".to_string())
        );

        let inverted = ReconnectionConfig::default()
            .with_initial_delay(Duration::from_secs(10))
            .with_max_delay(Duration::from_secs(1));
        assert!(inverted.validate().is_err());

        let shrinking = ReconnectionConfig::default().with_backoff_multiplier(0.5);
        assert!(shrinking.validate().is_err());
    }

    #[test]
    fn test_heartbeat_validation() {
        assert!(HeartbeatConfig::fast().validate().is_ok());

        let slow_timeout = HeartbeatConfig::default()
            .with_interval(Duration::from_secs(1))
            .with_timeout(Duration::from_secs(2));
        assert_eq!(
            slow_timeout.validate(),
            Err("timeout must be less than interval".to_string())
        );

        let no_misses = HeartbeatConfig::default().with_max_missed(0);
        assert!(no_misses.validate().is_err());
    }

    #[test]
    fn test_channel_config_reports_section() {
        let config = ChannelConfig::new().queue(QueueConfig::default().with_capacity(0));
        match config.validate() {
            Err(ChannelError::Config(message)) => assert!(message.starts_with("queue:")),
            other => panic!("unexpected validation result: {other:?}"),
        }
    }

    #[test]
    fn test_builder_chain() {
        let config = ChannelConfig::new()
            .reconnection(ReconnectionConfig::fast().with_unlimited_attempts())
            .heartbeat(HeartbeatConfig::fast().with_max_missed(4))
            .checkpoint_interval(Duration::from_secs(5))
            .latency_window(8);
        assert_eq!(config.reconnection.max_attempts, None);
        assert_eq!(config.heartbeat.max_missed, 4);
        assert_eq!(config.checkpoint_interval, Duration::from_secs(5));
        assert_eq!(config.latency_window, 8);
    }
}
