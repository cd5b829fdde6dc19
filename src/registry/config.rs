//! Registry configuration

use std::time::Duration;

use crate::dispatch::DispatcherConfig;
use crate::error::{Error, Result};

/// Configuration for the channel registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Configuration every new channel's dispatcher starts from
    pub dispatcher: DispatcherConfig,

    /// How long a channel may sit without receivers or prosumers before
    /// cleanup removes it
    pub idle_channel_timeout: Duration,

    /// Interval between cleanup runs
    pub cleanup_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            dispatcher: DispatcherConfig::default(),
            idle_channel_timeout: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(10),
        }
    }
}

impl RegistryConfig {
    /// Set the dispatcher configuration for new channels
    pub fn dispatcher(mut self, config: DispatcherConfig) -> Self {
        self.dispatcher = config;
        self
    }

    /// Set the idle channel timeout
    pub fn idle_channel_timeout(mut self, timeout: Duration) -> Self {
        self.idle_channel_timeout = timeout;
        self
    }

    /// Set the cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Check the configuration for invalid values
    pub fn validate(&self) -> Result<()> {
        if self.cleanup_interval.is_zero() {
            return Err(Error::Config("cleanup_interval must be non-zero".into()));
        }
        self.dispatcher.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();
        assert_eq!(config.idle_channel_timeout, Duration::from_secs(30));
        assert_eq!(config.cleanup_interval, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = RegistryConfig::default()
            .idle_channel_timeout(Duration::from_secs(5))
            .cleanup_interval(Duration::from_millis(500))
            .dispatcher(DispatcherConfig::default().max_capacity(1000));

        assert_eq!(config.idle_channel_timeout, Duration::from_secs(5));
        assert_eq!(config.cleanup_interval, Duration::from_millis(500));
        assert_eq!(config.dispatcher.max_capacity, 1000);
    }

    #[test]
    fn test_zero_cleanup_interval_rejected() {
        let config = RegistryConfig::default().cleanup_interval(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
