//! Configuration management for chaser-pom

use crate::cache::CachePolicy;
use crate::{Error, Result};
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Library configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Page-object time-to-live in milliseconds (0 disables expiry)
    pub cache_ttl_ms: u64,

    /// Maximum number of cached page objects
    pub cache_max_size: usize,

    /// Interval of the expired-entry sweep in milliseconds
    pub cache_sweep_interval_ms: Option<u64>,

    /// Capacity of each context store's history ring buffer
    pub history_capacity: usize,

    /// Capacity of the lifecycle event broadcast channel
    pub event_channel_capacity: usize,

    /// Log level
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 0,
            cache_max_size: 50,
            cache_sweep_interval_ms: None,
            history_capacity: crate::context::DEFAULT_HISTORY_CAPACITY,
            event_channel_capacity: 1000,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(ttl) = env::var("CHASER_POM_CACHE_TTL_MS") {
            config.cache_ttl_ms = ttl
                .parse()
                .map_err(|_| Error::configuration("Invalid CHASER_POM_CACHE_TTL_MS"))?;
        }

        if let Ok(max_size) = env::var("CHASER_POM_CACHE_MAX_SIZE") {
            config.cache_max_size = max_size
                .parse()
                .map_err(|_| Error::configuration("Invalid CHASER_POM_CACHE_MAX_SIZE"))?;
        }

        if let Ok(sweep) = env::var("CHASER_POM_CACHE_SWEEP_MS") {
            config.cache_sweep_interval_ms = Some(
                sweep
                    .parse()
                    .map_err(|_| Error::configuration("Invalid CHASER_POM_CACHE_SWEEP_MS"))?,
            );
        }

        if let Ok(capacity) = env::var("CHASER_POM_HISTORY_CAPACITY") {
            config.history_capacity = capacity
                .parse()
                .map_err(|_| Error::configuration("Invalid CHASER_POM_HISTORY_CAPACITY"))?;
        }

        if let Ok(capacity) = env::var("CHASER_POM_EVENT_CAPACITY") {
            config.event_channel_capacity = capacity
                .parse()
                .map_err(|_| Error::configuration("Invalid CHASER_POM_EVENT_CAPACITY"))?;
        }

        if let Ok(log_level) = env::var("CHASER_POM_LOG_LEVEL") {
            config.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::configuration(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::configuration(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the components cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.cache_max_size == 0 {
            return Err(Error::configuration("cache_max_size must be at least 1"));
        }
        if self.history_capacity == 0 {
            return Err(Error::configuration("history_capacity must be at least 1"));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::configuration(
                "event_channel_capacity must be at least 1",
            ));
        }
        if self.cache_sweep_interval_ms == Some(0) {
            return Err(Error::configuration(
                "cache_sweep_interval_ms must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Cache policy described by this configuration
    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy {
            ttl: Duration::from_millis(self.cache_ttl_ms),
            max_size: self.cache_max_size,
            sweep_interval: self.cache_sweep_interval_ms.map(Duration::from_millis),
        }
    }
}
