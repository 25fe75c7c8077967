use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Tunables for the quote chain, the registry and the poller.
///
/// Every field has a default, so a TOML file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Maximum age of a stored price that is served without an upstream call.
    pub cache_ttl_secs: u64,
    /// Period of the quote poller.
    pub poll_interval_secs: u64,
    /// Per-call budget for upstream vendors.
    pub upstream_timeout_secs: u64,
    /// Budget for one background persistence job.
    pub persist_timeout_secs: u64,
    /// Queued persistence jobs before the oldest is dropped.
    pub persist_queue_capacity: usize,
    /// Messages buffered per connection before it is evicted as a slow consumer.
    pub outbound_buffer: usize,
    /// Registry mailbox depth.
    pub mailbox_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            poll_interval_secs: 5,
            upstream_timeout_secs: 10,
            persist_timeout_secs: 5,
            persist_queue_capacity: 256,
            outbound_buffer: 32,
            mailbox_capacity: 1024,
        }
    }
}

impl FeedConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn persist_timeout(&self) -> Duration {
        Duration::from_secs(self.persist_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FeedConfig::default();
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.upstream_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = FeedConfig::from_toml_str("cache_ttl_secs = 60\noutbound_buffer = 8\n").unwrap();
        assert_eq!(config.cache_ttl_secs, 60);
        assert_eq!(config.outbound_buffer, 8);
        assert_eq!(config.poll_interval_secs, 5);
    }

    #[test]
    fn test_rejects_wrong_types() {
        assert!(FeedConfig::from_toml_str("cache_ttl_secs = \"soon\"").is_err());
    }
}
