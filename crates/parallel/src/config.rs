//! Thread pool configuration.

use std::time::Duration;

/// Thread pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Prefix console lines with the originating worker (`[thread 3] ...`).
    pub tag_console_output: bool,

    /// How long a worker waits for a value reply before giving up.
    ///
    /// `None` waits forever: a stalled coordinator stalls the requesting
    /// worker.
    pub request_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            tag_console_output: true,
            request_timeout: None,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable worker tags on console lines.
    pub fn with_console_tags(mut self, enabled: bool) -> Self {
        self.tag_console_output = enabled;
        self
    }

    /// Bound how long a worker waits for a value reply.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = PoolConfig::new()
            .with_console_tags(false)
            .with_request_timeout(Duration::from_millis(250));

        assert!(!config.tag_console_output);
        assert_eq!(config.request_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_default_waits_forever() {
        let config = PoolConfig::default();
        assert!(config.tag_console_output);
        assert!(config.request_timeout.is_none());
    }
}
