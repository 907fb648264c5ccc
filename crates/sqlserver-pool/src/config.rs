//! Pool configuration.

use std::time::Duration;

/// Configuration for a [`crate::Pool`].
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Maximum number of live connections.
    pub max_connections: u32,

    /// Number of idle connections the reaper keeps warm.
    pub min_idle: u32,

    /// Time to wait for a free connection before giving up.
    pub acquire_timeout: Duration,

    /// Close connections parked longer than this; `None` keeps them forever.
    pub idle_timeout: Option<Duration>,

    /// Validate idle connections before handing them out.
    pub validate_on_acquire: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_idle: 0,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
            validate_on_acquire: true,
        }
    }
}

impl PoolConfig {
    /// A configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of live connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.max_connections = count;
        self
    }

    /// Set the warm idle target.
    #[must_use]
    pub fn min_idle(mut self, count: u32) -> Self {
        self.min_idle = count;
        self
    }

    /// Set the acquire timeout.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set (or disable) the idle timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Enable or disable validation on acquire.
    #[must_use]
    pub fn validate_on_acquire(mut self, enabled: bool) -> Self {
        self.validate_on_acquire = enabled;
        self
    }

    /// Interval of the background reaper.
    #[must_use]
    pub(crate) fn reap_interval(&self) -> Duration {
        match self.idle_timeout {
            Some(timeout) => (timeout / 2).min(Duration::from_secs(30)).max(Duration::from_millis(50)),
            None => Duration::from_secs(30),
        }
    }

    /// Check the configuration for contradictions.
    pub fn validate<E>(&self) -> Result<(), crate::error::PoolError<E>> {
        if self.max_connections == 0 {
            return Err(crate::error::PoolError::Configuration(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.min_idle > self.max_connections {
            return Err(crate::error::PoolError::Configuration(
                "min_idle cannot exceed max_connections".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_idle, 0);
        assert!(config.validate_on_acquire);
        assert!(config.validate::<std::io::Error>().is_ok());
    }

    #[test]
    fn builder_chain() {
        let config = PoolConfig::new()
            .max_connections(4)
            .min_idle(2)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(None)
            .validate_on_acquire(false);
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.min_idle, 2);
        assert!(config.idle_timeout.is_none());
        assert!(!config.validate_on_acquire);
    }

    #[test]
    fn zero_max_rejected() {
        let config = PoolConfig::new().max_connections(0);
        assert!(config.validate::<std::io::Error>().is_err());
    }

    #[test]
    fn min_idle_above_max_rejected() {
        let config = PoolConfig::new().max_connections(2).min_idle(3);
        assert!(config.validate::<std::io::Error>().is_err());
    }
}
