use std::time::Duration;

use bon::Builder;

use super::backoff::ReconnectPolicy;
use crate::hw::ScanPolicy;

const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_READING_BUFFER: usize = 64;

/// Liveness checks run while a session is connected.
#[derive(Debug, Clone, Builder)]
pub struct HealthCheckPolicy {
    #[builder(default = DEFAULT_CHECK_INTERVAL)]
    check_interval: Duration,
    /// Longest tolerated gap between readings before the link counts as stale.
    #[builder(default = DEFAULT_STALE_THRESHOLD)]
    stale_threshold: Duration,
}

impl Default for HealthCheckPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl HealthCheckPolicy {
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    #[must_use]
    pub fn stale_threshold(&self) -> Duration {
        self.stale_threshold
    }
}

/// Settings for a [`super::HeartRateMonitor`].
#[derive(Debug, Clone, Builder)]
pub struct MonitorConfig {
    #[builder(default)]
    reconnect: ReconnectPolicy,
    #[builder(default)]
    health: HealthCheckPolicy,
    #[builder(default)]
    scan: ScanPolicy,
    /// Bound for attaching and discovering services on one device.
    #[builder(default = DEFAULT_CONNECT_TIMEOUT)]
    connect_timeout: Duration,
    /// Readings buffered per subscriber before slow consumers start skipping.
    #[builder(default = DEFAULT_READING_BUFFER)]
    reading_buffer: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl MonitorConfig {
    #[must_use]
    pub fn reconnect(&self) -> &ReconnectPolicy {
        &self.reconnect
    }

    #[must_use]
    pub fn health(&self) -> &HealthCheckPolicy {
        &self.health
    }

    #[must_use]
    pub fn scan(&self) -> &ScanPolicy {
        &self.scan
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    #[must_use]
    pub fn reading_buffer(&self) -> usize {
        self.reading_buffer
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = MonitorConfig::builder().build();

        assert_eq!(Duration::from_secs(2), config.reconnect().base_delay());
        assert_eq!(Duration::from_secs(300), config.reconnect().max_delay());
        assert_eq!(8, config.reconnect().max_reconnect_attempts());
        assert_eq!(10, config.reconnect().max_consecutive_errors());
        assert_eq!(Duration::from_secs(10), config.health().check_interval());
        assert_eq!(Duration::from_secs(30), config.health().stale_threshold());
        assert_eq!(Duration::from_secs(5), config.scan().rediscovery_timeout());
        assert_eq!(12, config.scan().vendor_name_hints().len());
    }
}
