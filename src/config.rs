//! Validated configuration for limiters and the stats aggregator.

use crate::error::ConfigError;
use std::time::Duration;

/// Seconds in one week; the default stats TTL.
pub const WEEK_SECONDS: u64 = 60 * 60 * 24 * 7;

/// Width and threshold of a sliding window.
///
/// Both values are part of the window's identity: two limiters with the same
/// name but different configs never share events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WindowConfig {
    window_ms: u64,
    max_hits: u64,
}

impl WindowConfig {
    /// Create a config with validation.
    ///
    /// Sub-millisecond precision is truncated.
    pub fn new(window: Duration, max_hits: u64) -> Result<Self, ConfigError> {
        let millis = window.as_millis();
        let window_ms = i64::try_from(millis)
            .map_err(|_| ConfigError::WindowTooLarge { provided_ms: millis })?
            as u64;
        if max_hits == 0 {
            return Err(ConfigError::InvalidMaxHits { provided: max_hits });
        }
        Ok(Self { window_ms, max_hits })
    }

    /// Window width in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Events admitted per window.
    pub fn max_hits(&self) -> u64 {
        self.max_hits
    }
}

/// Settings for [`StatsAggregator`](crate::stats::StatsAggregator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatsConfig {
    ttl: Duration,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(WEEK_SECONDS) }
    }
}

impl StatsConfig {
    /// TTL refreshed on every update. Must be at least one second.
    pub fn with_ttl(ttl: Duration) -> Result<Self, ConfigError> {
        if ttl.as_secs() == 0 {
            return Err(ConfigError::InvalidTtl);
        }
        Ok(Self { ttl })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl.as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_config_validates_max_hits() {
        assert_eq!(
            WindowConfig::new(Duration::from_secs(1), 0),
            Err(ConfigError::InvalidMaxHits { provided: 0 })
        );
        let cfg = WindowConfig::new(Duration::from_millis(1500), 10).unwrap();
        assert_eq!(cfg.window_ms(), 1500);
        assert_eq!(cfg.max_hits(), 10);
    }

    #[test]
    fn zero_width_window_is_allowed() {
        let cfg = WindowConfig::new(Duration::ZERO, 1).unwrap();
        assert_eq!(cfg.window_ms(), 0);
    }

    #[test]
    fn window_config_rejects_huge_windows() {
        assert!(matches!(
            WindowConfig::new(Duration::MAX, 1),
            Err(ConfigError::WindowTooLarge { .. })
        ));
    }

    #[test]
    fn stats_ttl_defaults_to_a_week() {
        assert_eq!(StatsConfig::default().ttl_seconds(), 604_800);
        assert_eq!(StatsConfig::with_ttl(Duration::from_millis(500)), Err(ConfigError::InvalidTtl));
        assert_eq!(StatsConfig::with_ttl(Duration::from_secs(60)).unwrap().ttl_seconds(), 60);
    }
}
