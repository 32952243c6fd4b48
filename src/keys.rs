//! Key naming for everything `tallystore` writes.
//!
//! Keys are colon-delimited and share one prefix so several deployments (or
//! test runs) can use the same store without colliding:
//!
//! ```text
//! {prefix}:limiter:{window_ms}:{name}:{max_hits}   sorted set of hit events
//! {prefix}:sites:info:{id}                         site record hash
//! {prefix}:sites:ids                               set of site record keys
//! {prefix}:sites:stats:{id}:{YYYY-MM-DD}           daily stats hash
//! ```

use crate::error::ConfigError;
use chrono::NaiveDate;

/// Default prefix used by [`KeySchema::default`].
pub const DEFAULT_PREFIX: &str = "tally";

/// Builds store keys under a fixed prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KeySchema {
    prefix: String,
}

impl Default for KeySchema {
    fn default() -> Self {
        Self { prefix: DEFAULT_PREFIX.to_string() }
    }
}

impl KeySchema {
    /// Create a schema with a custom prefix.
    ///
    /// # Errors
    /// Returns `Err` if the prefix is empty or contains whitespace or control characters.
    pub fn new(prefix: impl Into<String>) -> Result<Self, ConfigError> {
        let p: String = prefix.into();
        let p = p.trim_end_matches(':').to_string();
        if p.is_empty() || p.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ConfigError::InvalidPrefix(p));
        }
        Ok(Self { prefix: p })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Prefix an arbitrary relative key.
    pub fn key(&self, relative: &str) -> String {
        format!("{}:{}", self.prefix, relative)
    }

    /// Sorted set holding one limiter's window. Changing either bound yields a different key.
    pub fn limiter_key(&self, window_ms: u64, name: &str, max_hits: u64) -> String {
        self.key(&format!("limiter:{}:{}:{}", window_ms, name, max_hits))
    }

    pub fn site_hash_key(&self, site_id: u64) -> String {
        self.key(&format!("sites:info:{}", site_id))
    }

    pub fn site_ids_key(&self) -> String {
        self.key("sites:ids")
    }

    /// Daily stats hash for one site.
    pub fn site_stats_key(&self, site_id: u64, day: NaiveDate) -> String {
        self.key(&format!("sites:stats:{}:{}", site_id, day_bucket(day)))
    }
}

/// Period bucket used in stats keys (`YYYY-MM-DD`).
pub fn day_bucket(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiter_key_encodes_config() {
        let schema = KeySchema::default();
        assert_eq!(schema.limiter_key(60_000, "api", 2), "tally:limiter:60000:api:2");
        assert_ne!(schema.limiter_key(60_000, "api", 2), schema.limiter_key(60_000, "api", 3));
    }

    #[test]
    fn stats_key_uses_day_bucket() {
        let schema = KeySchema::new("test").unwrap();
        let day = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        assert_eq!(schema.site_stats_key(42, day), "test:sites:stats:42:2026-03-07");
    }

    #[test]
    fn site_keys() {
        let schema = KeySchema::new("app:").unwrap();
        assert_eq!(schema.site_hash_key(9), "app:sites:info:9");
        assert_eq!(schema.site_ids_key(), "app:sites:ids");
    }

    #[test]
    fn rejects_bad_prefixes() {
        assert!(KeySchema::new("").is_err());
        assert!(KeySchema::new(":").is_err());
        assert!(KeySchema::new("has space").is_err());
        assert!(KeySchema::new("bell\u{7}").is_err());
    }
}
