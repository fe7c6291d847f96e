//! Configuration types for zipfs
//!
//! Every section carries `#[serde(default)]` so a config file only needs
//! to name the values it overrides.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Default B+Tree fan-out
pub const ORDER: usize = 1000;

/// Smallest fan-out that still allows a median split
pub const MIN_ORDER: usize = 3;

/// Default number of entries per metadata cache store
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Root configuration for zipfs
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bump arena configuration
    pub arena: ArenaConfig,
    /// B+Tree index configuration
    pub index: IndexConfig,
    /// Metadata cache configuration
    pub cache: CacheConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Check that every section holds usable values
    pub fn validate(&self) -> Result<()> {
        self.arena.validate()?;
        self.index.validate()?;
        self.cache.validate()
    }
}

/// Bump arena sizing
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Size of each segment the arena grows by
    pub segment_size: usize,
    /// Upper bound on the bytes the arena may reserve in total
    pub max_size: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            segment_size: 64 * 1024 * 1024, // 64 MB
            max_size: 1024 * 1024 * 1024,   // 1 GB
        }
    }
}

impl ArenaConfig {
    /// Arena holding a single segment of `size` bytes
    #[must_use]
    pub const fn fixed(size: usize) -> Self {
        Self {
            segment_size: size,
            max_size: size,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.segment_size == 0 {
            return Err(Error::configuration("arena.segment_size must be non-zero"));
        }
        if self.segment_size > self.max_size {
            return Err(Error::configuration(format!(
                "arena.segment_size {} exceeds arena.max_size {}",
                self.segment_size, self.max_size
            )));
        }
        Ok(())
    }
}

/// B+Tree index configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Maximum children per internal node; nodes hold at most `order - 1` keys
    pub order: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self { order: ORDER }
    }
}

impl IndexConfig {
    #[must_use]
    pub const fn with_order(order: usize) -> Self {
        Self { order }
    }

    pub fn validate(&self) -> Result<()> {
        if self.order < MIN_ORDER {
            return Err(Error::configuration(format!(
                "index.order must be at least {MIN_ORDER}, got {}",
                self.order
            )));
        }
        Ok(())
    }
}

/// Metadata cache configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries each store holds before it is cleared
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::configuration("cache.capacity must be non-zero"));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.index.order, 1000);
        assert_eq!(config.cache.capacity, 1024);
        assert_eq!(config.arena.segment_size, 64 * 1024 * 1024);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [index]
            order = 8

            [cache]
            capacity = 16
            "#,
        )
        .unwrap();
        assert_eq!(config.index.order, 8);
        assert_eq!(config.cache.capacity, 16);
        assert_eq!(config.arena.max_size, 1024 * 1024 * 1024);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.index.order = 2;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let mut config = Config::default();
        config.arena = ArenaConfig {
            segment_size: 4096,
            max_size: 1024,
        };
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cache.capacity = 0;
        assert!(config.validate().is_err());

        assert!(ArenaConfig::fixed(4096).validate().is_ok());
    }
}
