//! Engine configuration loading.
//!
//! Every setting has a default; environment variables override them.

use std::time::Duration as StdDuration;

use chrono::Duration;
use thiserror::Error;

use bindery_core::Policy;

pub const ENV_MAX_QTY_PER_BOOK: &str = "BINDERY_MAX_QTY_PER_BOOK";
pub const ENV_MAX_DISTINCT_BOOKS: &str = "BINDERY_MAX_DISTINCT_BOOKS";
pub const ENV_RESERVATION_TTL_SECS: &str = "BINDERY_RESERVATION_TTL_SECS";
pub const ENV_CART_INACTIVITY_SECS: &str = "BINDERY_CART_INACTIVITY_SECS";
pub const ENV_SWEEP_INTERVAL_SECS: &str = "BINDERY_SWEEP_INTERVAL_SECS";
pub const ENV_COMPACT_AFTER_SWEEP: &str = "BINDERY_COMPACT_AFTER_SWEEP";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: cannot parse {value:?}")]
    Malformed { key: &'static str, value: String },

    #[error("{key}: must be positive")]
    NotPositive { key: &'static str },

    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
}

/// Runtime settings of the reservation engine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub policy: Policy,
    /// Pause between two expiration sweeps.
    pub sweep_interval: StdDuration,
    /// Archive resolved ledger movements after each sweep.
    pub compact_after_sweep: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: Policy::default(),
            sweep_interval: StdDuration::from_secs(60),
            compact_after_sweep: true,
        }
    }
}

impl EngineConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key/value source; missing keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(v) = parse_u64(&lookup, ENV_MAX_QTY_PER_BOOK)? {
            cfg.policy.max_quantity_per_book =
                u32::try_from(v).map_err(|_| malformed(ENV_MAX_QTY_PER_BOOK, v))?;
        }
        if let Some(v) = parse_u64(&lookup, ENV_MAX_DISTINCT_BOOKS)? {
            cfg.policy.max_distinct_books =
                usize::try_from(v).map_err(|_| malformed(ENV_MAX_DISTINCT_BOOKS, v))?;
        }
        if let Some(v) = parse_u64(&lookup, ENV_RESERVATION_TTL_SECS)? {
            cfg.policy.reservation_ttl = seconds(ENV_RESERVATION_TTL_SECS, v)?;
        }
        if let Some(v) = parse_u64(&lookup, ENV_CART_INACTIVITY_SECS)? {
            cfg.policy.cart_inactivity = seconds(ENV_CART_INACTIVITY_SECS, v)?;
        }
        if let Some(v) = positive_u64(&lookup, ENV_SWEEP_INTERVAL_SECS)? {
            cfg.sweep_interval = StdDuration::from_secs(v);
        }
        if let Some(raw) = lookup(ENV_COMPACT_AFTER_SWEEP) {
            cfg.compact_after_sweep = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::Malformed {
                        key: ENV_COMPACT_AFTER_SWEEP,
                        value: raw,
                    });
                }
            };
        }

        // Policy limits are range-checked by the domain, not per key.
        cfg.policy
            .validate()
            .map_err(|err| ConfigError::InvalidPolicy(err.to_string()))?;
        Ok(cfg)
    }
}

fn malformed(key: &'static str, value: u64) -> ConfigError {
    ConfigError::Malformed {
        key,
        value: value.to_string(),
    }
}

fn parse_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::Malformed { key, value: raw })
}

fn positive_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<u64>, ConfigError> {
    match parse_u64(lookup, key)? {
        Some(0) => Err(ConfigError::NotPositive { key }),
        v => Ok(v),
    }
}

fn seconds(key: &'static str, v: u64) -> Result<Duration, ConfigError> {
    i64::try_from(v)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| malformed(key, v))
}
