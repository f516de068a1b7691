//! Runtime configuration, read from the environment.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Tunables of the fulfillment service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FulfillmentConfig {
    /// Product/size groups whose combined-color stock is below this are "low stock".
    pub low_stock_threshold: i64,
    /// Attempts for a ledger increment when its stream moved underneath it.
    pub ledger_retries: u32,
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            low_stock_threshold: 3,
            ledger_retries: 3,
        }
    }
}

impl FulfillmentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let low_stock_threshold = parse_or(
            &lookup,
            "STOCKROOM_LOW_STOCK_THRESHOLD",
            defaults.low_stock_threshold,
        )?;
        if low_stock_threshold < 0 {
            return Err(ConfigError::Invalid {
                var: "STOCKROOM_LOW_STOCK_THRESHOLD",
                reason: "must not be negative".to_string(),
            });
        }

        let ledger_retries = parse_or(&lookup, "STOCKROOM_LEDGER_RETRIES", defaults.ledger_retries)?;
        if ledger_retries == 0 {
            return Err(ConfigError::Invalid {
                var: "STOCKROOM_LEDGER_RETRIES",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            low_stock_threshold,
            ledger_retries,
        })
    }
}

/// Process-level settings for the HTTP binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// When set, events are persisted in Postgres; otherwise in memory.
    pub database_url: Option<String>,
    pub fulfillment: FulfillmentConfig,
}

impl ServerConfig {
    pub const DEFAULT_BIND_ADDR: &'static str = "0.0.0.0:8080";

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw = lookup("STOCKROOM_BIND_ADDR").unwrap_or_else(|| Self::DEFAULT_BIND_ADDR.to_string());
        let bind_addr = raw.parse().map_err(|e| ConfigError::Invalid {
            var: "STOCKROOM_BIND_ADDR",
            reason: format!("{e}"),
        })?;

        let database_url = lookup("DATABASE_URL").filter(|s| !s.trim().is_empty());

        Ok(Self {
            bind_addr,
            database_url,
            fulfillment: FulfillmentConfig::from_lookup(&lookup)?,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
    }
}
