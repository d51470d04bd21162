//! Configuration for pools and the pool-manager service.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use warmpool_reconcile::{PoolBounds, DEFAULT_MAX_ITEM_AGE, DEFAULT_RECONCILE_INTERVAL};

use crate::error::PoolError;

/// Pool settings. Immutable once the pool is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    /// Label used in logs.
    pub pool_name: String,

    /// Label stamped on every item.
    pub item_type: String,

    pub min_items_total: usize,
    pub min_items_ready: usize,
    pub max_items_total: usize,
    pub max_items_ready: usize,

    /// Ready items older than this are evicted unconditionally.
    pub max_item_age: Duration,

    /// Interval between reconciliation passes.
    pub refresh_period: Duration,

    /// Creation worker tick interval.
    pub creation_wait_period: Duration,

    /// Deletion worker tick interval.
    pub deletion_wait_period: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            pool_name: "Pool".to_string(),
            item_type: "Pool-Object".to_string(),
            min_items_total: 1,
            min_items_ready: 1,
            max_items_total: 10,
            max_items_ready: 10,
            max_item_age: DEFAULT_MAX_ITEM_AGE,
            refresh_period: DEFAULT_RECONCILE_INTERVAL,
            creation_wait_period: Duration::from_millis(100),
            deletion_wait_period: Duration::from_millis(100),
        }
    }
}

impl PoolSettings {
    /// Load settings from `WARMPOOL_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load settings from an arbitrary variable source. Unset variables keep
    /// their defaults; unparsable ones are an error.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Ok(Self {
            pool_name: lookup("WARMPOOL_POOL_NAME").unwrap_or(defaults.pool_name),
            item_type: lookup("WARMPOOL_ITEM_TYPE").unwrap_or(defaults.item_type),
            min_items_total: parse_var(&lookup, "WARMPOOL_MIN_ITEMS_TOTAL")?
                .unwrap_or(defaults.min_items_total),
            min_items_ready: parse_var(&lookup, "WARMPOOL_MIN_ITEMS_READY")?
                .unwrap_or(defaults.min_items_ready),
            max_items_total: parse_var(&lookup, "WARMPOOL_MAX_ITEMS_TOTAL")?
                .unwrap_or(defaults.max_items_total),
            max_items_ready: parse_var(&lookup, "WARMPOOL_MAX_ITEMS_READY")?
                .unwrap_or(defaults.max_items_ready),
            max_item_age: parse_var(&lookup, "WARMPOOL_MAX_ITEM_AGE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_item_age),
            refresh_period: parse_var(&lookup, "WARMPOOL_REFRESH_PERIOD_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.refresh_period),
            creation_wait_period: parse_var(&lookup, "WARMPOOL_CREATION_WAIT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.creation_wait_period),
            deletion_wait_period: parse_var(&lookup, "WARMPOOL_DELETION_WAIT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.deletion_wait_period),
        })
    }

    /// Bounds handed to the reconciliation planner.
    pub fn bounds(&self) -> PoolBounds {
        PoolBounds {
            min_items_total: self.min_items_total,
            min_items_ready: self.min_items_ready,
            max_items_total: self.max_items_total,
            max_items_ready: self.max_items_ready,
            max_item_age: self.max_item_age,
        }
    }

    /// Reject settings the workers cannot run with.
    pub fn validate(&self) -> Result<(), PoolError> {
        self.bounds().validate().map_err(|e| {
            PoolError::Configuration(format!("{}: {}{}", self.pool_name, e, self.default_hint()))
        })?;

        for (name, period) in [
            ("refresh_period", self.refresh_period),
            ("creation_wait_period", self.creation_wait_period),
            ("deletion_wait_period", self.deletion_wait_period),
        ] {
            if period.is_zero() {
                return Err(PoolError::Configuration(format!(
                    "{}.{} must be greater than zero",
                    self.pool_name, name
                )));
            }
        }

        Ok(())
    }

    /// Names a lower bound left at its default when it conflicts with an
    /// upper bound that was set explicitly.
    fn default_hint(&self) -> String {
        let defaults = Self::default();
        let mut hint = String::new();
        if self.min_items_total > self.max_items_total
            && self.min_items_total == defaults.min_items_total
        {
            hint.push_str(&format!(
                " (min_items_total is at its default of {}; lower it too)",
                defaults.min_items_total
            ));
        }
        if self.min_items_ready > self.max_items_ready
            && self.min_items_ready == defaults.min_items_ready
        {
            hint.push_str(&format!(
                " (min_items_ready is at its default of {}; lower it too)",
                defaults.min_items_ready
            ));
        }
        hint
    }
}

/// Configuration of the `pool-manager` binary.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// HTTP listen address.
    pub listen_addr: SocketAddr,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Settings of the served pool.
    pub pool: PoolSettings,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("WARMPOOL_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .context("WARMPOOL_LISTEN_ADDR is not a socket address")?;

        let log_level =
            std::env::var("WARMPOOL_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let pool = PoolSettings::from_env()?;

        Ok(Self {
            listen_addr,
            log_level,
            pool,
        })
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {key}: {raw:?}"))
        })
        .transpose()
}
