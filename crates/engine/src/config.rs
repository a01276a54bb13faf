//! Runtime configuration
//!
//! Everything is driven by environment variables so the same binary can
//! point at practice or real accounts without a rebuild. Values parse
//! strictly; a malformed number aborts startup instead of trading with a
//! silently wrong stake.

use crate::types::AccountMode;
use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::str::FromStr;
use std::time::Duration;

/// Assets scanned when none are configured
pub const DEFAULT_ASSETS: &[&str] = &[
    "EURUSD-OTC",
    "GBPUSD-OTC",
    "USDJPY-OTC",
    "AUDUSD-OTC",
    "EURJPY-OTC",
];

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub broker_url: String,
    pub email: String,
    pub password: String,
    pub account_mode: AccountMode,
    pub assets: Vec<String>,
    pub timeframe_secs: u32,
    pub candle_count: u32,
    pub base_stake: Decimal,
    pub recovery_multiplier: Decimal,
    pub max_losses: u32,
    pub take_profit: Decimal,
    pub expiry_minutes: u32,
    pub resolution_timeout_secs: u64,
    pub scan_interval_secs: u64,
    pub max_trades_per_min: usize,
    pub cooldown_after_loss_secs: u64,
    pub fallback_balance: Decimal,
    pub db_path: String,
}

impl BotConfig {
    /// Build the configuration from the process environment.
    ///
    /// Credentials are read but not validated here; `require_credentials`
    /// gates the commands that actually talk to the broker.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            broker_url: env_string("BROKER_URL", "https://api.broker.example"),
            email: env_string("BROKER_EMAIL", ""),
            password: env_string("BROKER_PASSWORD", ""),
            account_mode: AccountMode::parse(&env_string("ACCOUNT_MODE", "PRACTICE")),
            assets: parse_assets(&env_string("ASSETS", "")),
            timeframe_secs: env_parse("TIMEFRAME_SEC", 60)?,
            candle_count: env_parse("CANDLE_COUNT", 120)?,
            base_stake: env_parse("BASE_STAKE", dec!(1.0))?,
            recovery_multiplier: env_parse("RECOVERY_MULTIPLIER", dec!(2.2))?,
            max_losses: env_parse("MAX_LOSSES", 5)?,
            take_profit: env_parse("TAKE_PROFIT", dec!(50))?,
            expiry_minutes: env_parse("EXPIRY_MINUTES", 1)?,
            resolution_timeout_secs: env_parse("RESOLUTION_TIMEOUT_SEC", 90)?,
            scan_interval_secs: env_parse("SCAN_INTERVAL_SEC", 5)?,
            max_trades_per_min: env_parse("MAX_TRADES_PER_MIN", 3)?,
            cooldown_after_loss_secs: env_parse("COOLDOWN_AFTER_LOSS_SEC", 60)?,
            fallback_balance: env_parse("FALLBACK_BALANCE", dec!(1000))?,
            db_path: env_string("OTC_PILOT_DB_PATH", "data/pilot.db"),
        })
    }

    /// Fail fast before any broker call is attempted with empty credentials
    pub fn require_credentials(&self) -> Result<()> {
        if self.email.is_empty() || self.password.is_empty() {
            bail!("BROKER_EMAIL and BROKER_PASSWORD must be set");
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn resolution_timeout(&self) -> Duration {
        Duration::from_secs(self.resolution_timeout_secs)
    }

    pub fn cooldown_after_loss(&self) -> Duration {
        Duration::from_secs(self.cooldown_after_loss_secs)
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

/// Comma-separated asset list; empty input falls back to the default set
fn parse_assets(raw: &str) -> Vec<String> {
    let assets: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if assets.is_empty() {
        DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect()
    } else {
        assets
    }
}
