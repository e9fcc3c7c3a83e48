//! Configuration loading from environment variables.
//!
//! Split by concern: venue credentials/endpoints, trading limits and
//! thresholds, and the process-level options aggregated in [`Config`].

mod trading_config;
mod venue_config;

pub use trading_config::{BreakerEnvConfig, LatencyEnvConfig, MatcherEnvConfig, TradingEnvConfig};
pub use venue_config::{KalshiConfig, PolymarketConfig, VenueEnvConfig, WsPolicy};

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Operating mode. `DryRun` synthesizes fills and never touches a venue
/// order endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    DryRun,
    Live,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dry_run" | "dry-run" | "dry" => Ok(Mode::DryRun),
            "live" => Ok(Mode::Live),
            _ => anyhow::bail!("Invalid OPERATING_MODE: {}. Must be 'dry_run' or 'live'", s),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::DryRun => write!(f, "dry_run"),
            Mode::Live => write!(f, "live"),
        }
    }
}

/// Aggregated application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub operating_mode: Mode,
    pub venues: VenueEnvConfig,
    pub trading: TradingEnvConfig,
    pub matcher: MatcherEnvConfig,
    pub latency: LatencyEnvConfig,
    pub breaker: BreakerEnvConfig,

    pub database_url: String,
    pub state_file_path: PathBuf,
    pub auto_save_interval_s: u64,
    pub max_state_age_minutes: i64,
    pub scan_interval_ms: u64,
    pub require_manual_review: bool,
    pub suppress_detection_when_paused: bool,
    pub track_dry_run_pnl: bool,
    pub alert_webhook_url: Option<String>,
    pub alias_table_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let operating_mode = env::var("OPERATING_MODE")
            .unwrap_or_else(|_| "dry_run".to_string())
            .parse::<Mode>()?;

        Ok(Self {
            operating_mode,
            venues: VenueEnvConfig::from_env()?,
            trading: TradingEnvConfig::from_env()?,
            matcher: MatcherEnvConfig::from_env()?,
            latency: LatencyEnvConfig::from_env()?,
            breaker: BreakerEnvConfig::from_env()?,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://predarb.db".to_string()),
            state_file_path: PathBuf::from(
                env::var("STATE_FILE_PATH").unwrap_or_else(|_| "predarb_state.json".to_string()),
            ),
            auto_save_interval_s: parse_u64("AUTO_SAVE_INTERVAL_S", 30)?,
            max_state_age_minutes: parse_i64("MAX_STATE_AGE_MINUTES", 60)?,
            scan_interval_ms: parse_u64("SCAN_INTERVAL_MS", 1000)?,
            require_manual_review: parse_bool("REQUIRE_MANUAL_REVIEW", false),
            suppress_detection_when_paused: parse_bool("SUPPRESS_DETECTION_WHEN_PAUSED", false),
            track_dry_run_pnl: parse_bool("TRACK_DRY_RUN_PNL", true),
            alert_webhook_url: env::var("ALERT_WEBHOOK_URL").ok().filter(|s| !s.is_empty()),
            alias_table_path: Some(PathBuf::from(
                env::var("ALIAS_TABLE_PATH").unwrap_or_else(|_| "config/aliases.toml".to_string()),
            )),
        })
    }
}

pub(crate) fn parse_u64(key: &str, default: u64) -> Result<u64> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<u64>()
        .context(format!("Failed to parse {}", key))
}

pub(crate) fn parse_i64(key: &str, default: i64) -> Result<i64> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<i64>()
        .context(format!("Failed to parse {}", key))
}

pub(crate) fn parse_u32(key: &str, default: u32) -> Result<u32> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<u32>()
        .context(format!("Failed to parse {}", key))
}

pub(crate) fn parse_f64(key: &str, default: f64) -> Result<f64> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<f64>()
        .context(format!("Failed to parse {}", key))
}

pub(crate) fn parse_decimal(key: &str, default: &str) -> Result<Decimal> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    Decimal::from_str(&raw).context(format!("Failed to parse {}", key))
}

pub(crate) fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<bool>()
        .unwrap_or(default)
}
