//! Venue credentials, endpoints, rate-limit capacities and the shared
//! WebSocket reconnect policy.

use super::{parse_f64, parse_u32, parse_u64};
use anyhow::Result;
use std::env;
use std::time::Duration;

/// WebSocket reconnect timing: exponential backoff from `initial` with
/// factor 2 up to `cap`, at most `max_attempts` tries before the feed is
/// declared lost.
#[derive(Debug, Clone)]
pub struct WsPolicy {
    pub initial_backoff: Duration,
    pub backoff_cap: Duration,
    pub max_attempts: u32,
    pub heartbeat_timeout: Duration,
}

impl WsPolicy {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            initial_backoff: Duration::from_secs(parse_u64("WS_INITIAL_BACKOFF_S", 1)?),
            backoff_cap: Duration::from_secs(parse_u64("WS_BACKOFF_CAP_S", 30)?),
            max_attempts: parse_u32("WS_MAX_ATTEMPTS", 5)?,
            heartbeat_timeout: Duration::from_secs(parse_u64("WS_HEARTBEAT_TIMEOUT_S", 30)?),
        })
    }
}

#[derive(Debug, Clone)]
pub struct PolymarketConfig {
    pub base_url: String,
    pub ws_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub api_passphrase: String,
    /// Token-bucket capacities, requests per second.
    pub read_rate_per_s: f64,
    pub write_rate_per_s: f64,
}

#[derive(Debug, Clone)]
pub struct KalshiConfig {
    pub base_url: String,
    pub ws_url: String,
    pub email: String,
    pub password: String,
    pub read_rate_per_s: f64,
    pub write_rate_per_s: f64,
}

#[derive(Debug, Clone)]
pub struct VenueEnvConfig {
    pub polymarket: PolymarketConfig,
    pub kalshi: KalshiConfig,
    pub ws_policy: WsPolicy,
}

impl VenueEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            polymarket: PolymarketConfig {
                base_url: env::var("POLYMARKET_BASE_URL")
                    .unwrap_or_else(|_| "https://clob.polymarket.com".to_string()),
                ws_url: env::var("POLYMARKET_WS_URL")
                    .unwrap_or_else(|_| "wss://ws-subscriptions-clob.polymarket.com/ws".to_string()),
                api_key: env::var("POLYMARKET_API_KEY").unwrap_or_default(),
                api_secret: env::var("POLYMARKET_API_SECRET").unwrap_or_default(),
                api_passphrase: env::var("POLYMARKET_API_PASSPHRASE").unwrap_or_default(),
                read_rate_per_s: parse_f64("POLYMARKET_READ_RATE", 10.0)?,
                write_rate_per_s: parse_f64("POLYMARKET_WRITE_RATE", 2.0)?,
            },
            kalshi: KalshiConfig {
                base_url: env::var("KALSHI_BASE_URL")
                    .unwrap_or_else(|_| "https://trading-api.kalshi.com/trade-api/v2".to_string()),
                ws_url: env::var("KALSHI_WS_URL")
                    .unwrap_or_else(|_| "wss://trading-api.kalshi.com/trade-api/ws/v2".to_string()),
                email: env::var("KALSHI_EMAIL").unwrap_or_default(),
                password: env::var("KALSHI_PASSWORD").unwrap_or_default(),
                read_rate_per_s: parse_f64("KALSHI_READ_RATE", 10.0)?,
                write_rate_per_s: parse_f64("KALSHI_WRITE_RATE", 2.0)?,
            },
            ws_policy: WsPolicy::from_env()?,
        })
    }
}
