//! Trading limits, detection thresholds, matcher and breaker knobs.

use super::{parse_bool, parse_decimal, parse_f64, parse_i64, parse_u32, parse_u64};
use crate::domain::fees::FeeSchedule;
use anyhow::Result;
use rust_decimal::Decimal;

/// Risk limits and detection thresholds.
#[derive(Debug, Clone)]
pub struct TradingEnvConfig {
    /// Fractional profit floor, applied relative to the buy price.
    pub min_profit_threshold: Decimal,
    /// Revalidation envelope: abort if fresh net profit falls below
    /// `net * (1 - max_slippage)`.
    pub max_slippage: Decimal,
    pub max_total_exposure: Decimal,
    pub max_exposure_per_event: Decimal,
    pub max_position_imbalance: u64,
    pub daily_loss_limit: Decimal,
    pub max_qty_per_trade: u64,
    pub min_qty_per_trade: u64,
    pub min_trade_value: Decimal,
    pub min_profit_abs: Decimal,
    pub min_liquidity_depth: u64,
    pub opportunity_ttl_ms: u64,
    pub fees: FeeSchedule,
}

impl TradingEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            min_profit_threshold: parse_decimal("MIN_PROFIT_THRESHOLD", "0.03")?,
            max_slippage: parse_decimal("MAX_SLIPPAGE", "0.10")?,
            max_total_exposure: parse_decimal("MAX_TOTAL_EXPOSURE", "1000")?,
            max_exposure_per_event: parse_decimal("MAX_EXPOSURE_PER_EVENT", "250")?,
            max_position_imbalance: parse_u64("MAX_POSITION_IMBALANCE", 10)?,
            daily_loss_limit: parse_decimal("DAILY_LOSS_LIMIT", "100")?,
            max_qty_per_trade: parse_u64("MAX_QTY_PER_TRADE", 500)?,
            min_qty_per_trade: parse_u64("MIN_QTY_PER_TRADE", 5)?,
            min_trade_value: parse_decimal("MIN_TRADE_VALUE", "10")?,
            min_profit_abs: parse_decimal("MIN_PROFIT_ABS", "0.50")?,
            min_liquidity_depth: parse_u64("MIN_LIQUIDITY_DEPTH", 50)?,
            opportunity_ttl_ms: parse_u64("OPPORTUNITY_TTL_MS", 5000)?,
            fees: FeeSchedule {
                polymarket_taker_rate: parse_decimal("POLYMARKET_TAKER_RATE", "0.02")?,
                kalshi_fee_rate: parse_decimal("KALSHI_FEE_RATE", "0.07")?,
                kalshi_fee_cap: parse_decimal("KALSHI_FEE_CAP", "0.07")?,
                gas_cost_usd: parse_decimal("GAS_COST_USD", "0.30")?,
            },
        })
    }
}

/// Event matcher behavior.
#[derive(Debug, Clone)]
pub struct MatcherEnvConfig {
    pub fuzzy_threshold: f64,
    pub min_confidence_threshold: f64,
    pub require_date_validation: bool,
    pub require_category_match: bool,
    pub date_tolerance_hours: i64,
}

impl MatcherEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            fuzzy_threshold: parse_f64("FUZZY_THRESHOLD", 0.95)?,
            min_confidence_threshold: parse_f64("MIN_CONFIDENCE_THRESHOLD", 0.95)?,
            require_date_validation: parse_bool("REQUIRE_DATE_VALIDATION", true),
            require_category_match: parse_bool("REQUIRE_CATEGORY_MATCH", true),
            date_tolerance_hours: parse_i64("DATE_TOLERANCE_HOURS", 24)?,
        })
    }
}

/// Latency ceilings enforced by the execution engine and adapters.
#[derive(Debug, Clone)]
pub struct LatencyEnvConfig {
    pub end_to_end_max_ms: u64,
    pub order_placement_max_ms: u64,
    pub orderbook_fetch_max_ms: u64,
    /// Bound on the post-transport-error reconciliation query.
    pub reconcile_max_ms: u64,
}

impl LatencyEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            end_to_end_max_ms: parse_u64("END_TO_END_MAX_MS", 2000)?,
            order_placement_max_ms: parse_u64("ORDER_PLACEMENT_MAX_MS", 1500)?,
            orderbook_fetch_max_ms: parse_u64("ORDERBOOK_FETCH_MAX_MS", 1000)?,
            reconcile_max_ms: parse_u64("RECONCILE_MAX_MS", 5000)?,
        })
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone)]
pub struct BreakerEnvConfig {
    pub max_consecutive_failures: u32,
    pub max_asymmetric_executions: u32,
}

impl BreakerEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            max_consecutive_failures: parse_u32("MAX_CONSECUTIVE_FAILURES", 3)?,
            max_asymmetric_executions: parse_u32("MAX_ASYMMETRIC_EXECUTIONS", 1)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn trading_defaults() {
        let config = TradingEnvConfig::from_env().expect("defaults must parse");
        assert_eq!(config.min_profit_threshold, dec!(0.03));
        assert_eq!(config.min_liquidity_depth, 50);
        assert_eq!(config.opportunity_ttl_ms, 5000);
        assert_eq!(config.fees.kalshi_fee_cap, dec!(0.07));
    }

    #[test]
    fn breaker_defaults() {
        let config = BreakerEnvConfig::from_env().expect("defaults must parse");
        assert_eq!(config.max_consecutive_failures, 3);
        assert_eq!(config.max_asymmetric_executions, 1);
    }
}
