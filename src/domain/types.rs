use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The two venues this system trades across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    Polymarket,
    Kalshi,
}

impl Venue {
    pub fn other(&self) -> Venue {
        match self {
            Venue::Polymarket => Venue::Kalshi,
            Venue::Kalshi => Venue::Polymarket,
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Venue::Polymarket => write!(f, "polymarket"),
            Venue::Kalshi => write!(f, "kalshi"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Which binary outcome a position is long.
///
/// Selling Yes at price p is equivalent to holding No opened at (1 - p);
/// every hedged pair in this system is recorded as Yes on the buy venue
/// and No on the sell venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Yes,
    No,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Yes => write!(f, "yes"),
            Outcome::No => write!(f, "no"),
        }
    }
}

/// One resting level of an order book. Prices are decimals in [0, 1];
/// venue-native units are converted at the adapter boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// Top levels of a venue order book for a single contract.
///
/// Bids sorted descending, asks ascending. Books with a crossed top of
/// book or non-positive sizes fail `validate` and are discarded upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub venue: Venue,
    pub contract: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub timestamp: DateTime<Utc>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    pub fn validate(&self) -> bool {
        if self
            .bids
            .iter()
            .chain(self.asks.iter())
            .any(|l| l.size <= Decimal::ZERO)
        {
            return false;
        }
        if !self.bids.windows(2).all(|w| w[0].price >= w[1].price) {
            return false;
        }
        if !self.asks.windows(2).all(|w| w[0].price <= w[1].price) {
            return false;
        }
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid.price < ask.price,
            _ => true,
        }
    }
}

/// Fill-or-kill order as submitted to a venue adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FokOrder {
    pub contract: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: u64,
}

/// Outcome of a fill-or-kill placement.
///
/// `Rejected` is a venue-confirmed no-fill. `TransportError` is ambiguous:
/// the order may have reached the venue, so the caller must treat it as a
/// potential fill until reconciled against venue positions.
#[derive(Debug, Clone)]
pub enum FillResult {
    Filled {
        fill_price: Decimal,
        fill_qty: u64,
        fees: Decimal,
        order_id: String,
        ts: DateTime<Utc>,
    },
    Rejected {
        reason: String,
        order_id: Option<String>,
    },
    TransportError {
        detail: String,
    },
}

impl FillResult {
    pub fn is_filled(&self) -> bool {
        matches!(self, FillResult::Filled { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, FillResult::Rejected { .. })
    }

    pub fn is_transport_error(&self) -> bool {
        matches!(self, FillResult::TransportError { .. })
    }
}

/// Per-venue account balance, normalized to USD-equivalent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balances {
    pub venue: Venue,
    pub available: Decimal,
    pub total: Decimal,
}

/// A position as reported by a venue; used for startup sync and
/// post-transport-error reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenuePosition {
    pub contract: String,
    pub outcome: Outcome,
    pub quantity: u64,
    pub avg_price: Decimal,
}

/// How a mapping between two contracts was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMethod {
    Exact,
    Fuzzy,
    Manual,
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchMethod::Exact => write!(f, "exact"),
            MatchMethod::Fuzzy => write!(f, "fuzzy"),
            MatchMethod::Manual => write!(f, "manual"),
        }
    }
}

/// Declared equivalence between a Polymarket contract and a Kalshi contract.
///
/// Confidence is immutable after creation; only `active` and `updated_at`
/// may change. Inactive mappings are retained for historical reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMapping {
    pub id: String,
    pub polymarket_contract: String,
    pub kalshi_contract: String,
    pub description: String,
    pub confidence: f64,
    pub method: MatchMethod,
    pub resolution_time: Option<DateTime<Utc>>,
    /// Documents the Yes/No convention for this pair, e.g.
    /// "poly YES == kalshi YES; selling yes holds no".
    pub outcome_alignment: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EventMapping {
    pub fn contract_on(&self, venue: Venue) -> &str {
        match venue {
            Venue::Polymarket => &self.polymarket_contract,
            Venue::Kalshi => &self.kalshi_contract,
        }
    }
}

/// A time-bounded arbitrage candidate derived from two tops of book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub mapping_id: String,
    pub buy_venue: Venue,
    pub buy_price: Decimal,
    pub buy_available_qty: Decimal,
    pub sell_venue: Venue,
    pub sell_price: Decimal,
    pub sell_available_qty: Decimal,
    pub gross_spread: Decimal,
    pub est_fees: Decimal,
    pub net_profit_per_unit: Decimal,
    pub max_qty: u64,
    pub execution_risk: f64,
    pub expires_at: DateTime<Utc>,
}

impl Opportunity {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// An open position in the tradable ledger, aggregated per
/// (venue, contract, outcome) and discarded once reduced to zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub venue: Venue,
    pub contract: String,
    pub mapping_id: Option<String>,
    pub outcome: Outcome,
    pub quantity: u64,
    pub avg_price: Decimal,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn notional(&self) -> Decimal {
        self.avg_price * Decimal::from(self.quantity)
    }
}

/// Derived per-mapping inventory view used for imbalance checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    pub polymarket_yes: u64,
    pub polymarket_no: u64,
    pub kalshi_yes: u64,
    pub kalshi_no: u64,
    pub net_position: i64,
    pub imbalance_value: Decimal,
    pub needs_rebalance: bool,
}

/// Daily counters; reset at the UTC midnight boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyState {
    pub trading_date: NaiveDate,
    pub pnl: Decimal,
    pub trade_count: u64,
    pub volume: Decimal,
    pub last_trade_at: Option<DateTime<Utc>>,
}

impl DailyState {
    pub fn zero(trading_date: NaiveDate) -> Self {
        Self {
            trading_date,
            pnl: Decimal::ZERO,
            trade_count: 0,
            volume: Decimal::ZERO,
            last_trade_at: None,
        }
    }
}

/// Circuit breaker state, owned by the state store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BreakerState {
    pub paused: bool,
    pub reason: Option<String>,
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub asymmetric_count: u32,
}

/// Terminal status of an execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Complete,
    NotExecuted,
    Failed,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Complete => write!(f, "complete"),
            ExecutionStatus::NotExecuted => write!(f, "not_executed"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Durable record of one execution attempt. Exactly one is written per
/// attempt, whatever the outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub opportunity_id: String,
    pub mapping_id: String,
    pub status: ExecutionStatus,
    pub buy_venue: Venue,
    pub sell_venue: Venue,
    pub quantity: u64,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub realized_pnl: Option<Decimal>,
    pub fees: Decimal,
    pub is_dry_run: bool,
    pub detail: Option<String>,
    pub executed_at: DateTime<Utc>,
}

/// The full durable process snapshot.
///
/// Unknown fields round-trip through `extra` so a newer writer's snapshot
/// survives a read-modify-write by an older binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessState {
    pub daily: DailyState,
    pub cb: BreakerState,
    pub positions: Vec<Position>,
    pub last_heartbeat: DateTime<Utc>,
    pub last_successful_trade: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ProcessState {
    pub fn zero(now: DateTime<Utc>) -> Self {
        Self {
            daily: DailyState::zero(now.date_naive()),
            cb: BreakerState::default(),
            positions: Vec::new(),
            last_heartbeat: now,
            last_successful_trade: None,
            extra: HashMap::new(),
        }
    }
}
