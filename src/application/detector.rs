//! Top-of-book arbitrage detection.
//!
//! Pure computation over two order books and a mapping: both directional
//! spreads are netted against the fee model and the better qualifying
//! direction becomes a short-lived `Opportunity`.

use crate::domain::fees::FeeModel;
use crate::domain::types::{EventMapping, Opportunity, OrderBook, Venue};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Fractional profit floor relative to the buy price.
    pub min_profit_threshold: Decimal,
    /// Minimum executable quantity for an opportunity to be worth firing.
    pub min_liquidity_depth: u64,
    pub opportunity_ttl_ms: u64,
}

pub struct ArbitrageDetector {
    fees: FeeModel,
    config: DetectorConfig,
    /// Last opportunity per mapping id. Entries are only meaningful until
    /// `expires_at`; readers must re-check expiry.
    cache: Mutex<HashMap<String, Opportunity>>,
}

struct Direction {
    buy_venue: Venue,
    buy_price: Decimal,
    buy_available: Decimal,
    sell_venue: Venue,
    sell_price: Decimal,
    sell_available: Decimal,
    gross: Decimal,
    fees_per_unit: Decimal,
    net: Decimal,
    max_qty: u64,
}

impl ArbitrageDetector {
    pub fn new(fees: FeeModel, config: DetectorConfig) -> Self {
        Self {
            fees,
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate both directions for a mapping. Returns the better
    /// qualifying opportunity, if any, and caches it.
    pub fn detect(
        &self,
        mapping: &EventMapping,
        polymarket: &OrderBook,
        kalshi: &OrderBook,
    ) -> Option<Opportunity> {
        if !polymarket.validate() || !kalshi.validate() {
            debug!(mapping = %mapping.id, "Discarding invalid order book pair");
            return None;
        }

        let a = self.evaluate_direction(polymarket, kalshi);
        let b = self.evaluate_direction(kalshi, polymarket);

        let chosen = match (a, b) {
            (Some(x), Some(y)) => {
                // Both directions qualify; take the larger total edge.
                if x.net * Decimal::from(x.max_qty) >= y.net * Decimal::from(y.max_qty) {
                    Some(x)
                } else {
                    Some(y)
                }
            }
            (x, y) => x.or(y),
        }?;

        let now = Utc::now();
        let opportunity = Opportunity {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            mapping_id: mapping.id.clone(),
            buy_venue: chosen.buy_venue,
            buy_price: chosen.buy_price,
            buy_available_qty: chosen.buy_available,
            sell_venue: chosen.sell_venue,
            sell_price: chosen.sell_price,
            sell_available_qty: chosen.sell_available,
            gross_spread: chosen.gross,
            est_fees: chosen.fees_per_unit,
            net_profit_per_unit: chosen.net,
            max_qty: chosen.max_qty,
            execution_risk: self.execution_risk(chosen.max_qty),
            expires_at: now + Duration::milliseconds(self.config.opportunity_ttl_ms as i64),
        };

        debug!(
            mapping = %mapping.id,
            buy = %opportunity.buy_venue,
            sell = %opportunity.sell_venue,
            net = %opportunity.net_profit_per_unit,
            max_qty = opportunity.max_qty,
            "Opportunity detected"
        );

        self.cache
            .lock()
            .expect("detector cache poisoned")
            .insert(mapping.id.clone(), opportunity.clone());

        Some(opportunity)
    }

    /// One direction: buy at `buy_book`'s best ask, sell into `sell_book`'s
    /// best bid.
    fn evaluate_direction(&self, buy_book: &OrderBook, sell_book: &OrderBook) -> Option<Direction> {
        let ask = buy_book.best_ask()?;
        let bid = sell_book.best_bid()?;

        // Binary prices strictly inside (0, 1); anything else is a venue
        // glitch, not an edge.
        for price in [ask.price, bid.price] {
            if price <= Decimal::ZERO || price >= Decimal::ONE {
                return None;
            }
        }

        if ask.price >= bid.price {
            return None;
        }

        let max_qty = ask
            .size
            .min(bid.size)
            .floor()
            .to_u64()
            .unwrap_or(0);
        if max_qty < self.config.min_liquidity_depth {
            return None;
        }

        let gross = bid.price - ask.price;
        let fees_per_unit = self.fees.per_unit(
            buy_book.venue,
            sell_book.venue,
            ask.price,
            bid.price,
            max_qty,
        );
        let net = gross - fees_per_unit;

        if net <= self.config.min_profit_threshold * ask.price {
            return None;
        }

        Some(Direction {
            buy_venue: buy_book.venue,
            buy_price: ask.price,
            buy_available: ask.size,
            sell_venue: sell_book.venue,
            sell_price: bid.price,
            sell_available: bid.size,
            gross,
            fees_per_unit,
            net,
            max_qty,
        })
    }

    /// Decreasing in available depth relative to the configured floor:
    /// an opportunity exactly at the floor carries full risk, one at 5x
    /// the floor carries none.
    fn execution_risk(&self, max_qty: u64) -> f64 {
        let depth = self.config.min_liquidity_depth.max(1) as f64;
        let ratio = max_qty as f64 / depth;
        (1.0 - (ratio - 1.0) / 4.0).clamp(0.0, 1.0)
    }

    /// Cached opportunity for a mapping, if still alive.
    pub fn last_opportunity(&self, mapping_id: &str) -> Option<Opportunity> {
        let cache = self.cache.lock().expect("detector cache poisoned");
        cache
            .get(mapping_id)
            .filter(|o| !o.is_expired(Utc::now()))
            .cloned()
    }

    /// All live cached opportunities.
    pub fn cached_opportunities(&self) -> Vec<Opportunity> {
        let now = Utc::now();
        let cache = self.cache.lock().expect("detector cache poisoned");
        cache
            .values()
            .filter(|o| !o.is_expired(now))
            .cloned()
            .collect()
    }

    /// Drop expired entries. Called periodically by the supervisor.
    pub fn clear_expired(&self) {
        let now = Utc::now();
        let mut cache = self.cache.lock().expect("detector cache poisoned");
        cache.retain(|_, o| !o.is_expired(now));
    }
}
