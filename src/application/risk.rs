//! Pre-trade gating and the in-memory position ledger.

use crate::config::TradingEnvConfig;
use crate::domain::errors::FailureKind;
use crate::domain::types::{Inventory, Opportunity, Outcome, Position, Venue};
use crate::infrastructure::circuit_breaker::CircuitBreaker;
use crate::infrastructure::state_store::{StateStore, inventory_for};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::warn;

/// Reference price used to value an imbalance when no live quote is at
/// hand; binary contracts are bounded by 1 so half is the neutral choice.
const IMBALANCE_REFERENCE_PRICE: Decimal = dec!(0.5);

/// Hard rejection reasons. Every rejected decision carries at least one.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RiskReason {
    #[error("circuit breaker is paused")]
    CircuitBreakerPaused,

    #[error("total exposure {current} + {added} exceeds limit {limit}")]
    TotalExposureExceeded {
        current: Decimal,
        added: Decimal,
        limit: Decimal,
    },

    #[error("event exposure {current} + {added} exceeds per-event limit {limit}")]
    EventExposureExceeded {
        current: Decimal,
        added: Decimal,
        limit: Decimal,
    },

    #[error("position imbalance {imbalance} exceeds limit {limit}")]
    ImbalanceExceeded { imbalance: i64, limit: u64 },

    #[error("daily pnl {pnl} breaches loss limit {limit}")]
    DailyLossLimitBreached { pnl: Decimal, limit: Decimal },

    #[error("profit ratio {ratio} below threshold {threshold}")]
    ProfitBelowThreshold { ratio: Decimal, threshold: Decimal },

    #[error("quantity {qty} outside bounds [{min}, {max}]")]
    QuantityOutOfBounds { qty: u64, min: u64, max: u64 },

    #[error("trade value {value} below minimum {min}")]
    TradeValueTooSmall { value: Decimal, min: Decimal },

    #[error("absolute profit {profit} below minimum {min}")]
    AbsoluteProfitTooSmall { profit: Decimal, min: Decimal },
}

/// Non-blocking warnings attached to an approved decision.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskWarning {
    ThinLiquidity { max_qty: u64, min_depth: u64 },
    ElevatedExecutionRisk { risk: f64 },
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub approved: bool,
    pub reasons: Vec<RiskReason>,
    pub warnings: Vec<RiskWarning>,
    pub suggested_qty: Option<u64>,
}

type LedgerKey = (Venue, String, Outcome);

pub struct RiskManager {
    limits: TradingEnvConfig,
    breaker: Arc<CircuitBreaker>,
    store: Arc<StateStore>,
    ledger: Mutex<HashMap<LedgerKey, Position>>,
}

impl RiskManager {
    pub fn new(
        limits: TradingEnvConfig,
        breaker: Arc<CircuitBreaker>,
        store: Arc<StateStore>,
    ) -> Self {
        Self {
            limits,
            breaker,
            store,
            ledger: Mutex::new(HashMap::new()),
        }
    }

    /// Run the ordered pre-trade checks. Hard failures short-circuit;
    /// warnings never block.
    pub async fn validate(&self, opportunity: &Opportunity, proposed_qty: u64) -> Decision {
        let mut warnings = Vec::new();
        let qty = Decimal::from(proposed_qty);
        let added_exposure = qty * opportunity.buy_price;

        if self.breaker.is_paused() {
            return Self::rejected(RiskReason::CircuitBreakerPaused);
        }

        let total = self.total_exposure();
        if total + added_exposure > self.limits.max_total_exposure {
            return Self::rejected(RiskReason::TotalExposureExceeded {
                current: total,
                added: added_exposure,
                limit: self.limits.max_total_exposure,
            });
        }

        let event = self.event_exposure(&opportunity.mapping_id);
        if event + added_exposure > self.limits.max_exposure_per_event {
            return Self::rejected(RiskReason::EventExposureExceeded {
                current: event,
                added: added_exposure,
                limit: self.limits.max_exposure_per_event,
            });
        }

        let inventory = self.inventory(&opportunity.mapping_id);
        if inventory.net_position.unsigned_abs() > self.limits.max_position_imbalance {
            return Self::rejected(RiskReason::ImbalanceExceeded {
                imbalance: inventory.net_position,
                limit: self.limits.max_position_imbalance,
            });
        }

        let daily = self.store.daily();
        if daily.pnl < -self.limits.daily_loss_limit {
            warn!(pnl = %daily.pnl, limit = %self.limits.daily_loss_limit, "Daily loss limit breached");
            self.breaker.record_failure(FailureKind::DailyLossLimit).await;
            return Self::rejected(RiskReason::DailyLossLimitBreached {
                pnl: daily.pnl,
                limit: self.limits.daily_loss_limit,
            });
        }

        if opportunity.buy_price > Decimal::ZERO {
            let ratio = opportunity.net_profit_per_unit / opportunity.buy_price;
            if ratio < self.limits.min_profit_threshold {
                return Self::rejected(RiskReason::ProfitBelowThreshold {
                    ratio,
                    threshold: self.limits.min_profit_threshold,
                });
            }
        }

        if proposed_qty < self.limits.min_qty_per_trade
            || proposed_qty > self.limits.max_qty_per_trade
        {
            return Self::rejected(RiskReason::QuantityOutOfBounds {
                qty: proposed_qty,
                min: self.limits.min_qty_per_trade,
                max: self.limits.max_qty_per_trade,
            });
        }

        if added_exposure < self.limits.min_trade_value {
            return Self::rejected(RiskReason::TradeValueTooSmall {
                value: added_exposure,
                min: self.limits.min_trade_value,
            });
        }

        let abs_profit = qty * opportunity.net_profit_per_unit;
        if abs_profit < self.limits.min_profit_abs {
            return Self::rejected(RiskReason::AbsoluteProfitTooSmall {
                profit: abs_profit,
                min: self.limits.min_profit_abs,
            });
        }

        if opportunity.max_qty < self.limits.min_liquidity_depth {
            warnings.push(RiskWarning::ThinLiquidity {
                max_qty: opportunity.max_qty,
                min_depth: self.limits.min_liquidity_depth,
            });
        }
        if opportunity.execution_risk > 0.5 {
            warnings.push(RiskWarning::ElevatedExecutionRisk {
                risk: opportunity.execution_risk,
            });
        }

        Decision {
            approved: true,
            reasons: Vec::new(),
            warnings,
            suggested_qty: self.optimal_qty(opportunity),
        }
    }

    fn rejected(reason: RiskReason) -> Decision {
        Decision {
            approved: false,
            reasons: vec![reason],
            warnings: Vec::new(),
            suggested_qty: None,
        }
    }

    /// Largest quantity that fits availability, the per-trade cap, and the
    /// remaining total-exposure headroom. `None` when even that is below
    /// the minimum trade size.
    pub fn optimal_qty(&self, opportunity: &Opportunity) -> Option<u64> {
        let headroom = self.limits.max_total_exposure - self.total_exposure();
        if headroom <= Decimal::ZERO || opportunity.buy_price <= Decimal::ZERO {
            return None;
        }

        let exposure_cap = (headroom / opportunity.buy_price)
            .floor()
            .to_u64()
            .unwrap_or(0);
        let available = opportunity
            .buy_available_qty
            .min(opportunity.sell_available_qty)
            .floor()
            .to_u64()
            .unwrap_or(0);

        let qty = available
            .min(opportunity.max_qty)
            .min(self.limits.max_qty_per_trade)
            .min(exposure_cap);

        (qty >= self.limits.min_qty_per_trade).then_some(qty)
    }

    /// Fold a fill into the ledger, aggregating per (venue, contract,
    /// outcome) with a volume-weighted average price. Returns the
    /// aggregated position so callers can mirror it into durable state.
    pub fn apply_fill(&self, position: Position) -> Position {
        let mut ledger = self.ledger.lock().expect("risk ledger poisoned");
        let key = (
            position.venue,
            position.contract.clone(),
            position.outcome,
        );

        match ledger.get_mut(&key) {
            Some(existing) => {
                let total_value = existing.notional() + position.notional();
                let new_qty = existing.quantity + position.quantity;
                if new_qty > 0 {
                    existing.avg_price = total_value / Decimal::from(new_qty);
                }
                existing.quantity = new_qty;
                existing.updated_at = Utc::now();
                if existing.mapping_id.is_none() {
                    existing.mapping_id = position.mapping_id;
                }
                existing.clone()
            }
            None => {
                if position.quantity > 0 {
                    ledger.insert(key, position.clone());
                }
                position
            }
        }
    }

    /// Replace the ledger wholesale from an authoritative position set.
    pub fn reconcile(&self, positions: Vec<Position>) {
        let mut ledger = self.ledger.lock().expect("risk ledger poisoned");
        ledger.clear();
        for position in positions {
            if position.quantity == 0 {
                continue;
            }
            let key = (
                position.venue,
                position.contract.clone(),
                position.outcome,
            );
            ledger.insert(key, position);
        }
    }

    pub fn positions(&self) -> Vec<Position> {
        let ledger = self.ledger.lock().expect("risk ledger poisoned");
        let mut positions: Vec<Position> = ledger.values().cloned().collect();
        positions.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));
        positions
    }

    pub fn total_exposure(&self) -> Decimal {
        let ledger = self.ledger.lock().expect("risk ledger poisoned");
        ledger.values().map(Position::notional).sum()
    }

    pub fn event_exposure(&self, mapping_id: &str) -> Decimal {
        let ledger = self.ledger.lock().expect("risk ledger poisoned");
        ledger
            .values()
            .filter(|p| p.mapping_id.as_deref() == Some(mapping_id))
            .map(Position::notional)
            .sum()
    }

    pub fn inventory(&self, mapping_id: &str) -> Inventory {
        let positions = self.positions();
        inventory_for(&positions, mapping_id, IMBALANCE_REFERENCE_PRICE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerEnvConfig;
    use crate::infrastructure::mock::RecordingAlerter;
    use chrono::Duration;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn limits() -> TradingEnvConfig {
        TradingEnvConfig {
            min_profit_threshold: dec!(0.03),
            max_slippage: dec!(0.10),
            max_total_exposure: dec!(1000),
            max_exposure_per_event: dec!(250),
            max_position_imbalance: 10,
            daily_loss_limit: dec!(100),
            max_qty_per_trade: 500,
            min_qty_per_trade: 5,
            min_trade_value: dec!(10),
            min_profit_abs: dec!(0.50),
            min_liquidity_depth: 50,
            opportunity_ttl_ms: 5000,
            fees: crate::domain::fees::FeeSchedule::default(),
        }
    }

    fn fixture() -> (TempDir, Arc<StateStore>, RiskManager) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(StateStore::load(dir.path().join("state.json")).unwrap());
        let breaker = Arc::new(CircuitBreaker::new(
            store.clone(),
            Arc::new(RecordingAlerter::default()),
            &BreakerEnvConfig {
                max_consecutive_failures: 3,
                max_asymmetric_executions: 1,
            },
        ));
        let risk = RiskManager::new(limits(), breaker, store.clone());
        (dir, store, risk)
    }

    fn opportunity(buy_price: Decimal, net: Decimal, max_qty: u64) -> Opportunity {
        let now = Utc::now();
        Opportunity {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            mapping_id: "map-1".to_string(),
            buy_venue: Venue::Polymarket,
            buy_price,
            buy_available_qty: Decimal::from(max_qty),
            sell_venue: Venue::Kalshi,
            sell_price: buy_price + net + dec!(0.02),
            sell_available_qty: Decimal::from(max_qty),
            gross_spread: net + dec!(0.02),
            est_fees: dec!(0.02),
            net_profit_per_unit: net,
            max_qty,
            execution_risk: 0.2,
            expires_at: now + Duration::seconds(5),
        }
    }

    fn position(venue: Venue, outcome: Outcome, qty: u64, price: Decimal) -> Position {
        Position {
            id: Uuid::new_v4().to_string(),
            venue,
            contract: format!("{venue}-c"),
            mapping_id: Some("map-1".to_string()),
            outcome,
            quantity: qty,
            avg_price: price,
            opened_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn approves_a_clean_trade_with_suggested_qty() {
        let (_dir, _store, risk) = fixture();
        let opp = opportunity(dec!(0.42), dec!(0.04), 100);

        let decision = risk.validate(&opp, 100).await;
        assert!(decision.approved, "reasons: {:?}", decision.reasons);
        assert!(decision.reasons.is_empty());
        assert_eq!(decision.suggested_qty, Some(100));
    }

    #[tokio::test]
    async fn rejects_when_paused() {
        let (_dir, store, risk) = fixture();
        store.update(|s| s.cb.paused = true);

        let decision = risk.validate(&opportunity(dec!(0.42), dec!(0.04), 100), 100).await;
        assert!(!decision.approved);
        assert_eq!(decision.reasons, vec![RiskReason::CircuitBreakerPaused]);
    }

    #[tokio::test]
    async fn rejects_total_exposure_breach() {
        let (_dir, _store, risk) = fixture();
        risk.apply_fill(position(Venue::Polymarket, Outcome::Yes, 2000, dec!(0.49)));

        let decision = risk.validate(&opportunity(dec!(0.42), dec!(0.04), 200), 200).await;
        assert!(!decision.approved);
        assert!(matches!(
            decision.reasons[0],
            RiskReason::TotalExposureExceeded { .. }
        ));
    }

    #[tokio::test]
    async fn rejects_imbalance_breach() {
        let (_dir, _store, risk) = fixture();
        // 20 unhedged yes contracts against a limit of 10.
        risk.apply_fill(position(Venue::Polymarket, Outcome::Yes, 20, dec!(0.40)));

        let decision = risk.validate(&opportunity(dec!(0.42), dec!(0.04), 100), 100).await;
        assert!(!decision.approved);
        assert!(matches!(
            decision.reasons[0],
            RiskReason::ImbalanceExceeded { .. }
        ));
    }

    #[tokio::test]
    async fn daily_loss_breach_rejects_and_pauses() {
        let (_dir, store, risk) = fixture();
        store.record_trade(dec!(-150), dec!(100));

        let decision = risk.validate(&opportunity(dec!(0.42), dec!(0.04), 100), 100).await;
        assert!(!decision.approved);
        assert!(matches!(
            decision.reasons[0],
            RiskReason::DailyLossLimitBreached { .. }
        ));
        assert!(store.breaker().paused);
    }

    #[tokio::test]
    async fn rejects_quantity_out_of_bounds() {
        let (_dir, _store, risk) = fixture();
        let opp = opportunity(dec!(0.42), dec!(0.04), 1000);

        let low = risk.validate(&opp, 2).await;
        assert!(matches!(low.reasons[0], RiskReason::QuantityOutOfBounds { .. }));

        let high = risk.validate(&opp, 900).await;
        assert!(matches!(high.reasons[0], RiskReason::QuantityOutOfBounds { .. }));
    }

    #[tokio::test]
    async fn rejects_uneconomic_trades() {
        let (_dir, _store, risk) = fixture();
        // 10 contracts at 0.42 is a 4.20 notional, below min_trade_value.
        let decision = risk.validate(&opportunity(dec!(0.42), dec!(0.04), 100), 10).await;
        assert!(!decision.approved);
        assert!(matches!(
            decision.reasons[0],
            RiskReason::TradeValueTooSmall { .. }
        ));
    }

    #[tokio::test]
    async fn thin_liquidity_warns_but_approves() {
        let (_dir, _store, risk) = fixture();
        let opp = opportunity(dec!(0.42), dec!(0.04), 40);

        let decision = risk.validate(&opp, 40).await;
        assert!(decision.approved);
        assert!(decision
            .warnings
            .iter()
            .any(|w| matches!(w, RiskWarning::ThinLiquidity { .. })));
    }

    #[test]
    fn optimal_qty_respects_exposure_headroom() {
        let (_dir, _store, risk) = fixture();
        // 900 of 1000 exposure used.
        risk.apply_fill(position(Venue::Polymarket, Outcome::Yes, 1800, dec!(0.5)));

        let opp = opportunity(dec!(0.50), dec!(0.04), 400);
        // Headroom 100 at 0.50 is 200 contracts.
        assert_eq!(risk.optimal_qty(&opp), Some(200));
    }

    #[test]
    fn optimal_qty_below_minimum_is_none() {
        let (_dir, _store, risk) = fixture();
        let opp = opportunity(dec!(0.50), dec!(0.04), 3);
        assert_eq!(risk.optimal_qty(&opp), None);
    }

    #[test]
    fn ledger_exposure_matches_positions() {
        let (_dir, _store, risk) = fixture();
        risk.apply_fill(position(Venue::Polymarket, Outcome::Yes, 100, dec!(0.40)));
        risk.apply_fill(position(Venue::Kalshi, Outcome::No, 100, dec!(0.50)));

        let expected: Decimal = risk.positions().iter().map(Position::notional).sum();
        assert_eq!(risk.total_exposure(), expected);
        assert_eq!(risk.total_exposure(), dec!(90));
    }

    #[test]
    fn apply_fill_aggregates_same_key_with_weighted_price() {
        let (_dir, _store, risk) = fixture();
        risk.apply_fill(position(Venue::Kalshi, Outcome::Yes, 100, dec!(0.40)));
        let aggregated = risk.apply_fill(position(Venue::Kalshi, Outcome::Yes, 100, dec!(0.60)));
        assert_eq!(aggregated.quantity, 200);

        let positions = risk.positions();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, 200);
        assert_eq!(positions[0].avg_price, dec!(0.50));
    }

    #[test]
    fn reconcile_replaces_ledger() {
        let (_dir, _store, risk) = fixture();
        risk.apply_fill(position(Venue::Polymarket, Outcome::Yes, 100, dec!(0.40)));

        let replacement = vec![position(Venue::Kalshi, Outcome::No, 25, dec!(0.30))];
        risk.reconcile(replacement.clone());

        let positions = risk.positions();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].venue, Venue::Kalshi);
        assert_eq!(risk.total_exposure(), dec!(7.5));
    }
}
