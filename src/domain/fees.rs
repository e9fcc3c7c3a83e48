//! Fee model for two-leg cross-venue trades.
//!
//! Pure and deterministic: same inputs, same fees, no I/O. All arithmetic
//! is `Decimal` so repeated estimation never drifts.

use crate::domain::types::Venue;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Venue fee schedule.
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    /// Polymarket taker rate, applied to buy notional and to the winning
    /// payout of a Polymarket sell leg.
    pub polymarket_taker_rate: Decimal,
    /// Kalshi fee rate on potential payout of the sell leg.
    pub kalshi_fee_rate: Decimal,
    /// Kalshi per-contract fee cap in USD.
    pub kalshi_fee_cap: Decimal,
    /// Amortized on-chain settlement cost, charged once per Polymarket leg.
    pub gas_cost_usd: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            polymarket_taker_rate: dec!(0.02),
            kalshi_fee_rate: dec!(0.07),
            kalshi_fee_cap: dec!(0.07),
            gas_cost_usd: dec!(0.30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeeModel {
    schedule: FeeSchedule,
}

impl FeeModel {
    pub fn new(schedule: FeeSchedule) -> Self {
        Self { schedule }
    }

    /// Total fees in USD for buying `quantity` contracts at `buy_price` on
    /// `buy_venue` and selling them at `sell_price` on the other venue.
    pub fn total(
        &self,
        buy_venue: Venue,
        sell_venue: Venue,
        buy_price: Decimal,
        sell_price: Decimal,
        quantity: u64,
    ) -> Decimal {
        let qty = Decimal::from(quantity);
        let mut fees = Decimal::ZERO;

        match buy_venue {
            Venue::Polymarket => {
                fees += self.schedule.polymarket_taker_rate * buy_price * qty;
                fees += self.schedule.gas_cost_usd;
            }
            // No Kalshi fee on the buy side.
            Venue::Kalshi => {}
        }

        match sell_venue {
            Venue::Polymarket => {
                let payout = Decimal::ONE - sell_price;
                fees += self.schedule.polymarket_taker_rate * payout * qty;
                fees += self.schedule.gas_cost_usd;
            }
            Venue::Kalshi => {
                let per_contract = (self.schedule.kalshi_fee_rate * (Decimal::ONE - sell_price))
                    .min(self.schedule.kalshi_fee_cap);
                fees += per_contract * qty;
            }
        }

        fees
    }

    /// Fees per contract, used by the detector to net out a unit spread.
    pub fn per_unit(
        &self,
        buy_venue: Venue,
        sell_venue: Venue,
        buy_price: Decimal,
        sell_price: Decimal,
        quantity: u64,
    ) -> Decimal {
        if quantity == 0 {
            return Decimal::ZERO;
        }
        self.total(buy_venue, sell_venue, buy_price, sell_price, quantity)
            / Decimal::from(quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> FeeModel {
        FeeModel::new(FeeSchedule::default())
    }

    #[test]
    fn buy_polymarket_sell_kalshi() {
        let fees = model().total(Venue::Polymarket, Venue::Kalshi, dec!(0.42), dec!(0.50), 100);
        // Poly taker: 0.02 * 0.42 * 100 = 0.84; gas 0.30;
        // Kalshi sell: min(0.07 * 0.50, 0.07) = 0.035 per contract = 3.50.
        assert_eq!(fees, dec!(0.84) + dec!(0.30) + dec!(3.50));
    }

    #[test]
    fn buy_kalshi_sell_polymarket() {
        let fees = model().total(Venue::Kalshi, Venue::Polymarket, dec!(0.42), dec!(0.50), 100);
        // No Kalshi buy fee. Poly sell: 0.02 * (1 - 0.50) * 100 = 1.00; gas 0.30.
        assert_eq!(fees, dec!(1.00) + dec!(0.30));
    }

    #[test]
    fn kalshi_cap_binds_at_low_sell_price() {
        let m = model();
        // 0.07 * (1 - 0.05) = 0.0665 < cap, uncapped.
        let low = m.total(Venue::Polymarket, Venue::Kalshi, dec!(0.01), dec!(0.05), 1);
        // 0.07 * (1 - 0.02) = 0.0686 < 0.07 still uncapped; at sell 0.00 the
        // raw fee 0.07 equals the cap exactly.
        let floor = m.total(Venue::Polymarket, Venue::Kalshi, dec!(0.01), dec!(0.00), 1);
        assert!(low < floor);
        assert_eq!(
            floor,
            dec!(0.02) * dec!(0.01) + dec!(0.30) + dec!(0.07)
        );
    }

    #[test]
    fn monotone_in_quantity() {
        let m = model();
        let mut prev = Decimal::MIN;
        for qty in [1u64, 10, 50, 100, 500] {
            let f = m.total(Venue::Polymarket, Venue::Kalshi, dec!(0.40), dec!(0.55), qty);
            assert!(f >= prev, "fees must not decrease with quantity");
            prev = f;
        }
    }

    #[test]
    fn kalshi_leg_monotone_in_payout() {
        let m = model();
        let mut prev = Decimal::MIN;
        // Payout (1 - sell_price) grows as sell_price falls.
        for sell in [dec!(0.90), dec!(0.70), dec!(0.50), dec!(0.30), dec!(0.10)] {
            let f = m.total(Venue::Polymarket, Venue::Kalshi, dec!(0.05), sell, 100);
            assert!(f >= prev, "fees must not decrease as payout grows");
            prev = f;
        }
    }

    #[test]
    fn per_unit_is_total_over_quantity() {
        let m = model();
        let total = m.total(Venue::Kalshi, Venue::Polymarket, dec!(0.40), dec!(0.55), 80);
        let unit = m.per_unit(Venue::Kalshi, Venue::Polymarket, dec!(0.40), dec!(0.55), 80);
        assert_eq!(unit * dec!(80), total);
    }
}
