//! Execution engine outcomes over scripted venues: every attempt lands in
//! exactly one of NotExecuted / BothRejected / BothFilled / Asymmetric,
//! with the matching durable record and circuit-breaker transition.

mod common;

use chrono::Utc;
use common::{Fixture, zero_fees};
use predarb::application::engine::ExecutionOutcome;
use predarb::config::Mode;
use predarb::domain::ports::{Severity, VenueAdapter};
use predarb::domain::types::{
    ExecutionStatus, FillResult, Opportunity, Outcome, Venue, VenuePosition,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn filled(price: Decimal, qty: u64) -> FillResult {
    FillResult::Filled {
        fill_price: price,
        fill_qty: qty,
        fees: Decimal::ZERO,
        order_id: "ord-1".to_string(),
        ts: Utc::now(),
    }
}

fn rejected(reason: &str) -> FillResult {
    FillResult::Rejected {
        reason: reason.to_string(),
        order_id: None,
    }
}

fn transport(detail: &str) -> FillResult {
    FillResult::TransportError {
        detail: detail.to_string(),
    }
}

/// Detect against the scripted books so engine revalidation sees the same
/// opportunity.
async fn detected_opportunity(fx: &Fixture) -> Opportunity {
    let mapping = fx.mapping();
    let poly = fx.polymarket.get_order_book("poly-token").await.unwrap();
    let kalshi = fx.kalshi.get_order_book("KX-EVENT").await.unwrap();
    fx.detector
        .detect(&mapping, &poly, &kalshi)
        .expect("books must yield an opportunity")
}

#[tokio::test]
async fn both_filled_is_a_complete_trade() {
    let fx = Fixture::new(Mode::Live);
    fx.set_spread_books(dec!(100));
    let mapping = fx.mapping();
    let opp = detected_opportunity(&fx).await;

    fx.polymarket.queue_fill(filled(dec!(0.42), 100));
    fx.kalshi.queue_fill(filled(dec!(0.50), 100));

    let outcome = fx.engine.execute(&mapping, &opp).await.unwrap();
    let ExecutionOutcome::BothFilled { realized_pnl, qty, dry_run } = outcome else {
        panic!("expected BothFilled, got {outcome:?}");
    };
    assert_eq!(qty, 100);
    assert!(!dry_run);
    assert!(realized_pnl > Decimal::ZERO);

    // Exactly one durable record, status complete.
    let records = fx.executions.all();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::Complete);
    assert!(!records[0].is_dry_run);

    // Two positions: yes on the buy venue, no on the sell venue.
    let positions = fx.risk.positions();
    assert_eq!(positions.len(), 2);
    assert!(positions
        .iter()
        .any(|p| p.venue == Venue::Polymarket && p.outcome == Outcome::Yes && p.quantity == 100));
    assert!(positions
        .iter()
        .any(|p| p.venue == Venue::Kalshi && p.outcome == Outcome::No && p.quantity == 100));

    // Ledger and durable state agree at quiescence.
    assert_eq!(fx.store.positions().len(), 2);
    assert_eq!(fx.positions_repo.all().len(), 2);

    // One daily-counter increment.
    let daily = fx.store.daily();
    assert_eq!(daily.trade_count, 1);
    assert_eq!(daily.pnl, realized_pnl);
    assert!(daily.last_trade_at.is_some());

    assert!(!fx.breaker.is_paused());
    assert!(fx.alerter.has_severity(Severity::Medium));
}

#[tokio::test]
async fn both_rejected_is_a_no_op() {
    let fx = Fixture::new(Mode::Live);
    fx.set_spread_books(dec!(100));
    let mapping = fx.mapping();
    let opp = detected_opportunity(&fx).await;

    fx.polymarket.queue_fill(rejected("killed"));
    fx.kalshi.queue_fill(rejected("killed"));

    let outcome = fx.engine.execute(&mapping, &opp).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::BothRejected));

    let records = fx.executions.all();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::NotExecuted);

    assert!(fx.risk.positions().is_empty());
    assert_eq!(fx.store.daily().trade_count, 0);
    assert!(!fx.breaker.is_paused());
}

#[tokio::test]
async fn asymmetric_fill_pauses_breaker_in_same_transaction() {
    let fx = Fixture::new(Mode::Live);
    fx.set_spread_books(dec!(100));
    let mapping = fx.mapping();
    let opp = detected_opportunity(&fx).await;

    fx.polymarket.queue_fill(filled(dec!(0.42), 100));
    fx.kalshi.queue_fill(rejected("killed"));

    let outcome = fx.engine.execute(&mapping, &opp).await.unwrap();
    let ExecutionOutcome::Asymmetric { filled_venue } = outcome else {
        panic!("expected Asymmetric, got {outcome:?}");
    };
    assert_eq!(filled_venue, Some(Venue::Polymarket));

    // Breaker paused before execute returned.
    assert!(fx.breaker.is_paused());
    let cb = fx.breaker.state();
    assert_eq!(cb.asymmetric_count, 1);

    // The unhedged leg is on the book for a human; no unwind attempted.
    let positions = fx.risk.positions();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].venue, Venue::Polymarket);
    assert_eq!(positions[0].outcome, Outcome::Yes);
    assert_eq!(fx.polymarket.placed_orders().len(), 1);
    assert_eq!(fx.kalshi.placed_orders().len(), 1);

    let records = fx.executions.all();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::Failed);

    assert!(fx.alerter.has_severity(Severity::Critical));
}

#[tokio::test]
async fn sell_only_fill_is_recorded_as_no_position() {
    let fx = Fixture::new(Mode::Live);
    fx.set_spread_books(dec!(100));
    let mapping = fx.mapping();
    let opp = detected_opportunity(&fx).await;

    fx.polymarket.queue_fill(rejected("killed"));
    fx.kalshi.queue_fill(filled(dec!(0.50), 100));

    let outcome = fx.engine.execute(&mapping, &opp).await.unwrap();
    assert!(matches!(
        outcome,
        ExecutionOutcome::Asymmetric {
            filled_venue: Some(Venue::Kalshi)
        }
    ));

    let positions = fx.risk.positions();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].outcome, Outcome::No);
    // Sold yes at 0.50 is held as no opened at 0.50.
    assert_eq!(positions[0].avg_price, dec!(0.50));
    assert!(fx.breaker.is_paused());
}

#[tokio::test]
async fn dry_run_never_touches_the_venues() {
    let fx = Fixture::with_fees(Mode::DryRun, zero_fees());
    fx.set_spread_books(dec!(50));
    let mapping = fx.mapping();
    let opp = detected_opportunity(&fx).await;

    let outcome = fx.engine.execute(&mapping, &opp).await.unwrap();
    let ExecutionOutcome::BothFilled { realized_pnl, qty, dry_run } = outcome else {
        panic!("expected BothFilled, got {outcome:?}");
    };
    assert!(dry_run);
    assert_eq!(qty, 50);
    // Zero fees, spread 0.50 - 0.42 = 0.08, but detection nets against the
    // same books: realized equals net * qty exactly.
    assert_eq!(realized_pnl, dec!(4.00));

    assert!(fx.polymarket.placed_orders().is_empty());
    assert!(fx.kalshi.placed_orders().is_empty());

    let records = fx.executions.all();
    assert_eq!(records.len(), 1);
    assert!(records[0].is_dry_run);
    assert_eq!(records[0].status, ExecutionStatus::Complete);

    // Hypothetical P&L tracked.
    assert_eq!(fx.store.daily().pnl, dec!(4.00));
    assert!(fx.risk.positions().is_empty());
}

#[tokio::test]
async fn double_transport_error_reconciles_to_success() {
    let fx = Fixture::new(Mode::Live);
    fx.set_spread_books(dec!(100));
    let mapping = fx.mapping();
    let opp = detected_opportunity(&fx).await;

    fx.polymarket.queue_fill(transport("socket reset"));
    fx.kalshi.queue_fill(transport("socket reset"));

    // Pre-fire snapshots are empty; post-fire both venues report the new
    // positions, so reconciliation classifies the pair as filled.
    fx.polymarket.queue_positions(Vec::new());
    fx.kalshi.queue_positions(Vec::new());
    fx.polymarket.queue_positions(vec![VenuePosition {
        contract: "poly-token".to_string(),
        outcome: Outcome::Yes,
        quantity: 100,
        avg_price: dec!(0.42),
    }]);
    fx.kalshi.queue_positions(vec![VenuePosition {
        contract: "KX-EVENT".to_string(),
        outcome: Outcome::No,
        quantity: 100,
        avg_price: dec!(0.50),
    }]);

    let outcome = fx.engine.execute(&mapping, &opp).await.unwrap();
    assert!(matches!(
        outcome,
        ExecutionOutcome::BothFilled { dry_run: false, .. }
    ));
    assert!(!fx.breaker.is_paused());
    assert_eq!(fx.risk.positions().len(), 2);
    assert_eq!(fx.executions.all()[0].status, ExecutionStatus::Complete);
}

#[tokio::test]
async fn double_transport_error_with_no_fills_is_a_no_op() {
    let fx = Fixture::new(Mode::Live);
    fx.set_spread_books(dec!(100));
    let mapping = fx.mapping();
    let opp = detected_opportunity(&fx).await;

    fx.polymarket.queue_fill(transport("timeout"));
    fx.kalshi.queue_fill(transport("timeout"));
    // All four position queries (pre and post) report nothing.

    let outcome = fx.engine.execute(&mapping, &opp).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::BothRejected));
    assert!(!fx.breaker.is_paused());
    assert!(fx.risk.positions().is_empty());
    assert_eq!(fx.executions.all()[0].status, ExecutionStatus::NotExecuted);
}

#[tokio::test]
async fn single_transport_error_is_asymmetric() {
    let fx = Fixture::new(Mode::Live);
    fx.set_spread_books(dec!(100));
    let mapping = fx.mapping();
    let opp = detected_opportunity(&fx).await;

    fx.polymarket.queue_fill(filled(dec!(0.42), 100));
    fx.kalshi.queue_fill(transport("connection dropped"));

    let outcome = fx.engine.execute(&mapping, &opp).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Asymmetric { .. }));
    assert!(fx.breaker.is_paused());
    assert_eq!(fx.executions.all()[0].status, ExecutionStatus::Failed);
    // The confirmed buy fill is recorded.
    assert_eq!(fx.risk.positions().len(), 1);
}

#[tokio::test]
async fn expired_opportunity_is_not_executed() {
    let fx = Fixture::new(Mode::Live);
    fx.set_spread_books(dec!(100));
    let mapping = fx.mapping();
    let mut opp = detected_opportunity(&fx).await;
    opp.expires_at = Utc::now() - chrono::Duration::seconds(1);

    let outcome = fx.engine.execute(&mapping, &opp).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::NotExecuted { .. }));
    assert!(fx.polymarket.placed_orders().is_empty());
    assert_eq!(fx.executions.all()[0].status, ExecutionStatus::NotExecuted);
}

#[tokio::test]
async fn revalidation_aborts_when_spread_collapses() {
    let fx = Fixture::new(Mode::Live);
    fx.set_spread_books(dec!(100));
    let mapping = fx.mapping();
    let opp = detected_opportunity(&fx).await;

    // Books move against us before the fire: kalshi bid drops to 0.43.
    fx.kalshi.set_book(common::book(
        Venue::Kalshi,
        "KX-EVENT",
        dec!(0.43),
        dec!(0.45),
        dec!(100),
    ));

    let outcome = fx.engine.execute(&mapping, &opp).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::NotExecuted { .. }));
    assert!(fx.polymarket.placed_orders().is_empty());
    assert!(fx.kalshi.placed_orders().is_empty());
}

#[tokio::test]
async fn paused_breaker_blocks_execution() {
    let fx = Fixture::new(Mode::Live);
    fx.set_spread_books(dec!(100));
    let mapping = fx.mapping();
    let opp = detected_opportunity(&fx).await;

    fx.breaker.pause("operator hold").await;

    let outcome = fx.engine.execute(&mapping, &opp).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::NotExecuted { .. }));
    assert!(fx.polymarket.placed_orders().is_empty());
}
