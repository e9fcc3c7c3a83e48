//! Snapshot durability: load/save round trips, atomic replacement, and the
//! UTC trading-date rollover.

use chrono::{Duration, NaiveDate, Utc};
use predarb::domain::types::{Outcome, Position, Venue};
use predarb::infrastructure::state_store::StateStore;
use rust_decimal_macros::dec;
use tempfile::TempDir;
use uuid::Uuid;

fn position(venue: Venue, qty: u64) -> Position {
    Position {
        id: Uuid::new_v4().to_string(),
        venue,
        contract: "c-1".to_string(),
        mapping_id: Some("map-1".to_string()),
        outcome: Outcome::Yes,
        quantity: qty,
        avg_price: dec!(0.42),
        opened_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn snapshot_then_load_round_trips() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");

    let store = StateStore::load(&path).unwrap();
    store.record_trade(dec!(12.5), dec!(42));
    store.upsert_position(position(Venue::Polymarket, 100));
    store.update(|s| {
        s.cb.paused = true;
        s.cb.reason = Some("test".to_string());
    });
    store.snapshot().await.unwrap();

    let reloaded = StateStore::load(&path).unwrap();
    let daily = reloaded.daily();
    assert_eq!(daily.pnl, dec!(12.5));
    assert_eq!(daily.trade_count, 1);
    assert_eq!(daily.volume, dec!(42));
    assert_eq!(reloaded.positions().len(), 1);
    assert_eq!(reloaded.positions()[0].quantity, 100);
    let cb = reloaded.breaker();
    assert!(cb.paused);
    assert_eq!(cb.reason.as_deref(), Some("test"));
}

#[tokio::test]
async fn stale_trading_date_resets_daily_counters_on_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");

    let store = StateStore::load(&path).unwrap();
    store.record_trade(dec!(50), dec!(100));
    store.update(|s| {
        s.daily.trading_date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    });
    store.snapshot().await.unwrap();

    let reloaded = StateStore::load(&path).unwrap();
    let daily = reloaded.daily();
    assert_eq!(daily.trading_date, Utc::now().date_naive());
    assert_eq!(daily.pnl, dec!(0));
    assert_eq!(daily.trade_count, 0);
    assert_eq!(daily.volume, dec!(0));
}

#[tokio::test]
async fn rollover_does_not_touch_positions_or_breaker() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");

    let store = StateStore::load(&path).unwrap();
    store.upsert_position(position(Venue::Kalshi, 30));
    store.update(|s| {
        s.cb.paused = true;
        s.daily.trading_date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    });
    store.snapshot().await.unwrap();

    let reloaded = StateStore::load(&path).unwrap();
    assert_eq!(reloaded.positions().len(), 1);
    assert!(reloaded.breaker().paused);
}

#[tokio::test]
async fn interrupted_write_leaves_previous_snapshot_readable() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");

    let store = StateStore::load(&path).unwrap();
    store.record_trade(dec!(7), dec!(10));
    store.snapshot().await.unwrap();

    // A crash mid-write leaves a partial temp file behind; the real
    // snapshot must be untouched.
    std::fs::write(path.with_extension("tmp"), b"{\"daily\": {\"trading_").unwrap();

    let reloaded = StateStore::load(&path).unwrap();
    assert_eq!(reloaded.daily().pnl, dec!(7));
}

#[tokio::test]
async fn unknown_fields_survive_a_rewrite_cycle() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");

    let store = StateStore::load(&path).unwrap();
    store.update(|s| {
        s.extra.insert(
            "introduced_by_newer_version".to_string(),
            serde_json::json!({"keep": true}),
        );
    });
    store.snapshot().await.unwrap();

    let reloaded = StateStore::load(&path).unwrap();
    reloaded.snapshot().await.unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.contains("introduced_by_newer_version"));
}

#[tokio::test]
async fn runtime_rollover_resets_once_per_day() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::load(dir.path().join("state.json")).unwrap();
    store.record_trade(dec!(5), dec!(5));

    let today = Utc::now().date_naive();
    assert!(!store.roll_daily_if_needed(today));
    assert_eq!(store.daily().trade_count, 1);

    let tomorrow = today + Duration::days(1);
    assert!(store.roll_daily_if_needed(tomorrow));
    assert_eq!(store.daily().trade_count, 0);
    assert_eq!(store.daily().trading_date, tomorrow);
}

#[test]
fn unhedged_positions_are_detected() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::load(dir.path().join("state.json")).unwrap();

    // A hedged pair: same mapping, both venues, equal quantity.
    let mut yes_leg = position(Venue::Polymarket, 100);
    yes_leg.outcome = Outcome::Yes;
    let mut no_leg = position(Venue::Kalshi, 100);
    no_leg.outcome = Outcome::No;
    no_leg.contract = "c-2".to_string();
    store.upsert_position(yes_leg);
    store.upsert_position(no_leg);
    assert!(store.unhedged_positions().is_empty());

    // An extra one-sided leg on another mapping.
    let mut lonely = position(Venue::Polymarket, 40);
    lonely.mapping_id = Some("map-2".to_string());
    lonely.contract = "c-3".to_string();
    store.upsert_position(lonely);

    let unhedged = store.unhedged_positions();
    assert_eq!(unhedged.len(), 1);
    assert_eq!(unhedged[0].mapping_id.as_deref(), Some("map-2"));
}
