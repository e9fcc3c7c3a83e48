//! Supervisor behavior: arming policy, one-shot scans, pause semantics,
//! rate-limit throttling, and graceful shutdown.

mod common;

use common::Fixture;
use predarb::config::Mode;
use predarb::domain::errors::VenueError;
use predarb::domain::ports::Severity;
use predarb::domain::types::{ExecutionStatus, Outcome, Position, Venue};
use rust_decimal_macros::dec;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

async fn add_mapping(fx: &Fixture) {
    fx.matcher
        .add_manual("poly-token", "KX-EVENT", "integration test event")
        .await
        .unwrap();
}

#[tokio::test]
async fn armed_scan_detects_journals_and_executes() {
    let fx = Fixture::new(Mode::DryRun);
    fx.set_spread_books(dec!(100));
    add_mapping(&fx).await;

    let supervisor = fx.supervisor();
    supervisor.arm();

    let detected = supervisor.scan_once().await;
    assert_eq!(detected.len(), 1);
    assert_eq!(detected[0].buy_venue, Venue::Polymarket);

    // Opportunity journaled append-only.
    assert_eq!(fx.opportunities_repo.all().len(), 1);

    // Dry-run execution of the best opportunity landed a complete record.
    let records = fx.executions.all();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::Complete);
    assert!(records[0].is_dry_run);
}

#[tokio::test]
async fn unarmed_supervisor_does_not_scan() {
    let fx = Fixture::new(Mode::DryRun);
    fx.set_spread_books(dec!(100));
    add_mapping(&fx).await;

    let supervisor = fx.supervisor();
    assert!(!supervisor.is_armed());

    let detected = supervisor.scan_once().await;
    assert!(detected.is_empty());
    assert!(fx.executions.all().is_empty());
}

#[tokio::test]
async fn paused_breaker_detects_but_never_fires() {
    let fx = Fixture::new(Mode::Live);
    fx.set_spread_books(dec!(100));
    add_mapping(&fx).await;
    fx.breaker.pause("operator hold").await;

    let supervisor = fx.supervisor();
    supervisor.arm();

    let detected = supervisor.scan_once().await;
    // Detection continues for observability.
    assert_eq!(detected.len(), 1);
    // But nothing was executed, not even a not-executed record.
    assert!(fx.executions.all().is_empty());
    assert!(fx.polymarket.placed_orders().is_empty());
}

#[tokio::test(start_paused = true)]
async fn hard_rate_limit_throttles_without_pausing() {
    let fx = Fixture::new(Mode::DryRun);
    fx.set_spread_books(dec!(100));
    add_mapping(&fx).await;

    // Every retry attempt sees another rate-limit answer.
    for _ in 0..4 {
        fx.polymarket
            .queue_book_error(VenueError::RateLimited { retry_after_secs: 1 });
    }

    let supervisor = fx.supervisor();
    supervisor.arm();

    let detected = supervisor.scan_once().await;
    assert!(detected.is_empty());
    assert!(!fx.breaker.is_paused());
}

#[tokio::test]
async fn unauthorized_venue_disables_scanning() {
    let fx = Fixture::new(Mode::DryRun);
    fx.set_spread_books(dec!(100));
    add_mapping(&fx).await;

    fx.polymarket.queue_book_error(VenueError::Unauthorized {
        venue: Venue::Polymarket,
        detail: "bad key".to_string(),
    });

    let supervisor = fx.supervisor();
    supervisor.arm();

    let detected = supervisor.scan_once().await;
    assert!(detected.is_empty());
    assert!(!supervisor.is_armed());
    assert!(fx.alerter.has_severity(Severity::High));
    assert!(!fx.breaker.is_paused());
}

#[tokio::test(start_paused = true)]
async fn transient_book_errors_are_retried() {
    let fx = Fixture::new(Mode::DryRun);
    fx.set_spread_books(dec!(100));
    add_mapping(&fx).await;

    // Two transient failures, then the scripted book is served.
    fx.polymarket.queue_book_error(VenueError::Transient {
        detail: "502".to_string(),
    });
    fx.polymarket.queue_book_error(VenueError::Transient {
        detail: "timeout".to_string(),
    });

    let supervisor = fx.supervisor();
    supervisor.arm();

    let detected = supervisor.scan_once().await;
    assert_eq!(detected.len(), 1);
}

#[tokio::test]
async fn recovery_warnings_block_auto_start() {
    let fx = Fixture::new(Mode::DryRun);

    // An unhedged position from a previous run.
    fx.store.upsert_position(Position {
        id: Uuid::new_v4().to_string(),
        venue: Venue::Polymarket,
        contract: "poly-token".to_string(),
        mapping_id: Some("map-1".to_string()),
        outcome: Outcome::Yes,
        quantity: 25,
        avg_price: dec!(0.42),
        opened_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    });

    let supervisor = fx.supervisor();
    let held = supervisor.arm_from_startup(&[]).await;
    assert!(!held.is_empty());
    assert!(!supervisor.is_armed());

    // Operator reviews and arms explicitly.
    supervisor.arm();
    assert!(supervisor.is_armed());
}

#[tokio::test]
async fn clean_state_arms_automatically() {
    let fx = Fixture::new(Mode::DryRun);
    let supervisor = fx.supervisor();
    let held = supervisor.arm_from_startup(&[]).await;
    assert!(held.is_empty());
    assert!(supervisor.is_armed());
}

#[tokio::test]
async fn paused_breaker_in_snapshot_blocks_auto_start() {
    let fx = Fixture::new(Mode::DryRun);
    fx.store.update(|s| {
        s.cb.paused = true;
        s.cb.reason = Some("asymmetric execution".to_string());
    });

    let supervisor = fx.supervisor();
    let held = supervisor.arm_from_startup(&[]).await;
    assert_eq!(held.len(), 1);
    assert!(held[0].contains("asymmetric"));
    assert!(!supervisor.is_armed());
}

#[tokio::test]
async fn shutdown_writes_a_final_snapshot() {
    let fx = Fixture::new(Mode::DryRun);
    let state_path = fx.dir.path().join("state.json");
    assert!(!state_path.exists());

    let supervisor = fx.supervisor();
    supervisor.arm();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(supervisor.run(shutdown_rx));

    tokio::time::sleep(Duration::from_millis(120)).await;
    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("supervisor must stop after shutdown signal")
        .unwrap();

    assert!(state_path.exists(), "final snapshot must be written");
}

#[tokio::test]
async fn closed_book_feed_trips_connection_lost() {
    let fx = Fixture::new(Mode::DryRun);
    let supervisor = fx.supervisor();

    let feed = supervisor.spawn_feed(Venue::Polymarket, vec!["poly-token".to_string()]);
    // Give the feed task a moment to subscribe, then kill the channel as an
    // exhausted reconnect loop would.
    tokio::time::sleep(Duration::from_millis(50)).await;
    fx.polymarket.close_feed();

    tokio::time::timeout(Duration::from_secs(5), feed)
        .await
        .expect("feed task must finish")
        .unwrap();

    assert!(fx.breaker.is_paused());
    let state = fx.breaker.state();
    assert!(state.reason.unwrap().contains("connection lost"));
}
