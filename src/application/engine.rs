//! Two-leg fill-or-kill execution.
//!
//! The engine owns the atomicity discipline: it revalidates the spread
//! immediately before firing, fires both legs concurrently and never
//! returns before both outcomes are in, and classifies the result into
//! exactly one of `{NotExecuted, BothRejected, BothFilled, Asymmetric}`.
//! An asymmetric outcome pauses the circuit breaker in the same
//! transaction and leaves the unhedged position for a human; there is no
//! automatic unwind.

use crate::config::{LatencyEnvConfig, Mode};
use crate::domain::errors::FailureKind;
use crate::domain::fees::FeeModel;
use crate::domain::ports::{
    Alerter, ExecutionRepository, PositionRepository, Severity, VenueAdapter,
};
use crate::domain::types::{
    EventMapping, ExecutionRecord, ExecutionStatus, FillResult, FokOrder, Opportunity, OrderSide,
    Outcome, Position, Venue, VenuePosition,
};
use crate::application::detector::ArbitrageDetector;
use crate::application::risk::RiskManager;
use crate::infrastructure::circuit_breaker::CircuitBreaker;
use crate::infrastructure::state_store::StateStore;
use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Runtime-switchable operating mode, shared with the CLI.
pub struct ModeSwitch {
    mode: std::sync::RwLock<Mode>,
}

impl ModeSwitch {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode: std::sync::RwLock::new(mode),
        }
    }

    pub fn get(&self) -> Mode {
        *self.mode.read().expect("mode lock poisoned")
    }

    pub fn set(&self, mode: Mode) {
        *self.mode.write().expect("mode lock poisoned") = mode;
        info!(%mode, "Operating mode switched");
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_slippage: Decimal,
    pub latency: LatencyEnvConfig,
    pub track_dry_run_pnl: bool,
}

/// Terminal classification of one execution attempt.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    NotExecuted { reason: String },
    BothRejected,
    BothFilled { realized_pnl: Decimal, qty: u64, dry_run: bool },
    Asymmetric { filled_venue: Option<Venue> },
}

pub struct ExecutionEngine {
    adapters: HashMap<Venue, Arc<dyn VenueAdapter>>,
    risk: Arc<RiskManager>,
    breaker: Arc<CircuitBreaker>,
    store: Arc<StateStore>,
    detector: Arc<ArbitrageDetector>,
    alerter: Arc<dyn Alerter>,
    executions: Arc<dyn ExecutionRepository>,
    positions_repo: Arc<dyn PositionRepository>,
    fees: FeeModel,
    mode: Arc<ModeSwitch>,
    config: EngineConfig,
    /// One execution at a time per mapping.
    mapping_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    in_flight: AtomicUsize,
}

/// Error before any leg was fired; eligible for the single full-cycle retry.
struct PreFireError(anyhow::Error);

impl ExecutionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adapters: HashMap<Venue, Arc<dyn VenueAdapter>>,
        risk: Arc<RiskManager>,
        breaker: Arc<CircuitBreaker>,
        store: Arc<StateStore>,
        detector: Arc<ArbitrageDetector>,
        alerter: Arc<dyn Alerter>,
        executions: Arc<dyn ExecutionRepository>,
        positions_repo: Arc<dyn PositionRepository>,
        fees: FeeModel,
        mode: Arc<ModeSwitch>,
        config: EngineConfig,
    ) -> Self {
        Self {
            adapters,
            risk,
            breaker,
            store,
            detector,
            alerter,
            executions,
            positions_repo,
            fees,
            mode,
            config,
            mapping_locks: std::sync::Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
        }
    }

    fn adapter(&self, venue: Venue) -> Arc<dyn VenueAdapter> {
        self.adapters
            .get(&venue)
            .expect("adapter registered for every venue")
            .clone()
    }

    /// Executions currently past the validation gate. The supervisor waits
    /// for this to drain before final shutdown.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    fn mapping_lock(&self, mapping_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.mapping_locks.lock().expect("mapping locks poisoned");
        locks
            .entry(mapping_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Execute an opportunity end to end. Exactly one durable record is
    /// written per call, whatever the outcome.
    pub async fn execute(
        &self,
        mapping: &EventMapping,
        opportunity: &Opportunity,
    ) -> Result<ExecutionOutcome> {
        let lock = self.mapping_lock(&mapping.id);
        let _guard = lock.lock().await;

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let result = self.execute_locked(mapping, opportunity).await;
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        result
    }

    async fn execute_locked(
        &self,
        mapping: &EventMapping,
        opportunity: &Opportunity,
    ) -> Result<ExecutionOutcome> {
        let now = Utc::now();
        if opportunity.is_expired(now) {
            return Ok(self
                .finish_not_executed(mapping, opportunity, 0, "opportunity expired")
                .await);
        }

        if self.breaker.is_paused() {
            return Ok(self
                .finish_not_executed(mapping, opportunity, 0, "circuit breaker paused")
                .await);
        }

        let Some(proposed_qty) = self.risk.optimal_qty(opportunity) else {
            return Ok(self
                .finish_not_executed(mapping, opportunity, 0, "no viable quantity")
                .await);
        };

        let decision = self.risk.validate(opportunity, proposed_qty).await;
        if !decision.approved {
            let reason = decision
                .reasons
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Ok(self
                .finish_not_executed(mapping, opportunity, proposed_qty, &reason)
                .await);
        }
        for warning in &decision.warnings {
            warn!(mapping = %mapping.id, ?warning, "Risk warning on approved trade");
        }
        let final_qty = decision.suggested_qty.unwrap_or(proposed_qty);

        // One retry of the full revalidate-fire cycle, but only for errors
        // raised before any leg was fired.
        for attempt in 0..2 {
            match self.revalidate_and_fire(mapping, opportunity, final_qty).await {
                Ok(outcome) => return Ok(outcome),
                Err(PreFireError(e)) if attempt == 0 => {
                    warn!(mapping = %mapping.id, error = %e, "Pre-fire error, retrying once");
                }
                Err(PreFireError(e)) => {
                    self.breaker
                        .record_failure(FailureKind::ExecutionFailure)
                        .await;
                    return Ok(self
                        .finish_not_executed(
                            mapping,
                            opportunity,
                            final_qty,
                            &format!("pre-fire error: {e}"),
                        )
                        .await);
                }
            }
        }
        unreachable!("retry loop always returns");
    }

    async fn revalidate_and_fire(
        &self,
        mapping: &EventMapping,
        opportunity: &Opportunity,
        final_qty: u64,
    ) -> Result<ExecutionOutcome, PreFireError> {
        let live = self.mode.get() == Mode::Live;
        let poly = self.adapter(Venue::Polymarket);
        let kalshi = self.adapter(Venue::Kalshi);

        // Fresh pull of both books; push caches are advisory only. In live
        // mode also snapshot venue positions for the reconciliation path.
        let fetch_books = tokio::join!(
            poly.get_order_book(&mapping.polymarket_contract),
            kalshi.get_order_book(&mapping.kalshi_contract),
        );
        let (poly_book, kalshi_book) = match fetch_books {
            (Ok(p), Ok(k)) => (p, k),
            (Err(e), _) | (_, Err(e)) => {
                return Err(PreFireError(anyhow::anyhow!("order book refetch: {e}")));
            }
        };

        let pre_positions = if live {
            let (p, k) = tokio::join!(poly.get_positions(), kalshi.get_positions());
            match (p, k) {
                (Ok(p), Ok(k)) => Some((p, k)),
                (Err(e), _) | (_, Err(e)) => {
                    return Err(PreFireError(anyhow::anyhow!("position snapshot: {e}")));
                }
            }
        } else {
            None
        };

        let Some(fresh) = self.detector.detect(mapping, &poly_book, &kalshi_book) else {
            return Ok(self
                .finish_not_executed(mapping, opportunity, final_qty, "spread gone on revalidation")
                .await);
        };

        let floor =
            opportunity.net_profit_per_unit * (Decimal::ONE - self.config.max_slippage);
        if fresh.buy_venue != opportunity.buy_venue || fresh.net_profit_per_unit < floor {
            return Ok(self
                .finish_not_executed(
                    mapping,
                    opportunity,
                    final_qty,
                    "revalidation outside slippage envelope",
                )
                .await);
        }

        let qty = final_qty.min(fresh.max_qty);
        if qty == 0 {
            return Ok(self
                .finish_not_executed(mapping, opportunity, final_qty, "no size left at revalidation")
                .await);
        }

        if !live {
            return Ok(self.execute_dry_run(mapping, &fresh, qty).await);
        }

        let (pre_poly, pre_kalshi) = pre_positions.expect("live mode snapshots positions");
        Ok(self
            .fire(mapping, &fresh, qty, pre_poly, pre_kalshi)
            .await)
    }

    /// Dry-run short-circuit: synthesize fills at the revalidated prices,
    /// never touch a venue order endpoint.
    async fn execute_dry_run(
        &self,
        mapping: &EventMapping,
        fresh: &Opportunity,
        qty: u64,
    ) -> ExecutionOutcome {
        let fees = self.fees.total(
            fresh.buy_venue,
            fresh.sell_venue,
            fresh.buy_price,
            fresh.sell_price,
            qty,
        );
        let realized =
            (fresh.sell_price - fresh.buy_price) * Decimal::from(qty) - fees;

        if self.config.track_dry_run_pnl {
            self.store
                .record_trade(realized, fresh.buy_price * Decimal::from(qty));
        }

        self.persist_record(
            mapping,
            fresh,
            qty,
            ExecutionStatus::Complete,
            Some(realized),
            fees,
            true,
            Some("dry run".to_string()),
        )
        .await;

        info!(
            mapping = %mapping.id,
            qty,
            realized = %realized,
            "Dry-run execution complete"
        );
        ExecutionOutcome::BothFilled {
            realized_pnl: realized,
            qty,
            dry_run: true,
        }
    }

    /// Fire both legs concurrently and classify. Never returns before both
    /// outcomes (or their timeouts) are observed.
    async fn fire(
        &self,
        mapping: &EventMapping,
        fresh: &Opportunity,
        qty: u64,
        pre_poly: Vec<VenuePosition>,
        pre_kalshi: Vec<VenuePosition>,
    ) -> ExecutionOutcome {
        let buy_adapter = self.adapter(fresh.buy_venue);
        let sell_adapter = self.adapter(fresh.sell_venue);
        let buy_order = FokOrder {
            contract: mapping.contract_on(fresh.buy_venue).to_string(),
            side: OrderSide::Buy,
            price: fresh.buy_price,
            quantity: qty,
        };
        let sell_order = FokOrder {
            contract: mapping.contract_on(fresh.sell_venue).to_string(),
            side: OrderSide::Sell,
            price: fresh.sell_price,
            quantity: qty,
        };

        let placement_cap = Duration::from_millis(self.config.latency.order_placement_max_ms);
        let started = Instant::now();

        let buy_task = tokio::spawn(place_with_deadline(buy_adapter, buy_order, placement_cap));
        let sell_task = tokio::spawn(place_with_deadline(sell_adapter, sell_order, placement_cap));

        let (buy_result, sell_result) = match tokio::join!(buy_task, sell_task) {
            (Ok(b), Ok(s)) => (b, s),
            (b, s) => {
                // A panicked leg task is indistinguishable from a lost
                // response; classify as transport ambiguity.
                let to_result = |r: Result<FillResult, tokio::task::JoinError>| match r {
                    Ok(fill) => fill,
                    Err(e) => FillResult::TransportError {
                        detail: format!("leg task failed: {e}"),
                    },
                };
                (to_result(b), to_result(s))
            }
        };

        let elapsed = started.elapsed();
        if elapsed > Duration::from_millis(self.config.latency.end_to_end_max_ms) {
            warn!(
                mapping = %mapping.id,
                elapsed_ms = elapsed.as_millis() as u64,
                cap_ms = self.config.latency.end_to_end_max_ms,
                "Two-leg fire exceeded end-to-end latency ceiling"
            );
        }

        self.classify(mapping, fresh, qty, buy_result, sell_result, pre_poly, pre_kalshi)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn classify(
        &self,
        mapping: &EventMapping,
        fresh: &Opportunity,
        qty: u64,
        buy_result: FillResult,
        sell_result: FillResult,
        pre_poly: Vec<VenuePosition>,
        pre_kalshi: Vec<VenuePosition>,
    ) -> ExecutionOutcome {
        use FillResult::*;

        match (&buy_result, &sell_result) {
            (
                Filled {
                    fill_price: buy_price,
                    fees: buy_fees,
                    ..
                },
                Filled {
                    fill_price: sell_price,
                    fees: sell_fees,
                    ..
                },
            ) => {
                self.complete_success(
                    mapping,
                    fresh,
                    qty,
                    *buy_price,
                    *sell_price,
                    *buy_fees + *sell_fees,
                )
                .await
            }

            (Rejected { reason: r1, .. }, Rejected { reason: r2, .. }) => {
                info!(mapping = %mapping.id, buy = %r1, sell = %r2, "Both legs rejected");
                self.persist_record(
                    mapping,
                    fresh,
                    qty,
                    ExecutionStatus::NotExecuted,
                    None,
                    Decimal::ZERO,
                    false,
                    Some(format!("both rejected: buy {r1}; sell {r2}")),
                )
                .await;
                ExecutionOutcome::BothRejected
            }

            (Filled { fill_price, .. }, Rejected { .. }) => {
                self.complete_asymmetric(
                    mapping,
                    fresh,
                    qty,
                    Some((fresh.buy_venue, Outcome::Yes, *fill_price)),
                    "buy filled, sell rejected",
                )
                .await
            }

            (Rejected { .. }, Filled { fill_price, .. }) => {
                self.complete_asymmetric(
                    mapping,
                    fresh,
                    qty,
                    Some((fresh.sell_venue, Outcome::No, Decimal::ONE - *fill_price)),
                    "sell filled, buy rejected",
                )
                .await
            }

            (TransportError { detail: d1 }, TransportError { detail: d2 }) => {
                warn!(
                    mapping = %mapping.id,
                    buy = %d1,
                    sell = %d2,
                    "Both legs transport-ambiguous, reconciling against venue positions"
                );
                self.reconcile_ambiguous(mapping, fresh, qty, pre_poly, pre_kalshi)
                    .await
            }

            // One transport error alongside any confirmed outcome: the
            // ambiguous leg may have filled, so the pair must be treated
            // as asymmetric.
            (TransportError { detail }, other) | (other, TransportError { detail }) => {
                let filled = match other {
                    Filled { fill_price, .. } => {
                        if buy_result.is_filled() {
                            Some((fresh.buy_venue, Outcome::Yes, *fill_price))
                        } else {
                            Some((fresh.sell_venue, Outcome::No, Decimal::ONE - *fill_price))
                        }
                    }
                    _ => None,
                };
                self.complete_asymmetric(
                    mapping,
                    fresh,
                    qty,
                    filled,
                    &format!("transport ambiguity: {detail}"),
                )
                .await
            }
        }
    }

    /// Query both venues and classify by position delta on the mapped
    /// contracts. Escalates to asymmetric when the query fails or exceeds
    /// its bound.
    async fn reconcile_ambiguous(
        &self,
        mapping: &EventMapping,
        fresh: &Opportunity,
        qty: u64,
        pre_poly: Vec<VenuePosition>,
        pre_kalshi: Vec<VenuePosition>,
    ) -> ExecutionOutcome {
        let poly = self.adapter(Venue::Polymarket);
        let kalshi = self.adapter(Venue::Kalshi);
        let bound = Duration::from_millis(self.config.latency.reconcile_max_ms);

        let queried = tokio::time::timeout(bound, async {
            tokio::join!(poly.get_positions(), kalshi.get_positions())
        })
        .await;

        let (post_poly, post_kalshi) = match queried {
            Ok((Ok(p), Ok(k))) => (p, k),
            Ok((Err(e), _)) | Ok((_, Err(e))) => {
                warn!(mapping = %mapping.id, error = %e, "Reconciliation query failed");
                return self
                    .complete_asymmetric(mapping, fresh, qty, None, "reconciliation failed")
                    .await;
            }
            Err(_) => {
                warn!(mapping = %mapping.id, "Reconciliation timed out");
                return self
                    .complete_asymmetric(mapping, fresh, qty, None, "reconciliation timed out")
                    .await;
            }
        };

        let (pre_buy, post_buy, pre_sell, post_sell) = match fresh.buy_venue {
            Venue::Polymarket => (&pre_poly, &post_poly, &pre_kalshi, &post_kalshi),
            Venue::Kalshi => (&pre_kalshi, &post_kalshi, &pre_poly, &post_poly),
        };

        let buy_filled = position_changed(pre_buy, post_buy, mapping.contract_on(fresh.buy_venue));
        let sell_filled =
            position_changed(pre_sell, post_sell, mapping.contract_on(fresh.sell_venue));

        match (buy_filled, sell_filled) {
            (true, true) => {
                info!(mapping = %mapping.id, "Reconciliation: both legs filled");
                let fees = self.fees.total(
                    fresh.buy_venue,
                    fresh.sell_venue,
                    fresh.buy_price,
                    fresh.sell_price,
                    qty,
                );
                self.complete_success(
                    mapping,
                    fresh,
                    qty,
                    fresh.buy_price,
                    fresh.sell_price,
                    fees,
                )
                .await
            }
            (false, false) => {
                info!(mapping = %mapping.id, "Reconciliation: no fill on either venue");
                self.persist_record(
                    mapping,
                    fresh,
                    qty,
                    ExecutionStatus::NotExecuted,
                    None,
                    Decimal::ZERO,
                    false,
                    Some("transport error, reconciled to no fill".to_string()),
                )
                .await;
                ExecutionOutcome::BothRejected
            }
            (true, false) => {
                self.complete_asymmetric(
                    mapping,
                    fresh,
                    qty,
                    Some((fresh.buy_venue, Outcome::Yes, fresh.buy_price)),
                    "reconciled: buy leg filled only",
                )
                .await
            }
            (false, true) => {
                self.complete_asymmetric(
                    mapping,
                    fresh,
                    qty,
                    Some((fresh.sell_venue, Outcome::No, Decimal::ONE - fresh.sell_price)),
                    "reconciled: sell leg filled only",
                )
                .await
            }
        }
    }

    async fn complete_success(
        &self,
        mapping: &EventMapping,
        fresh: &Opportunity,
        qty: u64,
        buy_price: Decimal,
        sell_price: Decimal,
        fees: Decimal,
    ) -> ExecutionOutcome {
        let realized = (sell_price - buy_price) * Decimal::from(qty) - fees;
        let volume = buy_price * Decimal::from(qty);

        self.store.record_trade(realized, volume);

        let now = Utc::now();
        let buy_leg = Position {
            id: Uuid::new_v4().to_string(),
            venue: fresh.buy_venue,
            contract: mapping.contract_on(fresh.buy_venue).to_string(),
            mapping_id: Some(mapping.id.clone()),
            outcome: Outcome::Yes,
            quantity: qty,
            avg_price: buy_price,
            opened_at: now,
            updated_at: now,
        };
        let sell_leg = Position {
            id: Uuid::new_v4().to_string(),
            venue: fresh.sell_venue,
            contract: mapping.contract_on(fresh.sell_venue).to_string(),
            mapping_id: Some(mapping.id.clone()),
            outcome: Outcome::No,
            quantity: qty,
            avg_price: Decimal::ONE - sell_price,
            opened_at: now,
            updated_at: now,
        };

        for leg in [buy_leg, sell_leg] {
            let aggregated = self.risk.apply_fill(leg);
            self.store.upsert_position(aggregated.clone());
            if let Err(e) = self.positions_repo.upsert(&aggregated).await {
                error!(error = %e, "Failed to persist position record");
            }
        }

        self.persist_record(
            mapping,
            fresh,
            qty,
            ExecutionStatus::Complete,
            Some(realized),
            fees,
            false,
            None,
        )
        .await;

        if let Err(e) = self.store.snapshot().await {
            warn!(error = %e, "Post-trade snapshot failed");
        }

        self.breaker.record_success();
        info!(
            mapping = %mapping.id,
            qty,
            realized = %realized,
            buy = %fresh.buy_venue,
            sell = %fresh.sell_venue,
            "Trade executed"
        );
        self.alerter
            .send(
                Severity::Medium,
                "trade_executed",
                &format!(
                    "{} {} @ {} -> {} @ {}, realized {realized}",
                    qty, fresh.buy_venue, buy_price, fresh.sell_venue, sell_price
                ),
            )
            .await;

        ExecutionOutcome::BothFilled {
            realized_pnl: realized,
            qty,
            dry_run: false,
        }
    }

    /// Asymmetric path: persist the failure, record any unhedged leg for
    /// human resolution, pause the breaker, alert critical. No unwind.
    async fn complete_asymmetric(
        &self,
        mapping: &EventMapping,
        fresh: &Opportunity,
        qty: u64,
        filled: Option<(Venue, Outcome, Decimal)>,
        detail: &str,
    ) -> ExecutionOutcome {
        error!(
            mapping = %mapping.id,
            qty,
            detail,
            "ASYMMETRIC EXECUTION, unhedged position requires human action"
        );

        let filled_venue = filled.map(|(v, _, _)| v);
        if let Some((venue, outcome, price)) = filled {
            let now = Utc::now();
            let position = Position {
                id: Uuid::new_v4().to_string(),
                venue,
                contract: mapping.contract_on(venue).to_string(),
                mapping_id: Some(mapping.id.clone()),
                outcome,
                quantity: qty,
                avg_price: price,
                opened_at: now,
                updated_at: now,
            };
            let aggregated = self.risk.apply_fill(position);
            self.store.upsert_position(aggregated.clone());
            if let Err(e) = self.positions_repo.upsert(&aggregated).await {
                error!(error = %e, "Failed to persist unhedged position record");
            }
        }

        self.persist_record(
            mapping,
            fresh,
            qty,
            ExecutionStatus::Failed,
            None,
            Decimal::ZERO,
            false,
            Some(detail.to_string()),
        )
        .await;

        // Pauses on first occurrence and snapshots the paused state, so the
        // unhedged position and the pause land durably together.
        self.breaker
            .record_failure(FailureKind::AsymmetricExecution)
            .await;

        self.alerter
            .send(
                Severity::Critical,
                "Asymmetric execution",
                &format!("mapping {}: {detail}; qty {qty}", mapping.id),
            )
            .await;

        ExecutionOutcome::Asymmetric { filled_venue }
    }

    async fn finish_not_executed(
        &self,
        mapping: &EventMapping,
        opportunity: &Opportunity,
        qty: u64,
        reason: &str,
    ) -> ExecutionOutcome {
        info!(mapping = %mapping.id, reason, "Execution not attempted");
        self.persist_record(
            mapping,
            opportunity,
            qty,
            ExecutionStatus::NotExecuted,
            None,
            Decimal::ZERO,
            false,
            Some(reason.to_string()),
        )
        .await;
        ExecutionOutcome::NotExecuted {
            reason: reason.to_string(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_record(
        &self,
        mapping: &EventMapping,
        opportunity: &Opportunity,
        qty: u64,
        status: ExecutionStatus,
        realized_pnl: Option<Decimal>,
        fees: Decimal,
        is_dry_run: bool,
        detail: Option<String>,
    ) {
        let record = ExecutionRecord {
            id: Uuid::new_v4().to_string(),
            opportunity_id: opportunity.id.clone(),
            mapping_id: mapping.id.clone(),
            status,
            buy_venue: opportunity.buy_venue,
            sell_venue: opportunity.sell_venue,
            quantity: qty,
            buy_price: opportunity.buy_price,
            sell_price: opportunity.sell_price,
            realized_pnl,
            fees,
            is_dry_run,
            detail,
            executed_at: Utc::now(),
        };
        if let Err(e) = self.executions.insert(&record).await {
            error!(error = %e, "Failed to persist execution record");
        }
    }
}

/// Place one leg with the per-order latency cap. A late response is a
/// transport ambiguity even if the venue eventually answered.
async fn place_with_deadline(
    adapter: Arc<dyn VenueAdapter>,
    order: FokOrder,
    cap: Duration,
) -> FillResult {
    match tokio::time::timeout(cap, adapter.place_fok(order)).await {
        Ok(result) => result,
        Err(_) => FillResult::TransportError {
            detail: format!("placement exceeded {}ms", cap.as_millis()),
        },
    }
}

/// Whether a venue's reported position on `contract` differs between the
/// two snapshots.
fn position_changed(pre: &[VenuePosition], post: &[VenuePosition], contract: &str) -> bool {
    let find = |set: &[VenuePosition]| -> Vec<VenuePosition> {
        set.iter()
            .filter(|p| p.contract == contract)
            .cloned()
            .collect()
    };
    find(pre) != find(post)
}
