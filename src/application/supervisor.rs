//! The scan loop and its lifecycle: periodic detection, opportunity
//! selection, push-cache maintenance, crash-recovery arming, and graceful
//! shutdown.

use crate::application::detector::ArbitrageDetector;
use crate::application::engine::{ExecutionEngine, ExecutionOutcome};
use crate::application::matcher::EventMatcher;
use crate::domain::errors::{FailureKind, VenueError};
use crate::domain::ports::{Alerter, OpportunityRepository, Severity, VenueAdapter};
use crate::domain::types::{EventMapping, Opportunity, OrderBook, Venue};
use crate::infrastructure::circuit_breaker::CircuitBreaker;
use crate::infrastructure::state_store::StateStore;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Per-(venue, contract) order book slots fed by the push channels.
/// Last-writer-wins with a timestamp check: an update older than the
/// cached book is dropped, keeping observations monotone per slot.
#[derive(Default)]
pub struct BookCache {
    slots: std::sync::Mutex<HashMap<(Venue, String), OrderBook>>,
}

impl BookCache {
    /// Returns false when the update was stale and dropped.
    pub fn update(&self, book: OrderBook) -> bool {
        let mut slots = self.slots.lock().expect("book cache poisoned");
        let key = (book.venue, book.contract.clone());
        if let Some(existing) = slots.get(&key)
            && existing.timestamp > book.timestamp
        {
            return false;
        }
        slots.insert(key, book);
        true
    }

    pub fn get(&self, venue: Venue, contract: &str) -> Option<OrderBook> {
        let slots = self.slots.lock().expect("book cache poisoned");
        slots.get(&(venue, contract.to_string())).cloned()
    }

    /// Age of the freshest cached book for a venue, if any.
    pub fn freshest_age(&self, venue: Venue) -> Option<chrono::Duration> {
        let slots = self.slots.lock().expect("book cache poisoned");
        slots
            .values()
            .filter(|b| b.venue == venue)
            .map(|b| Utc::now() - b.timestamp)
            .min()
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub scan_interval: Duration,
    pub suppress_detection_when_paused: bool,
    pub max_state_age_minutes: i64,
    pub require_manual_review: bool,
    /// Bounded wait for in-flight executions during shutdown.
    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub armed: bool,
    pub breaker_paused: bool,
    pub venue_rest: HashMap<Venue, bool>,
    pub push_age_secs: HashMap<Venue, Option<i64>>,
}

pub struct Supervisor {
    matcher: Arc<EventMatcher>,
    detector: Arc<ArbitrageDetector>,
    engine: Arc<ExecutionEngine>,
    breaker: Arc<CircuitBreaker>,
    store: Arc<StateStore>,
    alerter: Arc<dyn Alerter>,
    adapters: HashMap<Venue, Arc<dyn VenueAdapter>>,
    opportunities: Arc<dyn OpportunityRepository>,
    book_cache: Arc<BookCache>,
    config: SupervisorConfig,
    armed: AtomicBool,
    /// Set when a venue reported a hard rate limit; the next scan sleeps
    /// an extra interval and clears it.
    throttled: AtomicBool,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        matcher: Arc<EventMatcher>,
        detector: Arc<ArbitrageDetector>,
        engine: Arc<ExecutionEngine>,
        breaker: Arc<CircuitBreaker>,
        store: Arc<StateStore>,
        alerter: Arc<dyn Alerter>,
        adapters: HashMap<Venue, Arc<dyn VenueAdapter>>,
        opportunities: Arc<dyn OpportunityRepository>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            matcher,
            detector,
            engine,
            breaker,
            store,
            alerter,
            adapters,
            opportunities,
            book_cache: Arc::new(BookCache::default()),
            config,
            armed: AtomicBool::new(false),
            throttled: AtomicBool::new(false),
        }
    }

    pub fn book_cache(&self) -> Arc<BookCache> {
        self.book_cache.clone()
    }

    /// Crash-recovery policy. Any warning here blocks auto-start; the
    /// operator must `resume` after review.
    pub fn recovery_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let age = self.store.heartbeat_age_minutes();
        if age > self.config.max_state_age_minutes {
            warnings.push(format!(
                "state snapshot is {age} minutes old (limit {})",
                self.config.max_state_age_minutes
            ));
        }

        let cb = self.store.breaker();
        if cb.paused {
            warnings.push(format!(
                "circuit breaker was paused: {}",
                cb.reason.unwrap_or_else(|| "unknown".to_string())
            ));
        }

        let unhedged = self.store.unhedged_positions();
        if !unhedged.is_empty() {
            warnings.push(format!("{} unhedged position(s) on book", unhedged.len()));
        }

        warnings
    }

    /// Decide whether the scan loop starts automatically. Recovery
    /// warnings always block; with `require_manual_review` any startup
    /// warning blocks too. Returns the warnings that held it back, empty
    /// if armed.
    pub async fn arm_from_startup(&self, startup_warnings: &[String]) -> Vec<String> {
        let mut warnings = self.recovery_warnings();
        if self.config.require_manual_review {
            warnings.extend_from_slice(startup_warnings);
        }
        let blocked = !warnings.is_empty();

        if blocked {
            for w in &warnings {
                warn!(warning = %w, "Startup review required");
            }
            self.alerter
                .send(
                    Severity::High,
                    "Manual review required",
                    &format!("scan loop held: {}", warnings.join("; ")),
                )
                .await;
        } else {
            self.armed.store(true, Ordering::Release);
            info!("Scan loop armed");
        }
        warnings
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Operator sign-off after reviewing recovery warnings.
    pub fn arm(&self) {
        self.armed.store(true, Ordering::Release);
        info!("Scan loop armed by operator");
    }

    /// Spawn the push-feed pump for one venue: deliver book updates into
    /// the cache, dropping stale ones. A closed channel means the
    /// adapter's reconnect policy is exhausted.
    pub fn spawn_feed(
        self: &Arc<Self>,
        venue: Venue,
        contracts: Vec<String>,
    ) -> JoinHandle<()> {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let adapter = match supervisor.adapters.get(&venue) {
                Some(a) => a.clone(),
                None => return,
            };
            let mut rx = match adapter.subscribe_books(contracts).await {
                Ok(rx) => rx,
                Err(e) => {
                    error!(%venue, error = %e, "Failed to open book feed");
                    supervisor
                        .breaker
                        .record_failure(FailureKind::ConnectionLost)
                        .await;
                    return;
                }
            };

            while let Some(book) = rx.recv().await {
                supervisor.book_cache.update(book);
            }

            warn!(%venue, "Book feed closed, reconnects exhausted");
            supervisor
                .breaker
                .record_failure(FailureKind::ConnectionLost)
                .await;
        })
    }

    /// The main loop. Returns after a shutdown signal, once in-flight
    /// executions finished classification and a final snapshot landed.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.scan_interval.as_millis() as u64,
            "Supervisor loop started"
        );
        let mut interval = tokio::time::interval(self.config.scan_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    if self.throttled.swap(false, Ordering::AcqRel) {
                        tokio::time::sleep(self.config.scan_interval).await;
                    }
                    self.scan_once().await;
                }
            }
        }

        info!("Shutdown: waiting for in-flight executions");
        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace;
        while self.engine.in_flight() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if self.engine.in_flight() > 0 {
            warn!("Shutdown grace elapsed with executions still classifying");
        }

        if let Err(e) = self.store.snapshot().await {
            error!(error = %e, "Final snapshot failed");
        }
        info!("Supervisor loop stopped");
    }

    /// One full pass over the tradable mappings. Public so the CLI can run
    /// a one-shot scan.
    pub async fn scan_once(&self) -> Vec<Opportunity> {
        self.store.roll_daily_if_needed(Utc::now().date_naive());
        self.detector.clear_expired();

        if !self.is_armed() {
            return Vec::new();
        }

        let paused = self.breaker.is_paused();
        if paused && self.config.suppress_detection_when_paused {
            return Vec::new();
        }

        let mappings = self.matcher.tradable_mappings().await;
        let mut detected: Vec<(EventMapping, Opportunity)> = Vec::new();

        for mapping in mappings {
            match self.detect_for_mapping(&mapping).await {
                Ok(Some(opportunity)) => {
                    if let Err(e) = self.opportunities.insert(&opportunity).await {
                        warn!(error = %e, "Failed to journal opportunity");
                    }
                    detected.push((mapping, opportunity));
                }
                Ok(None) => {}
                Err(VenueError::RateLimited { retry_after_secs }) => {
                    warn!(retry_after_secs, "Hard rate limit, throttling scan loop");
                    self.throttled.store(true, Ordering::Release);
                    self.breaker
                        .record_failure(FailureKind::RateLimitExceeded)
                        .await;
                    break;
                }
                Err(e @ VenueError::Unauthorized { .. }) => {
                    // Both venues are required for any trade; a credential
                    // failure on either disables scanning until an operator
                    // intervenes.
                    error!(mapping = %mapping.id, error = %e, "Venue credentials rejected");
                    self.armed.store(false, Ordering::Release);
                    self.alerter
                        .send(
                            Severity::High,
                            "Venue unauthorized",
                            &format!("scanning disabled: {e}"),
                        )
                        .await;
                    break;
                }
                Err(e) => {
                    warn!(mapping = %mapping.id, error = %e, "Order book fetch failed");
                }
            }
        }

        // Largest total edge first; one execution per scan keeps the
        // exposure math simple between fills.
        detected.sort_by(|(_, a), (_, b)| {
            let edge_a = a.net_profit_per_unit * Decimal::from(a.max_qty);
            let edge_b = b.net_profit_per_unit * Decimal::from(b.max_qty);
            edge_b.cmp(&edge_a)
        });

        if !paused {
            if let Some((mapping, best)) = detected.first() {
                match self.engine.execute(mapping, best).await {
                    Ok(ExecutionOutcome::BothFilled { realized_pnl, qty, dry_run }) => {
                        info!(qty, %realized_pnl, dry_run, "Scan executed best opportunity");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Execution error"),
                }
            }
        }

        detected.into_iter().map(|(_, o)| o).collect()
    }

    async fn detect_for_mapping(
        &self,
        mapping: &EventMapping,
    ) -> Result<Option<Opportunity>, VenueError> {
        let poly_adapter = self
            .adapters
            .get(&Venue::Polymarket)
            .expect("polymarket adapter registered");
        let kalshi_adapter = self
            .adapters
            .get(&Venue::Kalshi)
            .expect("kalshi adapter registered");

        let (poly_book, kalshi_book) = tokio::join!(
            fetch_book_with_retries(poly_adapter.as_ref(), &mapping.polymarket_contract),
            fetch_book_with_retries(kalshi_adapter.as_ref(), &mapping.kalshi_contract),
        );
        let (poly_book, kalshi_book) = (poly_book?, kalshi_book?);

        // Pull results refresh the push cache as well; stale ones lose.
        self.book_cache.update(poly_book.clone());
        self.book_cache.update(kalshi_book.clone());

        Ok(self.detector.detect(mapping, &poly_book, &kalshi_book))
    }

    pub async fn health(&self) -> HealthReport {
        let mut venue_rest = HashMap::new();
        let mut push_age_secs = HashMap::new();

        for (venue, adapter) in &self.adapters {
            venue_rest.insert(*venue, adapter.get_balances().await.is_ok());
            push_age_secs.insert(
                *venue,
                self.book_cache.freshest_age(*venue).map(|d| d.num_seconds()),
            );
        }

        HealthReport {
            armed: self.is_armed(),
            breaker_paused: self.breaker.is_paused(),
            venue_rest,
            push_age_secs,
        }
    }

    pub async fn balances(&self) -> HashMap<Venue, Result<crate::domain::types::Balances, VenueError>> {
        let queries = self
            .adapters
            .iter()
            .map(|(venue, adapter)| async move { (*venue, adapter.get_balances().await) });
        futures::future::join_all(queries).await.into_iter().collect()
    }
}

/// Read-retry policy for order books: up to 3 retries, exponential backoff
/// from 1 s capped at 8 s, only for retriable errors.
async fn fetch_book_with_retries(
    adapter: &dyn VenueAdapter,
    contract: &str,
) -> Result<OrderBook, VenueError> {
    const MAX_RETRIES: u32 = 3;
    let mut delay = Duration::from_secs(1);

    for attempt in 0..=MAX_RETRIES {
        match adapter.get_order_book(contract).await {
            Ok(book) => return Ok(book),
            Err(e) if e.is_retriable() && attempt < MAX_RETRIES => {
                warn!(contract, attempt, error = %e, "Retrying order book fetch");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(8));
            }
            Err(e) => return Err(e),
        }
    }
    unreachable!("retry loop returns on final attempt");
}

/// Dedicated snapshot task: periodic saves, one final save on shutdown,
/// escalation to the breaker after repeated I/O failure.
pub fn spawn_auto_save(
    store: Arc<StateStore>,
    breaker: Arc<CircuitBreaker>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    const MAX_IO_FAILURES: u32 = 5;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if store.snapshot().await.is_err()
                        && store.io_failure_streak() >= MAX_IO_FAILURES
                    {
                        breaker
                            .record_failure(FailureKind::StateUnrecoverable)
                            .await;
                    }
                }
            }
        }

        if let Err(e) = store.snapshot().await {
            error!(error = %e, "Final auto-save snapshot failed");
        }
        info!("Auto-save task stopped");
    })
}
