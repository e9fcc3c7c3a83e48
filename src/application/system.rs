//! Composition root: builds every component with injected handles and
//! wires the long-running tasks together.

use crate::application::detector::{ArbitrageDetector, DetectorConfig};
use crate::application::engine::{EngineConfig, ExecutionEngine, ModeSwitch};
use crate::application::matcher::{AliasTable, EventMatcher};
use crate::application::risk::RiskManager;
use crate::application::supervisor::{Supervisor, SupervisorConfig, spawn_auto_save};
use crate::config::{Config, Mode};
use crate::domain::fees::FeeModel;
use crate::domain::ports::{Alerter, VenueAdapter};
use crate::domain::types::Venue;
use crate::infrastructure::alerting::{CompositeAlerter, LogAlerter, WebhookAlerter};
use crate::infrastructure::circuit_breaker::CircuitBreaker;
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::repositories::{
    SqliteExecutionRepository, SqliteMappingRepository, SqliteOpportunityRepository,
    SqlitePositionRepository,
};
use crate::infrastructure::state_store::StateStore;
use crate::infrastructure::venues::kalshi::KalshiAdapter;
use crate::infrastructure::venues::polymarket::PolymarketAdapter;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct Application {
    pub config: Config,
    pub store: Arc<StateStore>,
    pub breaker: Arc<CircuitBreaker>,
    pub matcher: Arc<EventMatcher>,
    pub detector: Arc<ArbitrageDetector>,
    pub risk: Arc<RiskManager>,
    pub engine: Arc<ExecutionEngine>,
    pub supervisor: Arc<Supervisor>,
    pub mode: Arc<ModeSwitch>,
    pub startup_warnings: Vec<String>,
}

/// Handles the operator shell needs while the system runs.
pub struct SystemHandle {
    pub supervisor: Arc<Supervisor>,
    pub breaker: Arc<CircuitBreaker>,
    pub store: Arc<StateStore>,
    pub matcher: Arc<EventMatcher>,
    pub detector: Arc<ArbitrageDetector>,
    pub risk: Arc<RiskManager>,
    pub mode: Arc<ModeSwitch>,
    pub config: Config,
    pub shutdown_tx: watch::Sender<bool>,
    pub supervisor_task: JoinHandle<()>,
    pub auto_save_task: JoinHandle<()>,
}

impl SystemHandle {
    /// Signal shutdown and wait for the loop and snapshot tasks to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.supervisor_task.await;
        let _ = self.auto_save_task.await;
    }
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        info!(mode = %config.operating_mode, "Building application");
        let mut startup_warnings = Vec::new();

        let database = Database::new(&config.database_url).await?;
        let mapping_repo = Arc::new(SqliteMappingRepository::new(database.clone()));
        let opportunity_repo = Arc::new(SqliteOpportunityRepository::new(database.clone()));
        let execution_repo = Arc::new(SqliteExecutionRepository::new(database.clone()));
        let position_repo = Arc::new(SqlitePositionRepository::new(database.clone()));

        let store = Arc::new(
            StateStore::load(config.state_file_path.clone())
                .context("Failed to load state snapshot")?,
        );

        let alerter: Arc<dyn Alerter> = match &config.alert_webhook_url {
            Some(url) => Arc::new(CompositeAlerter::new(vec![
                Arc::new(LogAlerter),
                Arc::new(WebhookAlerter::new(
                    HttpClientFactory::create_client(Duration::from_secs(10)),
                    url.clone(),
                )),
            ])),
            None => Arc::new(LogAlerter),
        };

        let breaker = Arc::new(CircuitBreaker::new(
            store.clone(),
            alerter.clone(),
            &config.breaker,
        ));

        let aliases = match &config.alias_table_path {
            Some(path) if path.exists() => match AliasTable::from_toml_file(path) {
                Ok(table) => table,
                Err(e) => {
                    warn!(error = %e, "Alias table unreadable, matching without synonyms");
                    startup_warnings.push(format!("alias table not loaded: {e}"));
                    AliasTable::default()
                }
            },
            _ => AliasTable::default(),
        };

        let matcher = Arc::new(EventMatcher::new(
            mapping_repo,
            config.matcher.clone(),
            aliases,
        ));
        matcher.load().await?;

        let fees = FeeModel::new(config.trading.fees.clone());
        let detector = Arc::new(ArbitrageDetector::new(
            fees.clone(),
            DetectorConfig {
                min_profit_threshold: config.trading.min_profit_threshold,
                min_liquidity_depth: config.trading.min_liquidity_depth,
                opportunity_ttl_ms: config.trading.opportunity_ttl_ms,
            },
        ));

        let risk = Arc::new(RiskManager::new(
            config.trading.clone(),
            breaker.clone(),
            store.clone(),
        ));
        // The snapshot's position set is authoritative at startup.
        risk.reconcile(store.positions());

        if config.operating_mode == Mode::Live {
            if config.venues.polymarket.api_key.is_empty() {
                startup_warnings.push("live mode without polymarket credentials".to_string());
            }
            if config.venues.kalshi.email.is_empty() {
                startup_warnings.push("live mode without kalshi credentials".to_string());
            }
        }

        let mut adapters: HashMap<Venue, Arc<dyn VenueAdapter>> = HashMap::new();
        adapters.insert(
            Venue::Polymarket,
            Arc::new(PolymarketAdapter::new(
                config.venues.polymarket.clone(),
                config.venues.ws_policy.clone(),
                config.latency.orderbook_fetch_max_ms,
                config.latency.order_placement_max_ms,
            )),
        );
        adapters.insert(
            Venue::Kalshi,
            Arc::new(KalshiAdapter::new(
                config.venues.kalshi.clone(),
                config.venues.ws_policy.clone(),
                config.latency.orderbook_fetch_max_ms,
                config.latency.order_placement_max_ms,
            )),
        );

        let mode = Arc::new(ModeSwitch::new(config.operating_mode));
        let engine = Arc::new(ExecutionEngine::new(
            adapters.clone(),
            risk.clone(),
            breaker.clone(),
            store.clone(),
            detector.clone(),
            alerter.clone(),
            execution_repo,
            position_repo,
            fees,
            mode.clone(),
            EngineConfig {
                max_slippage: config.trading.max_slippage,
                latency: config.latency.clone(),
                track_dry_run_pnl: config.track_dry_run_pnl,
            },
        ));

        let supervisor = Arc::new(Supervisor::new(
            matcher.clone(),
            detector.clone(),
            engine.clone(),
            breaker.clone(),
            store.clone(),
            alerter.clone(),
            adapters,
            opportunity_repo,
            SupervisorConfig {
                scan_interval: Duration::from_millis(config.scan_interval_ms),
                suppress_detection_when_paused: config.suppress_detection_when_paused,
                max_state_age_minutes: config.max_state_age_minutes,
                require_manual_review: config.require_manual_review,
                shutdown_grace: Duration::from_secs(10),
            },
        ));

        Ok(Self {
            config,
            store,
            breaker,
            matcher,
            detector,
            risk,
            engine,
            supervisor,
            mode,
            startup_warnings,
        })
    }

    /// Spawn the long-running tasks and apply the arming policy.
    pub async fn start(self) -> Result<SystemHandle> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let auto_save_task = spawn_auto_save(
            self.store.clone(),
            self.breaker.clone(),
            Duration::from_secs(self.config.auto_save_interval_s),
            shutdown_rx.clone(),
        );

        // Push feeds for every contract under an active mapping. Additive
        // only; the pull path stays authoritative.
        let mappings = self.matcher.active_mappings().await;
        if !mappings.is_empty() {
            let poly_contracts: Vec<String> = mappings
                .iter()
                .map(|m| m.polymarket_contract.clone())
                .collect();
            let kalshi_contracts: Vec<String> =
                mappings.iter().map(|m| m.kalshi_contract.clone()).collect();
            let _ = self
                .supervisor
                .spawn_feed(Venue::Polymarket, poly_contracts);
            let _ = self.supervisor.spawn_feed(Venue::Kalshi, kalshi_contracts);
        }

        let held = self
            .supervisor
            .arm_from_startup(&self.startup_warnings)
            .await;
        if !held.is_empty() {
            warn!(
                "Scan loop not armed; review and `resume` to start: {}",
                held.join("; ")
            );
        }

        let supervisor_task = tokio::spawn(self.supervisor.clone().run(shutdown_rx));

        Ok(SystemHandle {
            supervisor: self.supervisor,
            breaker: self.breaker,
            store: self.store,
            matcher: self.matcher,
            detector: self.detector,
            risk: self.risk,
            mode: self.mode,
            config: self.config,
            shutdown_tx,
            supervisor_task,
            auto_save_task,
        })
    }
}
