//! Shared fixture for integration tests: a fully wired engine and
//! supervisor over mock venues, a temp-dir state store, and in-memory
//! repositories.

use chrono::Utc;
use predarb::application::detector::{ArbitrageDetector, DetectorConfig};
use predarb::application::engine::{EngineConfig, ExecutionEngine, ModeSwitch};
use predarb::application::matcher::{AliasTable, EventMatcher};
use predarb::application::risk::RiskManager;
use predarb::application::supervisor::{Supervisor, SupervisorConfig};
use predarb::config::{
    BreakerEnvConfig, LatencyEnvConfig, MatcherEnvConfig, Mode, TradingEnvConfig,
};
use predarb::domain::fees::{FeeModel, FeeSchedule};
use predarb::domain::ports::VenueAdapter;
use predarb::domain::types::{EventMapping, MatchMethod, OrderBook, PriceLevel, Venue};
use predarb::infrastructure::circuit_breaker::CircuitBreaker;
use predarb::infrastructure::mock::{
    InMemoryExecutionRepository, InMemoryMappingRepository, InMemoryOpportunityRepository,
    InMemoryPositionRepository, MockVenueAdapter, RecordingAlerter,
};
use predarb::infrastructure::state_store::StateStore;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub struct Fixture {
    pub dir: TempDir,
    pub store: Arc<StateStore>,
    pub breaker: Arc<CircuitBreaker>,
    pub alerter: Arc<RecordingAlerter>,
    pub polymarket: Arc<MockVenueAdapter>,
    pub kalshi: Arc<MockVenueAdapter>,
    pub detector: Arc<ArbitrageDetector>,
    pub risk: Arc<RiskManager>,
    pub engine: Arc<ExecutionEngine>,
    pub matcher: Arc<EventMatcher>,
    pub executions: Arc<InMemoryExecutionRepository>,
    pub positions_repo: Arc<InMemoryPositionRepository>,
    pub opportunities_repo: Arc<InMemoryOpportunityRepository>,
    pub mode: Arc<ModeSwitch>,
}

pub fn trading_config(fees: FeeSchedule) -> TradingEnvConfig {
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
        fees,
    }
}

impl Fixture {
    pub fn new(mode: Mode) -> Self {
        Self::with_fees(mode, FeeSchedule::default())
    }

    pub fn with_fees(mode: Mode, fees: FeeSchedule) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(StateStore::load(dir.path().join("state.json")).unwrap());
        let alerter = Arc::new(RecordingAlerter::default());
        let breaker = Arc::new(CircuitBreaker::new(
            store.clone(),
            alerter.clone(),
            &BreakerEnvConfig {
                max_consecutive_failures: 3,
                max_asymmetric_executions: 1,
            },
        ));

        let trading = trading_config(fees.clone());
        let fee_model = FeeModel::new(fees);
        let detector = Arc::new(ArbitrageDetector::new(
            fee_model.clone(),
            DetectorConfig {
                min_profit_threshold: trading.min_profit_threshold,
                min_liquidity_depth: trading.min_liquidity_depth,
                opportunity_ttl_ms: trading.opportunity_ttl_ms,
            },
        ));
        let risk = Arc::new(RiskManager::new(
            trading,
            breaker.clone(),
            store.clone(),
        ));

        let polymarket = Arc::new(MockVenueAdapter::new(Venue::Polymarket));
        let kalshi = Arc::new(MockVenueAdapter::new(Venue::Kalshi));
        let mut adapters: HashMap<Venue, Arc<dyn VenueAdapter>> = HashMap::new();
        adapters.insert(Venue::Polymarket, polymarket.clone());
        adapters.insert(Venue::Kalshi, kalshi.clone());

        let executions = Arc::new(InMemoryExecutionRepository::default());
        let positions_repo = Arc::new(InMemoryPositionRepository::default());
        let opportunities_repo = Arc::new(InMemoryOpportunityRepository::default());
        let mode = Arc::new(ModeSwitch::new(mode));

        let engine = Arc::new(ExecutionEngine::new(
            adapters,
            risk.clone(),
            breaker.clone(),
            store.clone(),
            detector.clone(),
            alerter.clone(),
            executions.clone(),
            positions_repo.clone(),
            fee_model,
            mode.clone(),
            EngineConfig {
                max_slippage: dec!(0.10),
                latency: LatencyEnvConfig {
                    end_to_end_max_ms: 2000,
                    order_placement_max_ms: 1500,
                    orderbook_fetch_max_ms: 1000,
                    reconcile_max_ms: 5000,
                },
                track_dry_run_pnl: true,
            },
        ));

        let matcher = Arc::new(EventMatcher::new(
            Arc::new(InMemoryMappingRepository::default()),
            MatcherEnvConfig {
                fuzzy_threshold: 0.95,
                min_confidence_threshold: 0.95,
                require_date_validation: true,
                require_category_match: true,
                date_tolerance_hours: 24,
            },
            AliasTable::default(),
        ));

        Self {
            dir,
            store,
            breaker,
            alerter,
            polymarket,
            kalshi,
            detector,
            risk,
            engine,
            matcher,
            executions,
            positions_repo,
            opportunities_repo,
            mode,
        }
    }

    pub fn supervisor(&self) -> Arc<Supervisor> {
        let mut adapters: HashMap<Venue, Arc<dyn VenueAdapter>> = HashMap::new();
        adapters.insert(Venue::Polymarket, self.polymarket.clone());
        adapters.insert(Venue::Kalshi, self.kalshi.clone());

        Arc::new(Supervisor::new(
            self.matcher.clone(),
            self.detector.clone(),
            self.engine.clone(),
            self.breaker.clone(),
            self.store.clone(),
            self.alerter.clone(),
            adapters,
            self.opportunities_repo.clone(),
            SupervisorConfig {
                scan_interval: Duration::from_millis(50),
                suppress_detection_when_paused: false,
                max_state_age_minutes: 60,
                require_manual_review: false,
                shutdown_grace: Duration::from_secs(2),
            },
        ))
    }

    pub fn mapping(&self) -> EventMapping {
        let now = Utc::now();
        EventMapping {
            id: "map-1".to_string(),
            polymarket_contract: "poly-token".to_string(),
            kalshi_contract: "KX-EVENT".to_string(),
            description: "integration test event".to_string(),
            confidence: 1.0,
            method: MatchMethod::Manual,
            resolution_time: None,
            outcome_alignment: "yes==yes".to_string(),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Arbitrage-friendly books: polymarket 0.40/0.42, kalshi 0.50/0.52.
    pub fn set_spread_books(&self, size: Decimal) {
        self.polymarket.set_book(book(
            Venue::Polymarket,
            "poly-token",
            dec!(0.40),
            dec!(0.42),
            size,
        ));
        self.kalshi.set_book(book(
            Venue::Kalshi,
            "KX-EVENT",
            dec!(0.50),
            dec!(0.52),
            size,
        ));
    }
}

pub fn book(venue: Venue, contract: &str, bid: Decimal, ask: Decimal, size: Decimal) -> OrderBook {
    OrderBook {
        venue,
        contract: contract.to_string(),
        bids: vec![PriceLevel { price: bid, size }],
        asks: vec![PriceLevel { price: ask, size }],
        timestamp: Utc::now(),
    }
}

pub fn zero_fees() -> FeeSchedule {
    FeeSchedule {
        polymarket_taker_rate: Decimal::ZERO,
        kalshi_fee_rate: Decimal::ZERO,
        kalshi_fee_cap: Decimal::ZERO,
        gas_cost_usd: Decimal::ZERO,
    }
}
