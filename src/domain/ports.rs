use crate::domain::errors::VenueError;
use crate::domain::types::{
    Balances, EventMapping, ExecutionRecord, FillResult, FokOrder, Opportunity, OrderBook,
    Position, Venue, VenuePosition,
};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc::Receiver;

/// Normalized view of one venue.
///
/// `place_fok` encodes every outcome in `FillResult` rather than `Err`:
/// a rejected order is a normal, expected result, and a transport failure
/// must reach the execution engine as data so it can reconcile.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn venue(&self) -> Venue;

    /// Current top levels with their capture timestamp. Authoritative at
    /// execution time; push updates are additive only.
    async fn get_order_book(&self, contract: &str) -> Result<OrderBook, VenueError>;

    async fn place_fok(&self, order: FokOrder) -> FillResult;

    async fn get_balances(&self) -> Result<Balances, VenueError>;

    async fn get_positions(&self) -> Result<Vec<VenuePosition>, VenueError>;

    async fn cancel_order(&self, order_id: &str) -> Result<(), VenueError>;

    /// Push order-book updates for the given contracts. The returned
    /// channel closes when the reconnect policy is exhausted; the caller
    /// converts that into `ConnectionLost`.
    async fn subscribe_books(
        &self,
        contracts: Vec<String>,
    ) -> Result<Receiver<OrderBook>, VenueError>;
}

/// Alert severity, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
    Fatal,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
            Severity::Fatal => "fatal",
        };
        write!(f, "{s}")
    }
}

/// Outbound notification channel. Send failures are logged, never
/// propagated: alerting must not take down the trading path.
#[async_trait]
pub trait Alerter: Send + Sync {
    async fn send(&self, severity: Severity, title: &str, body: &str);
}

#[async_trait]
pub trait MappingRepository: Send + Sync {
    async fn insert(&self, mapping: &EventMapping) -> Result<()>;
    async fn set_active(&self, id: &str, active: bool) -> Result<()>;
    async fn load_all(&self) -> Result<Vec<EventMapping>>;
}

#[async_trait]
pub trait OpportunityRepository: Send + Sync {
    async fn insert(&self, opportunity: &Opportunity) -> Result<()>;
}

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn insert(&self, record: &ExecutionRecord) -> Result<()>;
}

#[async_trait]
pub trait PositionRepository: Send + Sync {
    async fn upsert(&self, position: &Position) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn load_all(&self) -> Result<Vec<Position>>;
}
