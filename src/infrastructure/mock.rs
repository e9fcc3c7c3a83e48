//! Scriptable in-memory implementations of the ports, used by unit and
//! integration tests.

use crate::domain::errors::VenueError;
use crate::domain::ports::{
    Alerter, ExecutionRepository, MappingRepository, OpportunityRepository, PositionRepository,
    Severity, VenueAdapter,
};
use crate::domain::types::{
    Balances, EventMapping, ExecutionRecord, FillResult, FokOrder, Opportunity, OrderBook,
    Position, Venue, VenuePosition,
};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// A venue whose books, fills, and position reports are scripted by the
/// test. Placed orders are recorded for assertion.
pub struct MockVenueAdapter {
    venue: Venue,
    books: Mutex<HashMap<String, OrderBook>>,
    book_errors: Mutex<VecDeque<VenueError>>,
    fill_queue: Mutex<VecDeque<FillResult>>,
    position_responses: Mutex<VecDeque<Vec<VenuePosition>>>,
    default_positions: Mutex<Vec<VenuePosition>>,
    placed: Mutex<Vec<FokOrder>>,
    balances: Mutex<Balances>,
    feed_tx: Mutex<Option<mpsc::Sender<OrderBook>>>,
}

impl MockVenueAdapter {
    pub fn new(venue: Venue) -> Self {
        Self {
            venue,
            books: Mutex::new(HashMap::new()),
            book_errors: Mutex::new(VecDeque::new()),
            fill_queue: Mutex::new(VecDeque::new()),
            position_responses: Mutex::new(VecDeque::new()),
            default_positions: Mutex::new(Vec::new()),
            placed: Mutex::new(Vec::new()),
            balances: Mutex::new(Balances {
                venue,
                available: Decimal::from(10_000),
                total: Decimal::from(10_000),
            }),
            feed_tx: Mutex::new(None),
        }
    }

    pub fn set_book(&self, book: OrderBook) {
        self.books
            .lock()
            .unwrap()
            .insert(book.contract.clone(), book);
    }

    /// Queue an error for the next `get_order_book` call; drained before
    /// any scripted book is served.
    pub fn queue_book_error(&self, error: VenueError) {
        self.book_errors.lock().unwrap().push_back(error);
    }

    /// Queue the result of the next `place_fok`. An empty queue rejects.
    pub fn queue_fill(&self, result: FillResult) {
        self.fill_queue.lock().unwrap().push_back(result);
    }

    /// Queue one `get_positions` response; when the queue is empty the
    /// default set is returned.
    pub fn queue_positions(&self, positions: Vec<VenuePosition>) {
        self.position_responses.lock().unwrap().push_back(positions);
    }

    pub fn set_default_positions(&self, positions: Vec<VenuePosition>) {
        *self.default_positions.lock().unwrap() = positions;
    }

    pub fn placed_orders(&self) -> Vec<FokOrder> {
        self.placed.lock().unwrap().clone()
    }

    /// Push a book through the subscription channel, if one is open.
    pub async fn push_book(&self, book: OrderBook) {
        let tx = self.feed_tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(book).await;
        }
    }

    /// Drop the feed sender, closing the push channel as an exhausted
    /// reconnect loop would.
    pub fn close_feed(&self) {
        self.feed_tx.lock().unwrap().take();
    }
}

#[async_trait]
impl VenueAdapter for MockVenueAdapter {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn get_order_book(&self, contract: &str) -> Result<OrderBook, VenueError> {
        if let Some(error) = self.book_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.books
            .lock()
            .unwrap()
            .get(contract)
            .cloned()
            .ok_or_else(|| VenueError::NotFound {
                contract: contract.to_string(),
            })
    }

    async fn place_fok(&self, order: FokOrder) -> FillResult {
        self.placed.lock().unwrap().push(order);
        self.fill_queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(FillResult::Rejected {
                reason: "no scripted fill".to_string(),
                order_id: None,
            })
    }

    async fn get_balances(&self) -> Result<Balances, VenueError> {
        Ok(self.balances.lock().unwrap().clone())
    }

    async fn get_positions(&self) -> Result<Vec<VenuePosition>, VenueError> {
        if let Some(queued) = self.position_responses.lock().unwrap().pop_front() {
            return Ok(queued);
        }
        Ok(self.default_positions.lock().unwrap().clone())
    }

    async fn cancel_order(&self, _order_id: &str) -> Result<(), VenueError> {
        Ok(())
    }

    async fn subscribe_books(
        &self,
        _contracts: Vec<String>,
    ) -> Result<mpsc::Receiver<OrderBook>, VenueError> {
        let (tx, rx) = mpsc::channel(64);
        *self.feed_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }
}

/// Captures alerts for assertion.
#[derive(Default)]
pub struct RecordingAlerter {
    events: Mutex<Vec<(Severity, String, String)>>,
}

impl RecordingAlerter {
    pub fn events(&self) -> Vec<(Severity, String, String)> {
        self.events.lock().unwrap().clone()
    }

    pub fn has_severity(&self, severity: Severity) -> bool {
        self.events.lock().unwrap().iter().any(|(s, _, _)| *s == severity)
    }
}

#[async_trait]
impl Alerter for RecordingAlerter {
    async fn send(&self, severity: Severity, title: &str, body: &str) {
        self.events
            .lock()
            .unwrap()
            .push((severity, title.to_string(), body.to_string()));
    }
}

#[derive(Default)]
pub struct InMemoryMappingRepository {
    mappings: Mutex<Vec<EventMapping>>,
}

#[async_trait]
impl MappingRepository for InMemoryMappingRepository {
    async fn insert(&self, mapping: &EventMapping) -> Result<()> {
        let mut mappings = self.mappings.lock().unwrap();
        if !mappings.iter().any(|m| m.id == mapping.id) {
            mappings.push(mapping.clone());
        }
        Ok(())
    }

    async fn set_active(&self, id: &str, active: bool) -> Result<()> {
        let mut mappings = self.mappings.lock().unwrap();
        if let Some(mapping) = mappings.iter_mut().find(|m| m.id == id) {
            mapping.active = active;
        }
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<EventMapping>> {
        Ok(self.mappings.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct InMemoryOpportunityRepository {
    opportunities: Mutex<Vec<Opportunity>>,
}

impl InMemoryOpportunityRepository {
    pub fn all(&self) -> Vec<Opportunity> {
        self.opportunities.lock().unwrap().clone()
    }
}

#[async_trait]
impl OpportunityRepository for InMemoryOpportunityRepository {
    async fn insert(&self, opportunity: &Opportunity) -> Result<()> {
        let mut opportunities = self.opportunities.lock().unwrap();
        if !opportunities.iter().any(|o| o.id == opportunity.id) {
            opportunities.push(opportunity.clone());
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryExecutionRepository {
    records: Mutex<Vec<ExecutionRecord>>,
}

impl InMemoryExecutionRepository {
    pub fn all(&self) -> Vec<ExecutionRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn insert(&self, record: &ExecutionRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        if !records.iter().any(|r| r.id == record.id) {
            records.push(record.clone());
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryPositionRepository {
    positions: Mutex<Vec<Position>>,
}

impl InMemoryPositionRepository {
    pub fn all(&self) -> Vec<Position> {
        self.positions.lock().unwrap().clone()
    }
}

#[async_trait]
impl PositionRepository for InMemoryPositionRepository {
    async fn upsert(&self, position: &Position) -> Result<()> {
        let mut positions = self.positions.lock().unwrap();
        positions.retain(|p| p.id != position.id);
        positions.push(position.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.positions.lock().unwrap().retain(|p| p.id != id);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Position>> {
        Ok(self.positions.lock().unwrap().clone())
    }
}
