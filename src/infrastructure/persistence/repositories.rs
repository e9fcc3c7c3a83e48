//! SQLite implementations of the repository ports.
//!
//! Inserts are idempotent on primary key (`INSERT OR IGNORE`); money
//! columns are stored as decimal strings to keep exact values.

use crate::domain::ports::{
    ExecutionRepository, MappingRepository, OpportunityRepository, PositionRepository,
};
use crate::domain::types::{
    EventMapping, ExecutionRecord, MatchMethod, Opportunity, Outcome, Position, Venue,
};
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

fn venue_to_str(venue: Venue) -> &'static str {
    match venue {
        Venue::Polymarket => "polymarket",
        Venue::Kalshi => "kalshi",
    }
}

fn venue_from_str(s: &str) -> Result<Venue> {
    match s {
        "polymarket" => Ok(Venue::Polymarket),
        "kalshi" => Ok(Venue::Kalshi),
        other => anyhow::bail!("Unknown venue in database: {}", other),
    }
}

fn outcome_from_str(s: &str) -> Result<Outcome> {
    match s {
        "yes" => Ok(Outcome::Yes),
        "no" => Ok(Outcome::No),
        other => anyhow::bail!("Unknown outcome in database: {}", other),
    }
}

fn ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_ts(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

pub struct SqliteMappingRepository {
    database: Database,
}

impl SqliteMappingRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl MappingRepository for SqliteMappingRepository {
    async fn insert(&self, mapping: &EventMapping) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO event_mappings (
                id, polymarket_contract, kalshi_contract, description,
                confidence, method, resolution_time, outcome_alignment,
                active, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&mapping.id)
        .bind(&mapping.polymarket_contract)
        .bind(&mapping.kalshi_contract)
        .bind(&mapping.description)
        .bind(mapping.confidence)
        .bind(mapping.method.to_string())
        .bind(mapping.resolution_time.map(ts))
        .bind(&mapping.outcome_alignment)
        .bind(mapping.active)
        .bind(ts(mapping.created_at))
        .bind(ts(mapping.updated_at))
        .execute(&self.database.pool)
        .await
        .context("Failed to insert event mapping")?;

        Ok(())
    }

    async fn set_active(&self, id: &str, active: bool) -> Result<()> {
        sqlx::query("UPDATE event_mappings SET active = $1, updated_at = $2 WHERE id = $3")
            .bind(active)
            .bind(ts(Utc::now()))
            .bind(id)
            .execute(&self.database.pool)
            .await
            .context("Failed to update mapping active flag")?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<EventMapping>> {
        type Row = (
            String,
            String,
            String,
            String,
            f64,
            String,
            Option<i64>,
            String,
            bool,
            i64,
            i64,
        );
        let rows = sqlx::query_as::<_, Row>(
            r#"
            SELECT id, polymarket_contract, kalshi_contract, description,
                   confidence, method, resolution_time, outcome_alignment,
                   active, created_at, updated_at
            FROM event_mappings
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load event mappings")?;

        rows.into_iter()
            .map(|row| {
                let method = match row.5.as_str() {
                    "exact" => MatchMethod::Exact,
                    "fuzzy" => MatchMethod::Fuzzy,
                    "manual" => MatchMethod::Manual,
                    other => anyhow::bail!("Unknown match method in database: {}", other),
                };
                Ok(EventMapping {
                    id: row.0,
                    polymarket_contract: row.1,
                    kalshi_contract: row.2,
                    description: row.3,
                    confidence: row.4,
                    method,
                    resolution_time: row.6.map(from_ts),
                    outcome_alignment: row.7,
                    active: row.8,
                    created_at: from_ts(row.9),
                    updated_at: from_ts(row.10),
                })
            })
            .collect()
    }
}

pub struct SqliteOpportunityRepository {
    database: Database,
}

impl SqliteOpportunityRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl OpportunityRepository for SqliteOpportunityRepository {
    async fn insert(&self, opportunity: &Opportunity) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO opportunities (
                id, mapping_id, buy_venue, sell_venue, buy_price, sell_price,
                gross_spread, est_fees, net_profit_per_unit, max_qty,
                execution_risk, created_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(&opportunity.id)
        .bind(&opportunity.mapping_id)
        .bind(venue_to_str(opportunity.buy_venue))
        .bind(venue_to_str(opportunity.sell_venue))
        .bind(opportunity.buy_price.to_string())
        .bind(opportunity.sell_price.to_string())
        .bind(opportunity.gross_spread.to_string())
        .bind(opportunity.est_fees.to_string())
        .bind(opportunity.net_profit_per_unit.to_string())
        .bind(opportunity.max_qty as i64)
        .bind(opportunity.execution_risk)
        .bind(ts(opportunity.created_at))
        .bind(ts(opportunity.expires_at))
        .execute(&self.database.pool)
        .await
        .context("Failed to insert opportunity")?;

        Ok(())
    }
}

pub struct SqliteExecutionRepository {
    database: Database,
}

impl SqliteExecutionRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl ExecutionRepository for SqliteExecutionRepository {
    async fn insert(&self, record: &ExecutionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO executions (
                id, opportunity_id, mapping_id, status, buy_venue, sell_venue,
                quantity, buy_price, sell_price, realized_pnl, fees,
                is_dry_run, detail, executed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(&record.id)
        .bind(&record.opportunity_id)
        .bind(&record.mapping_id)
        .bind(record.status.to_string())
        .bind(venue_to_str(record.buy_venue))
        .bind(venue_to_str(record.sell_venue))
        .bind(record.quantity as i64)
        .bind(record.buy_price.to_string())
        .bind(record.sell_price.to_string())
        .bind(record.realized_pnl.map(|p| p.to_string()))
        .bind(record.fees.to_string())
        .bind(record.is_dry_run)
        .bind(&record.detail)
        .bind(ts(record.executed_at))
        .execute(&self.database.pool)
        .await
        .context("Failed to insert execution record")?;

        Ok(())
    }
}

pub struct SqlitePositionRepository {
    database: Database,
}

impl SqlitePositionRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl PositionRepository for SqlitePositionRepository {
    async fn upsert(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                id, venue, contract, mapping_id, outcome, quantity,
                avg_price, opened_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT(id) DO UPDATE SET
                quantity = excluded.quantity,
                avg_price = excluded.avg_price,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&position.id)
        .bind(venue_to_str(position.venue))
        .bind(&position.contract)
        .bind(&position.mapping_id)
        .bind(position.outcome.to_string())
        .bind(position.quantity as i64)
        .bind(position.avg_price.to_string())
        .bind(ts(position.opened_at))
        .bind(ts(position.updated_at))
        .execute(&self.database.pool)
        .await
        .context("Failed to upsert position")?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM positions WHERE id = $1")
            .bind(id)
            .execute(&self.database.pool)
            .await
            .context("Failed to delete position")?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Position>> {
        type Row = (
            String,
            String,
            String,
            Option<String>,
            String,
            i64,
            String,
            i64,
            i64,
        );
        let rows = sqlx::query_as::<_, Row>(
            r#"
            SELECT id, venue, contract, mapping_id, outcome, quantity,
                   avg_price, opened_at, updated_at
            FROM positions
            ORDER BY opened_at ASC
            "#,
        )
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load positions")?;

        rows.into_iter()
            .map(|row| {
                Ok(Position {
                    id: row.0,
                    venue: venue_from_str(&row.1)?,
                    contract: row.2,
                    mapping_id: row.3,
                    outcome: outcome_from_str(&row.4)?,
                    quantity: row.5 as u64,
                    avg_price: Decimal::from_str(&row.6).unwrap_or_default(),
                    opened_at: from_ts(row.7),
                    updated_at: from_ts(row.8),
                })
            })
            .collect()
    }
}
