use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// SQLite-backed event repository. Append-only tables keyed by opaque ids;
/// the core relies only on idempotent insert and insertion-ordered reads.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_mappings (
                id TEXT PRIMARY KEY,
                polymarket_contract TEXT NOT NULL,
                kalshi_contract TEXT NOT NULL,
                description TEXT NOT NULL,
                confidence REAL NOT NULL,
                method TEXT NOT NULL,
                resolution_time INTEGER,
                outcome_alignment TEXT NOT NULL,
                active BOOLEAN NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_mappings_active
            ON event_mappings (active, created_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create event_mappings table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS opportunities (
                id TEXT PRIMARY KEY,
                mapping_id TEXT NOT NULL,
                buy_venue TEXT NOT NULL,
                sell_venue TEXT NOT NULL,
                buy_price TEXT NOT NULL,
                sell_price TEXT NOT NULL,
                gross_spread TEXT NOT NULL,
                est_fees TEXT NOT NULL,
                net_profit_per_unit TEXT NOT NULL,
                max_qty INTEGER NOT NULL,
                execution_risk REAL NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_opportunities_mapping_time
            ON opportunities (mapping_id, created_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create opportunities table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                opportunity_id TEXT NOT NULL,
                mapping_id TEXT NOT NULL,
                status TEXT NOT NULL,
                buy_venue TEXT NOT NULL,
                sell_venue TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                buy_price TEXT NOT NULL,
                sell_price TEXT NOT NULL,
                realized_pnl TEXT,
                fees TEXT NOT NULL,
                is_dry_run BOOLEAN NOT NULL DEFAULT 0,
                detail TEXT,
                executed_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_executions_mapping_time
            ON executions (mapping_id, executed_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create executions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                venue TEXT NOT NULL,
                contract TEXT NOT NULL,
                mapping_id TEXT,
                outcome TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                avg_price TEXT NOT NULL,
                opened_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_positions_venue_contract
            ON positions (venue, contract);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create positions table")?;

        info!("Database schema initialized.");
        Ok(())
    }
}
