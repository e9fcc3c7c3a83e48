//! Durable process state: daily counters, circuit-breaker flag, open
//! positions, heartbeat.
//!
//! The snapshot is a single JSON document replaced atomically
//! (write-tempfile-then-rename), so an interrupted write leaves either the
//! old or the new complete state on disk, never a torn one. Unknown fields
//! in a snapshot written by a newer binary are preserved on read.

use crate::domain::types::{DailyState, BreakerState, Position, ProcessState, Venue};
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{info, warn};

pub struct StateStore {
    path: PathBuf,
    state: RwLock<ProcessState>,
    consecutive_io_failures: AtomicU32,
}

impl StateStore {
    /// Load the last snapshot, or start from a zero state when none exists.
    /// A stale `trading_date` is rolled over before any caller can observe
    /// the state.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let now = Utc::now();

        let mut state = match Self::read_snapshot(&path)? {
            Some(state) => {
                info!(path = %path.display(), "Loaded state snapshot");
                state
            }
            None => {
                info!(path = %path.display(), "No state snapshot found, starting from zero state");
                ProcessState::zero(now)
            }
        };

        let today = now.date_naive();
        if state.daily.trading_date != today {
            info!(
                from = %state.daily.trading_date,
                to = %today,
                "Trading date rolled over, resetting daily counters"
            );
            state.daily = DailyState::zero(today);
        }

        Ok(Self {
            path,
            state: RwLock::new(state),
            consecutive_io_failures: AtomicU32::new(0),
        })
    }

    fn read_snapshot(path: &Path) -> Result<Option<ProcessState>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).context("Failed to read state snapshot")?;
        let state = serde_json::from_str(&content).context("Failed to parse state snapshot")?;
        Ok(Some(state))
    }

    /// Read access under a shared guard.
    pub fn with_state<T>(&self, f: impl FnOnce(&ProcessState) -> T) -> T {
        let guard = self.state.read().expect("state lock poisoned");
        f(&guard)
    }

    /// In-memory mutation. Does not persist; pair with [`snapshot`] when the
    /// change must be durable.
    pub fn update<T>(&self, f: impl FnOnce(&mut ProcessState) -> T) -> T {
        let mut guard = self.state.write().expect("state lock poisoned");
        f(&mut guard)
    }

    pub fn daily(&self) -> DailyState {
        self.with_state(|s| s.daily.clone())
    }

    pub fn breaker(&self) -> BreakerState {
        self.with_state(|s| s.cb.clone())
    }

    pub fn positions(&self) -> Vec<Position> {
        self.with_state(|s| s.positions.clone())
    }

    /// Age of the last on-disk heartbeat in minutes, from the loaded state.
    pub fn heartbeat_age_minutes(&self) -> i64 {
        let heartbeat = self.with_state(|s| s.last_heartbeat);
        (Utc::now() - heartbeat).num_minutes()
    }

    /// Increment the day counters after a completed trade.
    pub fn record_trade(&self, realized_pnl: Decimal, volume: Decimal) {
        self.update(|s| {
            let now = Utc::now();
            s.daily.pnl += realized_pnl;
            s.daily.trade_count += 1;
            s.daily.volume += volume;
            s.daily.last_trade_at = Some(now);
            if realized_pnl > Decimal::ZERO {
                s.last_successful_trade = Some(now);
            }
        });
    }

    /// Reset daily counters when the UTC date has moved on. Returns true if
    /// a rollover happened.
    pub fn roll_daily_if_needed(&self, today: NaiveDate) -> bool {
        self.update(|s| {
            if s.daily.trading_date == today {
                return false;
            }
            info!(from = %s.daily.trading_date, to = %today, "UTC midnight rollover");
            s.daily = DailyState::zero(today);
            true
        })
    }

    /// Replace or insert a ledger position, keyed by (venue, contract,
    /// outcome). Zero-quantity positions are dropped.
    pub fn upsert_position(&self, position: Position) {
        self.update(|s| {
            s.positions.retain(|p| {
                !(p.venue == position.venue
                    && p.contract == position.contract
                    && p.outcome == position.outcome)
            });
            if position.quantity > 0 {
                s.positions.push(position);
            }
        });
    }

    pub fn replace_positions(&self, positions: Vec<Position>) {
        self.update(|s| s.positions = positions);
    }

    /// Open positions that have no offsetting leg on the other venue.
    /// Non-empty at startup means the last run halted mid-trade.
    pub fn unhedged_positions(&self) -> Vec<Position> {
        self.with_state(|s| {
            s.positions
                .iter()
                .filter(|p| {
                    let hedged = s.positions.iter().any(|q| {
                        q.mapping_id.is_some()
                            && q.mapping_id == p.mapping_id
                            && q.venue != p.venue
                            && q.quantity == p.quantity
                    });
                    !hedged
                })
                .cloned()
                .collect()
        })
    }

    /// Apply a breaker mutation and make it durable before the in-memory
    /// flag becomes visible to readers. Readers observing the old state
    /// during the write only ever see the less-paused side, and the pausing
    /// caller does not proceed until the write landed.
    pub async fn set_breaker_durable(
        &self,
        f: impl FnOnce(&mut BreakerState) + Clone + Send + 'static,
    ) -> Result<()> {
        let staged = {
            let guard = self.state.read().expect("state lock poisoned");
            let mut staged = guard.clone();
            f.clone()(&mut staged.cb);
            staged.last_heartbeat = Utc::now();
            staged
        };

        let write_result = self.write_to_disk(staged).await;

        self.update(|s| f(&mut s.cb));

        // Even if the disk write failed the in-memory flag is set; the
        // failure direction is conservative (paused but not persisted).
        write_result
    }

    /// Persist the current state atomically.
    pub async fn snapshot(&self) -> Result<()> {
        let staged = {
            let mut guard = self.state.write().expect("state lock poisoned");
            guard.last_heartbeat = Utc::now();
            guard.clone()
        };
        self.write_to_disk(staged).await
    }

    async fn write_to_disk(&self, state: ProcessState) -> Result<()> {
        let path = self.path.clone();
        let result = tokio::task::spawn_blocking(move || write_atomic(&path, &state))
            .await
            .context("Snapshot task panicked")?;

        match &result {
            Ok(()) => {
                self.consecutive_io_failures.store(0, Ordering::Relaxed);
            }
            Err(e) => {
                let failures = self.consecutive_io_failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(error = %e, failures, "State snapshot write failed, state kept in memory");
            }
        }
        result
    }

    /// Consecutive snapshot failures since the last success.
    pub fn io_failure_streak(&self) -> u32 {
        self.consecutive_io_failures.load(Ordering::Relaxed)
    }
}

fn write_atomic(path: &Path, state: &ProcessState) -> Result<()> {
    let content = serde_json::to_string_pretty(state).context("Failed to serialize state")?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }

    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, content).context("Failed to write temp state file")?;
    fs::rename(&temp_path, path).context("Failed to rename state file")?;
    Ok(())
}

/// Derived inventory for one mapping over a position set.
pub fn inventory_for(
    positions: &[Position],
    mapping_id: &str,
    reference_price: Decimal,
) -> crate::domain::types::Inventory {
    use crate::domain::types::{Inventory, Outcome};

    let mut inv = Inventory::default();
    for p in positions
        .iter()
        .filter(|p| p.mapping_id.as_deref() == Some(mapping_id))
    {
        match (p.venue, p.outcome) {
            (Venue::Polymarket, Outcome::Yes) => inv.polymarket_yes += p.quantity,
            (Venue::Polymarket, Outcome::No) => inv.polymarket_no += p.quantity,
            (Venue::Kalshi, Outcome::Yes) => inv.kalshi_yes += p.quantity,
            (Venue::Kalshi, Outcome::No) => inv.kalshi_no += p.quantity,
        }
    }
    inv.net_position = (inv.polymarket_yes + inv.kalshi_yes) as i64
        - (inv.polymarket_no + inv.kalshi_no) as i64;
    inv.imbalance_value = Decimal::from(inv.net_position.unsigned_abs()) * reference_price;
    inv.needs_rebalance = inv.net_position != 0;
    inv
}
