//! Operator shell over the running process.
//!
//! Reads one command per line from stdin; every command prints to stdout.
//! `quit` triggers graceful shutdown and returns control to `main`.

use crate::application::system::SystemHandle;
use crate::config::Mode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

const HELP: &str = "\
commands:
  status         mode, circuit breaker, daily counters, position count
  health         venue connectivity and loop liveness
  positions      open positions
  balance        per-venue balances
  pause          pause the circuit breaker (manual)
  resume         resume the circuit breaker and arm the scan loop
  dry-run        switch to dry-run mode
  live --confirm switch to live mode
  scan           one-shot opportunity scan
  mappings       active event mappings
  opportunities  live cached opportunities
  config         effective configuration
  quit           graceful shutdown";

/// Run the shell until `quit` or stdin closes.
pub async fn run_shell(handle: &SystemHandle) {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    println!("predarb shell ready; `help` lists commands");
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("stdin closed, shutting down");
                break;
            }
            Err(e) => {
                eprintln!("stdin error: {e}");
                break;
            }
        };

        let mut parts = line.split_whitespace();
        let command = match parts.next() {
            Some(c) => c,
            None => continue,
        };
        let arg = parts.next();

        match command {
            "help" => println!("{HELP}"),
            "status" => cmd_status(handle),
            "health" => cmd_health(handle).await,
            "positions" => cmd_positions(handle),
            "balance" => cmd_balance(handle).await,
            "pause" => {
                handle.breaker.pause("manual").await;
                println!("circuit breaker paused (manual)");
            }
            "resume" => {
                if handle.breaker.is_paused() {
                    handle.breaker.resume().await;
                    println!("circuit breaker resumed");
                } else {
                    println!("circuit breaker was not paused");
                }
                if !handle.supervisor.is_armed() {
                    handle.supervisor.arm();
                    println!("scan loop armed");
                }
            }
            "dry-run" => {
                handle.mode.set(Mode::DryRun);
                println!("operating mode: dry_run");
            }
            "live" => {
                if arg == Some("--confirm") {
                    handle.mode.set(Mode::Live);
                    println!("operating mode: LIVE");
                } else {
                    println!("refusing: `live` requires --confirm");
                }
            }
            "scan" => {
                let opportunities = handle.supervisor.scan_once().await;
                if opportunities.is_empty() {
                    println!("no opportunities");
                }
                for o in opportunities {
                    println!(
                        "  {}: buy {} @ {} -> sell {} @ {} | net/unit {} qty {} risk {:.2}",
                        o.mapping_id,
                        o.buy_venue,
                        o.buy_price,
                        o.sell_venue,
                        o.sell_price,
                        o.net_profit_per_unit,
                        o.max_qty,
                        o.execution_risk,
                    );
                }
            }
            "mappings" => cmd_mappings(handle).await,
            "opportunities" => {
                let cached = handle.detector.cached_opportunities();
                if cached.is_empty() {
                    println!("no live cached opportunities");
                }
                for o in cached {
                    println!(
                        "  {}: {} -> {} net/unit {} expires {}",
                        o.mapping_id, o.buy_venue, o.sell_venue, o.net_profit_per_unit, o.expires_at
                    );
                }
            }
            "config" => cmd_config(handle),
            "quit" | "exit" => {
                println!("shutting down");
                break;
            }
            other => println!("unknown command: {other} (try `help`)"),
        }
    }
}

fn cmd_status(handle: &SystemHandle) {
    let daily = handle.store.daily();
    let cb = handle.breaker.state();
    let positions = handle.risk.positions();

    println!("mode:        {}", handle.mode.get());
    println!("armed:       {}", handle.supervisor.is_armed());
    match (&cb.paused, &cb.reason) {
        (true, Some(reason)) => println!("breaker:     PAUSED ({reason})"),
        (true, None) => println!("breaker:     PAUSED"),
        _ => println!("breaker:     ok"),
    }
    println!(
        "today:       pnl {} | trades {} | volume {}",
        daily.pnl, daily.trade_count, daily.volume
    );
    println!(
        "positions:   {} open, exposure {}",
        positions.len(),
        handle.risk.total_exposure()
    );
}

async fn cmd_health(handle: &SystemHandle) {
    let report = handle.supervisor.health().await;
    println!("armed:   {}", report.armed);
    println!("breaker: {}", if report.breaker_paused { "paused" } else { "ok" });
    for (venue, ok) in report.venue_rest {
        let push = report
            .push_age_secs
            .get(&venue)
            .and_then(|a| *a)
            .map(|s| format!("{s}s ago"))
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{venue}: rest {} | last push {push}",
            if ok { "ok" } else { "FAILING" }
        );
    }
}

fn cmd_positions(handle: &SystemHandle) {
    let positions = handle.risk.positions();
    if positions.is_empty() {
        println!("no open positions");
        return;
    }
    for p in positions {
        println!(
            "  {} {} {} x{} @ {} (mapping {})",
            p.venue,
            p.contract,
            p.outcome,
            p.quantity,
            p.avg_price,
            p.mapping_id.as_deref().unwrap_or("-"),
        );
    }
}

async fn cmd_balance(handle: &SystemHandle) {
    for (venue, result) in handle.supervisor.balances().await {
        match result {
            Ok(b) => println!("{venue}: available {} / total {}", b.available, b.total),
            Err(e) => println!("{venue}: unavailable ({e})"),
        }
    }
}

async fn cmd_mappings(handle: &SystemHandle) {
    let mappings = handle.matcher.active_mappings().await;
    if mappings.is_empty() {
        println!("no active mappings");
        return;
    }
    for m in mappings {
        println!(
            "  {} [{} {:.3}{}] {} <-> {} | {}",
            m.id,
            m.method,
            m.confidence,
            if handle.matcher.can_trade(&m) { "" } else { " UNTRADABLE" },
            m.polymarket_contract,
            m.kalshi_contract,
            m.description,
        );
    }
}

fn cmd_config(handle: &SystemHandle) {
    let c = &handle.config;
    println!("operating_mode:          {}", handle.mode.get());
    println!("min_profit_threshold:    {}", c.trading.min_profit_threshold);
    println!("max_slippage:            {}", c.trading.max_slippage);
    println!("max_total_exposure:      {}", c.trading.max_total_exposure);
    println!("max_exposure_per_event:  {}", c.trading.max_exposure_per_event);
    println!("max_position_imbalance:  {}", c.trading.max_position_imbalance);
    println!("daily_loss_limit:        {}", c.trading.daily_loss_limit);
    println!(
        "qty_per_trade:           {}..{}",
        c.trading.min_qty_per_trade, c.trading.max_qty_per_trade
    );
    println!("min_trade_value:         {}", c.trading.min_trade_value);
    println!("min_profit_abs:          {}", c.trading.min_profit_abs);
    println!("min_liquidity_depth:     {}", c.trading.min_liquidity_depth);
    println!("opportunity_ttl_ms:      {}", c.trading.opportunity_ttl_ms);
    println!("fuzzy_threshold:         {}", c.matcher.fuzzy_threshold);
    println!("min_confidence:          {}", c.matcher.min_confidence_threshold);
    println!("require_date_validation: {}", c.matcher.require_date_validation);
    println!("require_category_match:  {}", c.matcher.require_category_match);
    println!("scan_interval_ms:        {}", c.scan_interval_ms);
    println!("auto_save_interval_s:    {}", c.auto_save_interval_s);
    println!("state_file:              {}", c.state_file_path.display());
    println!("database_url:            {}", c.database_url);
}
