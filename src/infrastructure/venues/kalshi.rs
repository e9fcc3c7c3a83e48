//! Kalshi adapter.
//!
//! Kalshi quotes integer cents and a two-sided yes/no book; conversion to
//! the core's [0, 1] decimal scale happens here and nowhere else. A yes ask
//! is derived from the no bid (`1 - no_bid`). Session auth is a bearer
//! token from the login endpoint, refreshed once on a 401.

use crate::config::{KalshiConfig, WsPolicy};
use crate::domain::errors::VenueError;
use crate::domain::ports::VenueAdapter;
use crate::domain::types::{
    Balances, FillResult, FokOrder, OrderBook, OrderSide, Outcome, PriceLevel, Venue,
    VenuePosition,
};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use crate::infrastructure::core::rate_limit::VenueRateLimits;
use crate::infrastructure::venues::feed;
use async_trait::async_trait;
use chrono::Utc;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

/// Venue-native price scale: 1 contract pays out 100 cents.
const CENTS: i64 = 100;

pub fn cents_to_price(cents: i64) -> Decimal {
    Decimal::from(cents) / Decimal::from(CENTS)
}

pub fn price_to_cents(price: Decimal) -> i64 {
    use rust_decimal::prelude::ToPrimitive;
    (price * Decimal::from(CENTS)).round().to_i64().unwrap_or(0)
}

pub struct KalshiAdapter {
    read_client: ClientWithMiddleware,
    write_client: ClientWithMiddleware,
    config: KalshiConfig,
    ws_policy: WsPolicy,
    limits: VenueRateLimits,
    token: RwLock<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct OrderbookResponse {
    orderbook: RawOrderbook,
}

#[derive(Debug, Deserialize, Default)]
struct RawOrderbook {
    /// Resting yes bids as `[price_cents, quantity]`.
    #[serde(default)]
    yes: Vec<[i64; 2]>,
    /// Resting no bids as `[price_cents, quantity]`.
    #[serde(default)]
    no: Vec<[i64; 2]>,
}

#[derive(Debug, Deserialize)]
struct OrderEnvelope {
    order: RawOrder,
}

#[derive(Debug, Deserialize)]
struct RawOrder {
    order_id: String,
    status: String,
    #[serde(default)]
    taker_fill_count: i64,
    #[serde(default)]
    taker_fill_cost: i64,
    #[serde(default)]
    taker_fees: i64,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: i64,
}

#[derive(Debug, Deserialize)]
struct PositionsResponse {
    #[serde(default)]
    market_positions: Vec<MarketPosition>,
}

#[derive(Debug, Deserialize)]
struct MarketPosition {
    ticker: String,
    /// Signed: positive yes contracts, negative no contracts.
    position: i64,
    #[serde(default)]
    market_exposure: i64,
}

impl KalshiAdapter {
    pub fn new(
        config: KalshiConfig,
        ws_policy: WsPolicy,
        fetch_timeout_ms: u64,
        order_timeout_ms: u64,
    ) -> Self {
        Self {
            read_client: HttpClientFactory::create_client(Duration::from_millis(fetch_timeout_ms)),
            write_client: HttpClientFactory::create_write_client(Duration::from_millis(
                order_timeout_ms,
            )),
            limits: VenueRateLimits::new(config.read_rate_per_s, config.write_rate_per_s),
            config,
            ws_policy,
            token: RwLock::new(None),
        }
    }

    async fn login(&self) -> Result<String, VenueError> {
        let url = format!("{}/login", self.config.base_url);
        let response = self
            .read_client
            .post(&url)
            .json(&serde_json::json!({
                "email": self.config.email,
                "password": self.config.password,
            }))
            .send()
            .await
            .map_err(|e| VenueError::Transient {
                detail: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => VenueError::Unauthorized {
                    venue: Venue::Kalshi,
                    detail: body,
                },
                _ => VenueError::Transient {
                    detail: format!("login status {status}: {body}"),
                },
            });
        }

        let parsed: LoginResponse = response.json().await.map_err(|e| VenueError::Transient {
            detail: format!("login decode: {e}"),
        })?;

        info!("Kalshi session established");
        *self.token.write().await = Some(parsed.token.clone());
        Ok(parsed.token)
    }

    async fn bearer(&self) -> Result<String, VenueError> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        self.login().await
    }

    /// Authenticated GET with one re-login on 401.
    async fn get_authed(&self, path: &str) -> Result<reqwest::Response, VenueError> {
        let url = format!("{}{}", self.config.base_url, path);
        for attempt in 0..2 {
            let token = self.bearer().await?;
            let response = self
                .read_client
                .get(&url)
                .bearer_auth(&token)
                .send()
                .await
                .map_err(|e| VenueError::Transient {
                    detail: e.to_string(),
                })?;

            if response.status().as_u16() == 401 && attempt == 0 {
                debug!("Kalshi token expired, re-authenticating");
                *self.token.write().await = None;
                continue;
            }
            return Ok(response);
        }
        unreachable!("auth loop returns on second attempt");
    }

    fn map_status(status: reqwest::StatusCode, body: &str, contract: &str) -> VenueError {
        match status.as_u16() {
            401 | 403 => VenueError::Unauthorized {
                venue: Venue::Kalshi,
                detail: body.to_string(),
            },
            404 => VenueError::NotFound {
                contract: contract.to_string(),
            },
            429 => VenueError::RateLimited {
                retry_after_secs: 1,
            },
            400 | 422 => VenueError::Fatal {
                detail: body.to_string(),
            },
            _ => VenueError::Transient {
                detail: format!("status {status}: {body}"),
            },
        }
    }

    /// Build the core book from the venue's two-sided yes/no layout.
    fn parse_book(contract: &str, raw: RawOrderbook) -> OrderBook {
        let mut bids: Vec<PriceLevel> = raw
            .yes
            .iter()
            .filter(|[price, qty]| *price > 0 && *qty > 0)
            .map(|[price, qty]| PriceLevel {
                price: cents_to_price(*price),
                size: Decimal::from(*qty),
            })
            .collect();

        // A resting no bid at p cents offers yes at (100 - p).
        let mut asks: Vec<PriceLevel> = raw
            .no
            .iter()
            .filter(|[price, qty]| *price > 0 && *price < CENTS && *qty > 0)
            .map(|[price, qty]| PriceLevel {
                price: cents_to_price(CENTS - *price),
                size: Decimal::from(*qty),
            })
            .collect();

        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));

        OrderBook {
            venue: Venue::Kalshi,
            contract: contract.to_string(),
            bids,
            asks,
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
impl VenueAdapter for KalshiAdapter {
    fn venue(&self) -> Venue {
        Venue::Kalshi
    }

    async fn get_order_book(&self, contract: &str) -> Result<OrderBook, VenueError> {
        self.limits.read.acquire().await;

        let response = self
            .get_authed(&format!("/markets/{contract}/orderbook"))
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &body, contract));
        }

        let parsed: OrderbookResponse =
            response.json().await.map_err(|e| VenueError::Transient {
                detail: format!("orderbook decode: {e}"),
            })?;
        Ok(Self::parse_book(contract, parsed.orderbook))
    }

    async fn place_fok(&self, order: FokOrder) -> FillResult {
        self.limits.write.acquire().await;

        let token = match self.bearer().await {
            Ok(t) => t,
            Err(e) => {
                // Could not even authenticate; nothing was sent.
                return FillResult::Rejected {
                    reason: format!("auth: {e}"),
                    order_id: None,
                };
            }
        };

        let action = match order.side {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        };
        let body = serde_json::json!({
            "ticker": order.contract,
            "action": action,
            "side": "yes",
            "type": "limit",
            "count": order.quantity,
            "yes_price": price_to_cents(order.price),
            "time_in_force": "fill_or_kill",
        });

        let url = format!("{}/portfolio/orders", self.config.base_url);
        let response = match self
            .write_client
            .post(&url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return FillResult::TransportError {
                    detail: e.to_string(),
                };
            }
        };

        let status = response.status();
        if status.is_server_error() {
            return FillResult::TransportError {
                detail: format!("status {status}"),
            };
        }
        if status.is_client_error() {
            let text = response.text().await.unwrap_or_default();
            return FillResult::Rejected {
                reason: format!("status {status}: {text}"),
                order_id: None,
            };
        }

        let parsed: OrderEnvelope = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                return FillResult::TransportError {
                    detail: format!("order decode: {e}"),
                };
            }
        };

        let raw = parsed.order;
        if raw.status == "executed" && raw.taker_fill_count == order.quantity as i64 {
            let fill_price = if raw.taker_fill_count > 0 {
                cents_to_price(raw.taker_fill_cost / raw.taker_fill_count)
            } else {
                order.price
            };
            FillResult::Filled {
                fill_price,
                fill_qty: raw.taker_fill_count as u64,
                fees: cents_to_price(raw.taker_fees),
                order_id: raw.order_id,
                ts: Utc::now(),
            }
        } else {
            debug!(status = %raw.status, fills = raw.taker_fill_count, "Kalshi FOK killed");
            FillResult::Rejected {
                reason: format!("order {}", raw.status),
                order_id: Some(raw.order_id),
            }
        }
    }

    async fn get_balances(&self) -> Result<Balances, VenueError> {
        self.limits.read.acquire().await;

        let response = self.get_authed("/portfolio/balance").await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &body, ""));
        }

        let parsed: BalanceResponse = response.json().await.map_err(|e| VenueError::Transient {
            detail: format!("balance decode: {e}"),
        })?;

        let balance = cents_to_price(parsed.balance);
        Ok(Balances {
            venue: Venue::Kalshi,
            available: balance,
            total: balance,
        })
    }

    async fn get_positions(&self) -> Result<Vec<VenuePosition>, VenueError> {
        self.limits.read.acquire().await;

        let response = self.get_authed("/portfolio/positions").await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &body, ""));
        }

        let parsed: PositionsResponse =
            response.json().await.map_err(|e| VenueError::Transient {
                detail: format!("positions decode: {e}"),
            })?;

        Ok(parsed
            .market_positions
            .into_iter()
            .filter(|p| p.position != 0)
            .map(|p| {
                let quantity = p.position.unsigned_abs();
                let avg_price = if quantity > 0 {
                    cents_to_price(p.market_exposure.abs() / quantity as i64)
                } else {
                    Decimal::ZERO
                };
                VenuePosition {
                    contract: p.ticker,
                    outcome: if p.position > 0 { Outcome::Yes } else { Outcome::No },
                    quantity,
                    avg_price,
                }
            })
            .collect())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), VenueError> {
        self.limits.write.acquire().await;

        let token = self.bearer().await?;
        let url = format!("{}/portfolio/orders/{order_id}", self.config.base_url);
        let response = self
            .write_client
            .delete(&url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| VenueError::Transient {
                detail: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(order_id, %status, "Kalshi cancel failed");
            return Err(Self::map_status(status, &text, ""));
        }
        Ok(())
    }

    async fn subscribe_books(
        &self,
        contracts: Vec<String>,
    ) -> Result<mpsc::Receiver<OrderBook>, VenueError> {
        let (tx, rx) = mpsc::channel(256);
        let payload = serde_json::json!({
            "id": 1,
            "cmd": "subscribe",
            "params": {
                "channels": ["orderbook_snapshot"],
                "market_tickers": contracts,
            },
        })
        .to_string();

        let ws_url = self.config.ws_url.clone();
        let policy = self.ws_policy.clone();
        tokio::spawn(async move {
            feed::run_book_feed(Venue::Kalshi, ws_url, payload, policy, tx, parse_ws_book).await;
        });

        Ok(rx)
    }
}

fn parse_ws_book(text: &str) -> Option<OrderBook> {
    #[derive(Deserialize)]
    struct WsMessage {
        #[serde(rename = "type")]
        kind: String,
        msg: WsSnapshot,
    }
    #[derive(Deserialize)]
    struct WsSnapshot {
        market_ticker: String,
        #[serde(default)]
        yes: Vec<[i64; 2]>,
        #[serde(default)]
        no: Vec<[i64; 2]>,
    }

    let parsed: WsMessage = serde_json::from_str(text).ok()?;
    if parsed.kind != "orderbook_snapshot" {
        return None;
    }
    Some(KalshiAdapter::parse_book(
        &parsed.msg.market_ticker,
        RawOrderbook {
            yes: parsed.msg.yes,
            no: parsed.msg.no,
        },
    ))
}
