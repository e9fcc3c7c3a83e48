//! Polymarket CLOB adapter.
//!
//! Prices arrive as decimal strings already on the [0, 1] scale. Order
//! placement is HMAC-SHA256 signed. A venue-confirmed kill maps to
//! `Rejected`; anything that dies in transit maps to `TransportError` and
//! is the engine's problem to reconcile.

use crate::config::{PolymarketConfig, WsPolicy};
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
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use sha2::Sha256;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub struct PolymarketAdapter {
    read_client: ClientWithMiddleware,
    write_client: ClientWithMiddleware,
    config: PolymarketConfig,
    ws_policy: WsPolicy,
    limits: VenueRateLimits,
}

#[derive(Debug, Deserialize)]
struct BookResponse {
    #[serde(default)]
    bids: Vec<RawLevel>,
    #[serde(default)]
    asks: Vec<RawLevel>,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLevel {
    price: String,
    size: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    status: String,
    #[serde(rename = "orderID", default)]
    order_id: Option<String>,
    #[serde(rename = "errorMsg", default)]
    error_msg: Option<String>,
    #[serde(rename = "takerFees", default)]
    taker_fees: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    #[serde(default)]
    available: String,
    #[serde(default)]
    total: String,
}

#[derive(Debug, Deserialize)]
struct PositionEntry {
    #[serde(rename = "tokenId")]
    token_id: String,
    size: String,
    #[serde(rename = "avgPrice", default)]
    avg_price: String,
    #[serde(default)]
    outcome: String,
}

impl PolymarketAdapter {
    pub fn new(config: PolymarketConfig, ws_policy: WsPolicy, fetch_timeout_ms: u64, order_timeout_ms: u64) -> Self {
        Self {
            read_client: HttpClientFactory::create_client(Duration::from_millis(fetch_timeout_ms)),
            write_client: HttpClientFactory::create_write_client(Duration::from_millis(
                order_timeout_ms,
            )),
            limits: VenueRateLimits::new(config.read_rate_per_s, config.write_rate_per_s),
            config,
            ws_policy,
        }
    }

    /// HMAC-SHA256 over `{timestamp}{method}{path}{body}`, hex encoded.
    fn sign(&self, timestamp: i64, method: &str, path: &str, body: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;

        let mut mac = HmacSha256::new_from_slice(self.config.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(format!("{timestamp}{method}{path}{body}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn auth_headers(
        &self,
        request: reqwest_middleware::RequestBuilder,
        method: &str,
        path: &str,
        body: &str,
    ) -> reqwest_middleware::RequestBuilder {
        let timestamp = Utc::now().timestamp();
        request
            .header("POLY-API-KEY", &self.config.api_key)
            .header("POLY-PASSPHRASE", &self.config.api_passphrase)
            .header("POLY-TIMESTAMP", timestamp.to_string())
            .header("POLY-SIGNATURE", self.sign(timestamp, method, path, body))
    }

    fn map_read_error(e: reqwest_middleware::Error) -> VenueError {
        VenueError::Transient {
            detail: e.to_string(),
        }
    }

    fn map_status(status: reqwest::StatusCode, body: &str, contract: &str) -> VenueError {
        match status.as_u16() {
            401 | 403 => VenueError::Unauthorized {
                venue: Venue::Polymarket,
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

    fn parse_book(contract: &str, response: BookResponse) -> OrderBook {
        let parse_levels = |raw: Vec<RawLevel>| -> Vec<PriceLevel> {
            raw.into_iter()
                .filter_map(|l| {
                    Some(PriceLevel {
                        price: Decimal::from_str(&l.price).ok()?,
                        size: Decimal::from_str(&l.size).ok()?,
                    })
                })
                .collect()
        };

        let mut bids = parse_levels(response.bids);
        let mut asks = parse_levels(response.asks);
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));

        let timestamp = response
            .timestamp
            .and_then(|t| t.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);

        OrderBook {
            venue: Venue::Polymarket,
            contract: contract.to_string(),
            bids,
            asks,
            timestamp,
        }
    }
}

#[async_trait]
impl VenueAdapter for PolymarketAdapter {
    fn venue(&self) -> Venue {
        Venue::Polymarket
    }

    async fn get_order_book(&self, contract: &str) -> Result<OrderBook, VenueError> {
        self.limits.read.acquire().await;

        let url = format!("{}/book?token_id={}", self.config.base_url, contract);
        let response = self
            .read_client
            .get(&url)
            .send()
            .await
            .map_err(Self::map_read_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &body, contract));
        }

        let book: BookResponse = response.json().await.map_err(|e| VenueError::Transient {
            detail: format!("book decode: {e}"),
        })?;
        Ok(Self::parse_book(contract, book))
    }

    async fn place_fok(&self, order: FokOrder) -> FillResult {
        self.limits.write.acquire().await;

        let side = match order.side {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        };
        let body = serde_json::json!({
            "order": {
                "tokenID": order.contract,
                "side": side,
                "price": order.price.to_string(),
                "size": order.quantity.to_string(),
                "orderType": "FOK",
            },
        })
        .to_string();

        let path = "/order";
        let url = format!("{}{}", self.config.base_url, path);
        let request = self
            .write_client
            .post(&url)
            .header("Content-Type", "application/json")
            .body(body.clone());
        let request = self.auth_headers(request, "POST", path, &body);

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                // The order may have reached the venue before the line died.
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
            // The venue parsed and refused the request; no fill happened.
            let body = response.text().await.unwrap_or_default();
            return FillResult::Rejected {
                reason: format!("status {status}: {body}"),
                order_id: None,
            };
        }

        let parsed: OrderResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                return FillResult::TransportError {
                    detail: format!("order decode: {e}"),
                };
            }
        };

        if parsed.success && parsed.status == "matched" {
            FillResult::Filled {
                fill_price: order.price,
                fill_qty: order.quantity,
                fees: parsed
                    .taker_fees
                    .and_then(|f| Decimal::from_str(&f).ok())
                    .unwrap_or(Decimal::ZERO),
                order_id: parsed.order_id.unwrap_or_default(),
                ts: Utc::now(),
            }
        } else {
            debug!(status = %parsed.status, "Polymarket FOK not matched");
            FillResult::Rejected {
                reason: parsed
                    .error_msg
                    .unwrap_or_else(|| format!("order {}", parsed.status)),
                order_id: parsed.order_id,
            }
        }
    }

    async fn get_balances(&self) -> Result<Balances, VenueError> {
        self.limits.read.acquire().await;

        let path = "/balance";
        let url = format!("{}{}", self.config.base_url, path);
        let request = self.read_client.get(&url);
        let request = self.auth_headers(request, "GET", path, "");

        let response = request.send().await.map_err(Self::map_read_error)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &body, ""));
        }

        let parsed: BalanceResponse = response.json().await.map_err(|e| VenueError::Transient {
            detail: format!("balance decode: {e}"),
        })?;

        Ok(Balances {
            venue: Venue::Polymarket,
            available: Decimal::from_str(&parsed.available).unwrap_or_default(),
            total: Decimal::from_str(&parsed.total).unwrap_or_default(),
        })
    }

    async fn get_positions(&self) -> Result<Vec<VenuePosition>, VenueError> {
        self.limits.read.acquire().await;

        let path = "/positions";
        let url = format!("{}{}", self.config.base_url, path);
        let request = self.read_client.get(&url);
        let request = self.auth_headers(request, "GET", path, "");

        let response = request.send().await.map_err(Self::map_read_error)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &body, ""));
        }

        let entries: Vec<PositionEntry> =
            response.json().await.map_err(|e| VenueError::Transient {
                detail: format!("positions decode: {e}"),
            })?;

        Ok(entries
            .into_iter()
            .filter_map(|e| {
                let quantity = Decimal::from_str(&e.size).ok()?;
                if quantity <= Decimal::ZERO {
                    return None;
                }
                Some(VenuePosition {
                    contract: e.token_id,
                    outcome: if e.outcome.eq_ignore_ascii_case("no") {
                        Outcome::No
                    } else {
                        Outcome::Yes
                    },
                    quantity: quantity.trunc().to_u64().unwrap_or(0),
                    avg_price: Decimal::from_str(&e.avg_price).unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), VenueError> {
        self.limits.write.acquire().await;

        let path = "/order";
        let url = format!("{}{}", self.config.base_url, path);
        let body = serde_json::json!({ "orderID": order_id }).to_string();
        let request = self.write_client.delete(&url).body(body.clone());
        let request = self.auth_headers(request, "DELETE", path, &body);

        let response = request.send().await.map_err(Self::map_read_error)?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(order_id, %status, "Polymarket cancel failed");
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
            "type": "market",
            "assets_ids": contracts,
        })
        .to_string();

        let ws_url = self.config.ws_url.clone();
        let policy = self.ws_policy.clone();
        tokio::spawn(async move {
            feed::run_book_feed(
                Venue::Polymarket,
                ws_url,
                payload,
                policy,
                tx,
                parse_ws_book,
            )
            .await;
        });

        Ok(rx)
    }
}

/// Parse a `book` event from the market channel.
fn parse_ws_book(text: &str) -> Option<OrderBook> {
    #[derive(Deserialize)]
    struct WsBook {
        event_type: String,
        asset_id: String,
        #[serde(default)]
        bids: Vec<RawLevel>,
        #[serde(default)]
        asks: Vec<RawLevel>,
        #[serde(default)]
        timestamp: Option<String>,
    }

    let parsed: WsBook = serde_json::from_str(text).ok()?;
    if parsed.event_type != "book" {
        return None;
    }
    Some(PolymarketAdapter::parse_book(
        &parsed.asset_id,
        BookResponse {
            bids: parsed.bids,
            asks: parsed.asks,
            timestamp: parsed.timestamp,
        },
    ))
}
