//! Shared WebSocket book-feed loop.
//!
//! One task per venue connection: connect, subscribe, pump parsed books
//! into the bounded channel. Reconnects with exponential backoff; when the
//! policy is exhausted the task drops the sender, and the closed channel is
//! the caller's `ConnectionLost` signal.

use crate::config::WsPolicy;
use crate::domain::types::{OrderBook, Venue};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

/// Run the feed until the receiver is dropped or reconnects are exhausted.
pub async fn run_book_feed<F>(
    venue: Venue,
    ws_url: String,
    subscribe_payload: String,
    policy: WsPolicy,
    tx: Sender<OrderBook>,
    parse: F,
) where
    F: Fn(&str) -> Option<OrderBook> + Send + Sync + 'static,
{
    if Url::parse(&ws_url).is_err() {
        error!(%venue, ws_url, "Malformed WebSocket URL, feed not started");
        return;
    }

    let mut backoff = policy.initial_backoff;
    let mut attempts: u32 = 0;

    loop {
        match connect_and_stream(venue, &ws_url, &subscribe_payload, &policy, &tx, &parse).await {
            StreamEnd::ReceiverDropped => {
                info!(%venue, "Book feed receiver dropped, stopping");
                return;
            }
            StreamEnd::Disconnected => {
                attempts += 1;
                if attempts >= policy.max_attempts {
                    error!(%venue, attempts, "Book feed reconnects exhausted");
                    return;
                }
                // Jitter keeps both venue feeds from reconnecting in
                // lockstep after a shared network blip.
                let jitter = Duration::from_millis(rand::rng().random_range(0..250));
                warn!(
                    %venue,
                    attempt = attempts,
                    backoff_s = backoff.as_secs(),
                    "Book feed disconnected, reconnecting"
                );
                tokio::time::sleep(backoff + jitter).await;
                backoff = (backoff * 2).min(policy.backoff_cap);
            }
            StreamEnd::Connected => {
                // A healthy session resets the reconnect counter. Still wait
                // one interval so a flapping server cannot hot-loop us.
                attempts = 0;
                backoff = policy.initial_backoff;
                tokio::time::sleep(policy.initial_backoff).await;
            }
        }
    }
}

enum StreamEnd {
    /// Session was healthy for at least one message before dropping.
    Connected,
    Disconnected,
    ReceiverDropped,
}

async fn connect_and_stream<F>(
    venue: Venue,
    ws_url: &str,
    subscribe_payload: &str,
    policy: &WsPolicy,
    tx: &Sender<OrderBook>,
    parse: &F,
) -> StreamEnd
where
    F: Fn(&str) -> Option<OrderBook>,
{
    let (ws_stream, _) = match connect_async(ws_url).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(%venue, error = %e, "WebSocket connect failed");
            return StreamEnd::Disconnected;
        }
    };
    info!(%venue, "WebSocket connected");

    let (mut write, mut read) = ws_stream.split();

    if let Err(e) = write
        .send(Message::Text(subscribe_payload.to_string().into()))
        .await
    {
        warn!(%venue, error = %e, "Failed to send subscription");
        return StreamEnd::Disconnected;
    }

    let mut delivered = false;
    let mut ping_interval = tokio::time::interval(policy.heartbeat_timeout / 2);
    ping_interval.tick().await;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if write.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            msg = tokio::time::timeout(policy.heartbeat_timeout, read.next()) => {
                let msg = match msg {
                    // Heartbeat gap forces a reconnect.
                    Err(_) => {
                        warn!(%venue, "Heartbeat gap exceeded, forcing reconnect");
                        break;
                    }
                    Ok(None) => break,
                    Ok(Some(m)) => m,
                };

                match msg {
                    Ok(Message::Text(text)) => {
                        if let Some(book) = parse(&text) {
                            delivered = true;
                            if tx.send(book).await.is_err() {
                                return StreamEnd::ReceiverDropped;
                            }
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Ok(Message::Close(frame)) => {
                        debug!(%venue, ?frame, "WebSocket closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(%venue, error = %e, "WebSocket read error");
                        break;
                    }
                }
            }
        }
    }

    if delivered {
        StreamEnd::Connected
    } else {
        StreamEnd::Disconnected
    }
}
