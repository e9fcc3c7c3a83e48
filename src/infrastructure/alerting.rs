//! Alerter implementations: structured-log sink and webhook fan-out.

use crate::domain::ports::{Alerter, Severity};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Always-available alerter that writes severity-tagged log lines.
pub struct LogAlerter;

#[async_trait]
impl Alerter for LogAlerter {
    async fn send(&self, severity: Severity, title: &str, body: &str) {
        match severity {
            Severity::Low | Severity::Medium => {
                info!(severity = %severity, title, body, "alert")
            }
            Severity::High => warn!(severity = %severity, title, body, "alert"),
            Severity::Critical | Severity::Fatal => {
                error!(severity = %severity, title, body, "alert")
            }
        }
    }
}

/// POSTs a JSON payload to a configured webhook (Slack/Discord-compatible
/// shape). Delivery failures are logged and dropped; alerting must never
/// block or fail the trading path.
pub struct WebhookAlerter {
    client: ClientWithMiddleware,
    url: String,
}

impl WebhookAlerter {
    pub fn new(client: ClientWithMiddleware, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl Alerter for WebhookAlerter {
    async fn send(&self, severity: Severity, title: &str, body: &str) {
        let payload = serde_json::json!({
            "severity": severity.to_string(),
            "title": title,
            "text": format!("[{severity}] {title}: {body}"),
        });

        match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!(status = %response.status(), "Alert webhook returned non-success");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to deliver alert webhook"),
        }
    }
}

/// Fans one alert out to several sinks.
pub struct CompositeAlerter {
    sinks: Vec<Arc<dyn Alerter>>,
}

impl CompositeAlerter {
    pub fn new(sinks: Vec<Arc<dyn Alerter>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl Alerter for CompositeAlerter {
    async fn send(&self, severity: Severity, title: &str, body: &str) {
        for sink in &self.sinks {
            sink.send(severity, title, body).await;
        }
    }
}
