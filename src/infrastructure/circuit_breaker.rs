//! Process-wide kill switch.
//!
//! Single writer, many readers. The flag itself lives in the state store's
//! snapshot; this type layers the failure taxonomy and auto-pause rules on
//! top and keeps the pause durable before the pausing caller proceeds.

use crate::config::BreakerEnvConfig;
use crate::domain::errors::FailureKind;
use crate::domain::ports::{Alerter, Severity};
use crate::domain::types::BreakerState;
use crate::infrastructure::state_store::StateStore;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct CircuitBreaker {
    store: Arc<StateStore>,
    alerter: Arc<dyn Alerter>,
    max_consecutive_failures: u32,
    max_asymmetric_executions: u32,
}

impl CircuitBreaker {
    pub fn new(
        store: Arc<StateStore>,
        alerter: Arc<dyn Alerter>,
        config: &BreakerEnvConfig,
    ) -> Self {
        Self {
            store,
            alerter,
            max_consecutive_failures: config.max_consecutive_failures,
            max_asymmetric_executions: config.max_asymmetric_executions,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.store.with_state(|s| s.cb.paused)
    }

    pub fn state(&self) -> BreakerState {
        self.store.breaker()
    }

    /// Pause all execution. Idempotent: a second pause keeps the first
    /// reason and timestamp. Durable before the caller proceeds.
    pub async fn pause(&self, reason: &str) {
        if self.is_paused() {
            info!(reason, "Circuit breaker already paused, keeping original reason");
            return;
        }

        let reason_owned = reason.to_string();
        let result = self
            .store
            .set_breaker_durable(move |cb| {
                if !cb.paused {
                    cb.paused = true;
                    cb.reason = Some(reason_owned.clone());
                    cb.paused_at = Some(Utc::now());
                }
            })
            .await;

        if let Err(e) = result {
            error!(error = %e, "Failed to persist circuit breaker pause");
        }

        error!(reason, "CIRCUIT BREAKER PAUSED, all execution blocked");
        self.alerter
            .send(
                Severity::Critical,
                "Circuit breaker paused",
                &format!("All execution blocked: {reason}"),
            )
            .await;
    }

    /// Clear the pause and all counters.
    pub async fn resume(&self) {
        let result = self
            .store
            .set_breaker_durable(|cb| {
                cb.paused = false;
                cb.reason = None;
                cb.paused_at = None;
                cb.consecutive_failures = 0;
                cb.asymmetric_count = 0;
            })
            .await;

        if let Err(e) = result {
            error!(error = %e, "Failed to persist circuit breaker resume");
        }

        info!("Circuit breaker resumed, counters cleared");
        self.alerter
            .send(Severity::Medium, "Circuit breaker resumed", "Execution re-enabled")
            .await;
    }

    /// Record a failure and evaluate the auto-pause rules.
    pub async fn record_failure(&self, kind: FailureKind) {
        match kind {
            FailureKind::ExecutionFailure => {
                let failures = self.store.update(|s| {
                    s.cb.consecutive_failures += 1;
                    s.cb.consecutive_failures
                });
                warn!(failures, limit = self.max_consecutive_failures, "Execution failure recorded");
                if failures >= self.max_consecutive_failures {
                    self.pause(&format!("{failures} consecutive execution failures"))
                        .await;
                }
            }
            FailureKind::AsymmetricExecution => {
                let count = self.store.update(|s| {
                    s.cb.asymmetric_count += 1;
                    s.cb.asymmetric_count
                });
                if count >= self.max_asymmetric_executions {
                    self.pause("asymmetric execution, unhedged position open")
                        .await;
                }
            }
            FailureKind::ConnectionLost => {
                self.pause("venue connection lost, reconnects exhausted").await;
            }
            FailureKind::DailyLossLimit => {
                self.pause("daily loss limit breached").await;
            }
            FailureKind::StateUnrecoverable => {
                self.pause("state persistence failing repeatedly").await;
                self.alerter
                    .send(
                        Severity::Fatal,
                        "State unrecoverable",
                        "Snapshot writes keep failing; durable state is stale",
                    )
                    .await;
            }
            // Throttled upstream by the scan loop; never a pause.
            FailureKind::RateLimitExceeded => {
                warn!("Venue rate limit hit, detector loop will slow down");
            }
        }
    }

    /// A successful execution resets the consecutive-failure streak only.
    pub fn record_success(&self) {
        self.store.update(|s| s.cb.consecutive_failures = 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::RecordingAlerter;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, Arc<StateStore>, Arc<RecordingAlerter>, CircuitBreaker) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(StateStore::load(dir.path().join("state.json")).unwrap());
        let alerter = Arc::new(RecordingAlerter::default());
        let breaker = CircuitBreaker::new(
            store.clone(),
            alerter.clone(),
            &BreakerEnvConfig {
                max_consecutive_failures: 3,
                max_asymmetric_executions: 1,
            },
        );
        (dir, store, alerter, breaker)
    }

    #[tokio::test]
    async fn pause_is_idempotent() {
        let (_dir, _store, _alerter, breaker) = fixture();

        breaker.pause("first reason").await;
        let first = breaker.state();
        breaker.pause("second reason").await;
        let second = breaker.state();

        assert!(second.paused);
        assert_eq!(second.reason, first.reason);
        assert_eq!(second.paused_at, first.paused_at);
        assert_eq!(second.reason.as_deref(), Some("first reason"));
    }

    #[tokio::test]
    async fn resume_clears_counters() {
        let (_dir, _store, _alerter, breaker) = fixture();

        breaker.record_failure(FailureKind::ExecutionFailure).await;
        breaker.record_failure(FailureKind::AsymmetricExecution).await;
        assert!(breaker.is_paused());

        breaker.resume().await;
        let state = breaker.state();
        assert!(!state.paused);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.asymmetric_count, 0);
        assert!(state.reason.is_none());
    }

    #[tokio::test]
    async fn consecutive_execution_failures_pause_at_threshold() {
        let (_dir, _store, _alerter, breaker) = fixture();

        breaker.record_failure(FailureKind::ExecutionFailure).await;
        breaker.record_failure(FailureKind::ExecutionFailure).await;
        assert!(!breaker.is_paused());

        breaker.record_failure(FailureKind::ExecutionFailure).await;
        assert!(breaker.is_paused());
    }

    #[tokio::test]
    async fn success_resets_streak() {
        let (_dir, _store, _alerter, breaker) = fixture();

        breaker.record_failure(FailureKind::ExecutionFailure).await;
        breaker.record_failure(FailureKind::ExecutionFailure).await;
        breaker.record_success();
        breaker.record_failure(FailureKind::ExecutionFailure).await;
        assert!(!breaker.is_paused());
    }

    #[tokio::test]
    async fn asymmetric_pauses_immediately() {
        let (_dir, _store, _alerter, breaker) = fixture();
        breaker.record_failure(FailureKind::AsymmetricExecution).await;
        assert!(breaker.is_paused());
    }

    #[tokio::test]
    async fn rate_limit_never_pauses() {
        let (_dir, _store, _alerter, breaker) = fixture();
        for _ in 0..10 {
            breaker.record_failure(FailureKind::RateLimitExceeded).await;
        }
        assert!(!breaker.is_paused());
    }

    #[tokio::test]
    async fn pause_survives_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        {
            let store = Arc::new(StateStore::load(&path).unwrap());
            let alerter = Arc::new(RecordingAlerter::default());
            let breaker = CircuitBreaker::new(
                store,
                alerter,
                &BreakerEnvConfig {
                    max_consecutive_failures: 3,
                    max_asymmetric_executions: 1,
                },
            );
            breaker.pause("manual").await;
        }

        let reloaded = StateStore::load(&path).unwrap();
        let cb = reloaded.breaker();
        assert!(cb.paused);
        assert_eq!(cb.reason.as_deref(), Some("manual"));
    }
}
