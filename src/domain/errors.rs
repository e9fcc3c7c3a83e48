use crate::domain::types::Venue;
use thiserror::Error;

/// Errors surfaced by venue adapters.
#[derive(Debug, Error)]
pub enum VenueError {
    #[error("transient venue error: {detail}")]
    Transient { detail: String },

    #[error("unauthorized on {venue}: {detail}")]
    Unauthorized { venue: Venue, detail: String },

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("contract not found: {contract}")]
    NotFound { contract: String },

    #[error("fatal venue error: {detail}")]
    Fatal { detail: String },
}

impl VenueError {
    /// Whether the read-retry policy may attempt this call again.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            VenueError::Transient { .. } | VenueError::RateLimited { .. }
        )
    }
}

/// Failure taxonomy consumed by the circuit breaker and alerter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// An execution attempt failed before or during firing in a way that
    /// left no position behind.
    ExecutionFailure,
    /// One leg filled and the other did not, or could not be confirmed.
    /// Leaves an unhedged position; requires a human.
    AsymmetricExecution,
    /// WebSocket reconnection exhausted.
    ConnectionLost,
    /// Daily realized loss breached the configured limit.
    DailyLossLimit,
    /// Hard venue rate limit; throttles detection, never pauses.
    RateLimitExceeded,
    /// Repeated state snapshot I/O failure.
    StateUnrecoverable,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::ExecutionFailure => "execution_failure",
            FailureKind::AsymmetricExecution => "asymmetric_execution",
            FailureKind::ConnectionLost => "connection_lost",
            FailureKind::DailyLossLimit => "daily_loss_limit",
            FailureKind::RateLimitExceeded => "rate_limit_exceeded",
            FailureKind::StateUnrecoverable => "state_unrecoverable",
        };
        write!(f, "{s}")
    }
}
