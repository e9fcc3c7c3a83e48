//! Token-bucket request shaping, one bucket per (venue, read|write) class.

use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Asynchronous token bucket. `acquire` waits until a token is available
/// rather than failing, so callers shape their request rate instead of
/// handling refusals.
pub struct TokenBucket {
    refill_per_sec: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(refill_per_sec: f64) -> Self {
        // Burst capacity of one second's worth of tokens.
        let capacity = refill_per_sec.max(1.0);
        Self {
            refill_per_sec,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, sleeping until the bucket refills if necessary.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let elapsed = state.last_refill.elapsed().as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = Instant::now();

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    Some(Duration::from_secs_f64(deficit / self.refill_per_sec))
                }
            };

            match wait {
                None => return,
                Some(delay) => {
                    debug!(delay_ms = delay.as_millis() as u64, "Rate limit, waiting for token");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Read and write buckets for one venue.
pub struct VenueRateLimits {
    pub read: TokenBucket,
    pub write: TokenBucket,
}

impl VenueRateLimits {
    pub fn new(read_rate_per_s: f64, write_rate_per_s: f64) -> Self {
        Self {
            read: TokenBucket::new(read_rate_per_s),
            write: TokenBucket::new(write_rate_per_s),
        }
    }
}
