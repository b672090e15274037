//! Sliding-window request throttle with a fixed retry schedule for
//! rate-limited failures.
//!
//! Dispatch order is FIFO: callers queue on a fair async mutex and hold it
//! until their slot opens, so no later request can overtake an earlier one.

use crate::error::{EmbeddingError, EmbeddingResult};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const WINDOW: Duration = Duration::from_secs(60);

/// Delays applied after successive rate-limited failures; a failure after
/// the last entry surfaces `rate_limit_exhausted`.
const RETRY_SCHEDULE: [Duration; 4] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
];

/// Sliding-window counter over the last 60 seconds. `None` = unlimited.
pub struct RateLimiter {
    rpm: Option<u32>,
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(rpm: Option<u32>) -> Self {
        Self {
            rpm,
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// A limiter that never throttles, for local providers.
    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Wait for a dispatch slot and record the dispatch timestamp. The lock
    /// is held while waiting, which is what makes dispatch FIFO.
    async fn acquire(&self) {
        let Some(rpm) = self.rpm else { return };
        let mut window = self.window.lock().await;
        loop {
            let now = Instant::now();
            while window.front().is_some_and(|t| now.duration_since(*t) >= WINDOW) {
                window.pop_front();
            }
            if window.len() < rpm as usize {
                window.push_back(now);
                return;
            }
            let oldest = *window.front().expect("window is at capacity");
            let wait = WINDOW.saturating_sub(now.duration_since(oldest));
            tokio::time::sleep(wait).await;
        }
    }

    /// Run `operation` under the limit, retrying rate-limited failures on
    /// the fixed schedule.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> EmbeddingResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EmbeddingResult<T>>,
    {
        let mut attempt = 0usize;
        loop {
            self.acquire().await;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_rate_limit() => {
                    if attempt >= RETRY_SCHEDULE.len() {
                        return Err(EmbeddingError::RateLimitExhausted {
                            attempts: attempt + 1,
                        });
                    }
                    let delay = RETRY_SCHEDULE[attempt];
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_secs = delay.as_secs(),
                        "provider rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
