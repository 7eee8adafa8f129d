//! Minimum-spacing rate limiter for outbound calls.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

/// Spaces calls at least `min_interval` apart. Callers are delayed, never
/// rejected.
///
/// Clones share the same schedule.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    name: &'static str,
    min_interval: Duration,
    last_call: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    pub fn new(name: &'static str, min_interval: Duration) -> Self {
        Self {
            name,
            min_interval,
            last_call: Arc::new(Mutex::new(None)),
        }
    }

    /// Limiter allowing at most `calls_per_second` calls.
    pub fn per_second(name: &'static str, calls_per_second: u32) -> Self {
        let interval = Duration::from_secs(1) / calls_per_second.max(1);
        Self::new(name, interval)
    }

    #[cfg(test)]
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the next call is allowed, then claim the slot.
    pub async fn acquire(&self) {
        // Held across the sleep so concurrent callers queue in order.
        let mut last_call = self.last_call.lock().await;

        if let Some(last) = *last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(limiter = self.name, wait_ms = wait.as_millis() as u64, "Rate limiting");
                tokio::time::sleep(wait).await;
            }
        }

        *last_call = Some(Instant::now());
    }
}
