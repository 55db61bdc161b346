//! Per-source call spacing.
//!
//! Each source gets a fixed cooldown between calls. Callers reserve the next
//! free slot under a short lock and then sleep outside it, so only the task
//! that must wait is suspended and concurrent callers queue up in order.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Minimum-interval limiter for one upstream source.
#[derive(Debug)]
pub struct RateLimiter {
    /// Name for logging
    name: String,
    /// Required gap between two calls
    min_interval: Duration,
    /// Earliest instant the next call may start
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a limiter enforcing `min_interval` between calls.
    pub fn new(name: impl Into<String>, min_interval: Duration) -> Self {
        Self {
            name: name.into(),
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Create from a millisecond delay as found in config.
    pub fn from_millis(name: impl Into<String>, millis: u64) -> Self {
        Self::new(name, Duration::from_millis(millis))
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until this caller's slot arrives.
    pub async fn acquire(&self) {
        let wait = self.reserve();
        if wait.is_zero() {
            return;
        }

        debug!(
            limiter = %self.name,
            wait_ms = wait.as_millis() as u64,
            "Cooling down before next call"
        );
        tokio::time::sleep(wait).await;
    }

    /// Claim the next slot and return how long until it starts.
    fn reserve(&self) -> Duration {
        let now = Instant::now();
        let mut next = match self.next_slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let slot = match *next {
            Some(at) if at > now => at,
            _ => now,
        };
        *next = Some(slot + self.min_interval);
        slot - now
    }
}
