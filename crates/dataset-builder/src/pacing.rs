//! Outbound call pacing for the completion service.
//!
//! Two independent limits: a fixed gap between consecutive calls, and an
//! optional cap on calls per minute.

use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

pub struct CallPacer {
    delay: Duration,
    per_minute: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    last_call: Option<Instant>,
}

impl CallPacer {
    pub fn new(call_delay_ms: u64, max_calls_per_minute: Option<u32>) -> Self {
        let per_minute = max_calls_per_minute
            .and_then(NonZeroU32::new)
            .map(|cap| RateLimiter::direct(Quota::per_minute(cap)));
        Self {
            delay: Duration::from_millis(call_delay_ms),
            per_minute,
            last_call: None,
        }
    }

    /// No delay and no cap.
    pub fn unpaced() -> Self {
        Self::new(0, None)
    }

    /// Wait until the next call is allowed, then record it.
    pub async fn wait(&mut self) {
        if let Some(last) = self.last_call {
            sleep_until(last + self.delay).await;
        }
        if let Some(limiter) = &self.per_minute {
            limiter.until_ready().await;
        }
        self.last_call = Some(Instant::now());
    }
}
