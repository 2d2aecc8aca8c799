//! Sliding-window request limiter.
//!
//! Keeps the timestamps of requests issued in the trailing window. A caller
//! that would push the count past `capacity` sleeps until the oldest entry
//! leaves the window, then re-checks. The lock is never held across a sleep.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::retry::random_jitter;

/// Default spread added to each wait so unblocked callers don't fire together.
pub const DEFAULT_JITTER: Duration = Duration::from_millis(30);

/// Process-wide request-rate gate for one provider credential.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: usize,
    window: Duration,
    jitter: Duration,
    issued: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// `capacity` requests per rolling second. A capacity of zero is treated as one.
    pub fn per_second(capacity: u32) -> Self {
        Self::new(capacity, Duration::from_secs(1))
    }

    pub fn new(capacity: u32, window: Duration) -> Self {
        let capacity = usize::try_from(capacity.max(1)).unwrap_or(usize::MAX);
        Self {
            capacity,
            window,
            jitter: DEFAULT_JITTER,
            issued: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Wait until a request may be issued, then record it.
    pub async fn acquire(&self) {
        loop {
            let wait = match self.try_acquire() {
                Ok(()) => return,
                Err(wait) => wait,
            };

            let wait = wait + random_jitter(self.jitter);
            debug!(
                wait_ms = wait.as_millis() as u64,
                capacity = self.capacity,
                "rate limiter saturated; waiting for window to slide"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Record a request if the window has room, otherwise return how long
    /// until the oldest recorded request leaves the window.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut issued = self.lock_issued();
        self.prune(&mut issued, now);

        if issued.len() < self.capacity {
            issued.push_back(now);
            return Ok(());
        }

        let oldest = issued.front().copied().unwrap_or(now);
        let age = now.saturating_duration_since(oldest);
        Err(self.window.saturating_sub(age))
    }

    /// Requests recorded inside the current window.
    pub fn in_window(&self) -> usize {
        let now = Instant::now();
        let mut issued = self.lock_issued();
        self.prune(&mut issued, now);
        issued.len()
    }

    fn prune(&self, issued: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = issued.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                issued.pop_front();
            } else {
                break;
            }
        }
    }

    fn lock_issued(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        self.issued.lock().unwrap_or_else(|poisoned| {
            warn!("rate limiter mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
