//! Ban-avoidance breaker for one provider credential.
//!
//! Server-busy (5xx) and quota (429) responses from these upstreams come in
//! bursts shortly before a credential gets suspended. The breaker counts them;
//! at `failure_threshold` it imposes a mandatory cooldown on every client that
//! shares it and resets the count. Any success resets the count as well.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

/// Breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 2,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Snapshot of the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CircuitState {
    pub consecutive_failures: u32,
    pub cooldown_until: Option<Instant>,
}

impl CircuitState {
    pub fn cooling_down(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }
}

/// What the caller must wait after an overload response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Ordinary retry backoff.
    Backoff(Duration),
    /// Threshold crossed: backoff plus the forced cooldown.
    Cooldown(Duration),
}

impl Escalation {
    pub const fn wait(self) -> Duration {
        match self {
            Self::Backoff(wait) | Self::Cooldown(wait) => wait,
        }
    }
}

/// Thread-safe breaker shared by all clients of one provider.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitState>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CircuitState::default()),
        }
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    /// Time left on an active cooldown.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let now = Instant::now();
        let inner = self.lock_inner();
        inner
            .cooldown_until
            .filter(|until| *until > now)
            .map(|until| until.saturating_duration_since(now))
    }

    pub fn record_success(&self) {
        let mut inner = self.lock_inner();
        inner.consecutive_failures = 0;
    }

    /// Count an overload response whose ordinary retry delay is `backoff`.
    pub fn record_overload(&self, backoff: Duration) -> Escalation {
        let now = Instant::now();
        let mut inner = self.lock_inner();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        if inner.consecutive_failures < self.config.failure_threshold {
            return Escalation::Backoff(backoff);
        }

        let wait = backoff + self.config.cooldown;
        let until = now + wait;
        inner.cooldown_until =
            Some(inner.cooldown_until.map_or(until, |current| current.max(until)));
        inner.consecutive_failures = 0;
        warn!(
            threshold = self.config.failure_threshold,
            cooldown_secs = self.config.cooldown.as_secs(),
            "consecutive overload responses; pausing all requests on this credential \
             to avoid a ban. If this repeats, wait a few minutes before rerunning and \
             lower max_requests_per_second"
        );
        Escalation::Cooldown(wait)
    }

    pub fn state(&self) -> CircuitState {
        *self.lock_inner()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock_inner().consecutive_failures
    }

    fn lock_inner(&self) -> MutexGuard<'_, CircuitState> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!("circuit breaker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
