//! Retry schedule: backoff curves per failure class and the per-attempt state machine.
//!
//! The schedule is pure. [`RetryPolicy::plan`] turns the outcome of one
//! physical attempt into an [`Attempt`] that says whether and when to try
//! again; the client owns the sleeping. This keeps the whole schedule
//! testable without a clock.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::outcome::{CallResult, Disposition, FailureClass};

/// Backoff curve between retries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Uses a fixed delay between retries.
    Fixed {
        #[serde(with = "duration_secs")]
        delay: Duration,
    },
    /// `base * factor^attempt`, capped at `max`, plus uniform `0..=jitter`.
    Exponential {
        #[serde(with = "duration_secs")]
        base: Duration,
        factor: f64,
        #[serde(with = "duration_secs")]
        max: Duration,
        #[serde(with = "duration_secs")]
        jitter: Duration,
    },
}

impl Backoff {
    /// Connection failures and timeouts: 0.3s doubling, up to 0.2s jitter.
    pub const fn transient() -> Self {
        Self::Exponential {
            base: Duration::from_millis(300),
            factor: 2.0,
            max: Duration::from_secs(10),
            jitter: Duration::from_millis(200),
        }
    }

    /// Server-busy and quota responses: 5s doubling, no jitter.
    pub const fn overload() -> Self {
        Self::Exponential {
            base: Duration::from_secs(5),
            factor: 2.0,
            max: Duration::from_secs(120),
            jitter: Duration::ZERO,
        }
    }

    /// Deterministic part of the delay for a 0-based attempt index.
    pub fn base_delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base, factor, max, ..
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let nanos = base.as_nanos() as f64 * factor.powi(exponent);
                let capped = nanos.min(max.as_nanos() as f64);
                if capped.is_finite() && capped >= 0.0 {
                    Duration::from_nanos(capped.round() as u64)
                } else {
                    max
                }
            }
        }
    }

    /// Delay for a 0-based attempt index, including jitter.
    pub fn delay(self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        match self {
            Self::Fixed { .. } => base,
            Self::Exponential { jitter, .. } => base + random_jitter(jitter),
        }
    }
}

pub(crate) fn random_jitter(upper: Duration) -> Duration {
    let upper_ms = u64::try_from(upper.as_millis()).unwrap_or(u64::MAX);
    if upper_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(fastrand::u64(0..=upper_ms))
}

/// Backoff curves for each retryable failure family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub transient: Backoff,
    pub overload: Backoff,
    /// Use the upstream `Retry-After` hint in place of the computed overload delay.
    pub honor_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            transient: Backoff::transient(),
            overload: Backoff::overload(),
            honor_retry_after: true,
        }
    }
}

/// One step of the retry state machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attempt {
    /// 0-based index of the physical attempt that just finished.
    pub index: u32,
    pub class: FailureClass,
    /// Wait before the next attempt; `None` when the loop must stop.
    pub next_delay: Option<Duration>,
}

impl Attempt {
    pub fn is_final(&self) -> bool {
        self.next_delay.is_none()
    }
}

impl RetryPolicy {
    /// Decide what follows the attempt described by `call`.
    ///
    /// `max_retries` counts additional attempts beyond the first, so attempt
    /// index `max_retries` is always final.
    pub fn plan(&self, call: &CallResult, max_retries: u32) -> Attempt {
        let index = call.attempt;
        let exhausted = index >= max_retries;
        let next_delay = match call.class.disposition() {
            Disposition::Done | Disposition::Terminal => None,
            _ if exhausted => None,
            Disposition::Transient => Some(self.transient.delay(index)),
            Disposition::Overload => Some(self.overload_delay(call)),
        };

        Attempt {
            index,
            class: call.class,
            next_delay,
        }
    }

    fn overload_delay(&self, call: &CallResult) -> Duration {
        match call.retry_after {
            Some(hint) if self.honor_retry_after => hint,
            _ => self.overload.delay(call.attempt),
        }
    }
}

pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
    }
}
