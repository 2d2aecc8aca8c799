use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

use crate::provider_policy::LongWindowQuota;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Non-blocking guard for a provider's long-window allowance (e.g. a daily cap).
///
/// The per-second [`crate::RateLimiter`] keeps bursts legal; this guard stops
/// a large batch from draining the daily budget. Exhaustion is reported, not
/// waited out.
pub struct QuotaGuard {
    limiter: DirectRateLimiter,
    clock: DefaultClock,
    quota: LongWindowQuota,
}

impl std::fmt::Debug for QuotaGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaGuard").field("quota", &self.quota).finish()
    }
}

impl QuotaGuard {
    pub fn new(quota: LongWindowQuota) -> Self {
        Self {
            limiter: RateLimiter::direct(quota_from_window(quota)),
            clock: DefaultClock::default(),
            quota,
        }
    }

    pub fn quota(&self) -> LongWindowQuota {
        self.quota
    }

    /// Spend one unit, or return how long until one is available.
    pub fn check(&self) -> Result<(), Duration> {
        self.limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }
}

fn quota_from_window(quota: LongWindowQuota) -> Quota {
    let burst = NonZeroU32::new(quota.limit.max(1)).unwrap_or(NonZeroU32::MIN);
    let seconds_per_cell = (quota.window.as_secs_f64() / f64::from(burst.get())).max(0.001);

    // A positive period always yields a quota; per_second(1) is unreachable.
    Quota::with_period(Duration::from_secs_f64(seconds_per_cell))
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
        .allow_burst(burst)
}
