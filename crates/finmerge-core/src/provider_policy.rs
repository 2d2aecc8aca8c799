use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryPolicy;
use crate::ProviderId;

/// Transport limits and retry behaviour for one provider credential.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPolicy {
    pub provider_id: ProviderId,
    pub base_url: String,
    /// Upstream's published per-second ceiling, for reference in logs.
    pub documented_tps: u32,
    /// Limiter capacity; kept below `documented_tps` for clock skew and parallel instances.
    pub max_requests_per_second: u32,
    /// Long-window allowance (per `quota_window`), if the provider publishes one.
    pub quota: Option<LongWindowQuota>,
    pub max_retries: u32,
    pub retry: RetryPolicy,
    pub circuit: CircuitBreakerConfig,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LongWindowQuota {
    pub window: Duration,
    pub limit: u32,
}

impl ProviderPolicy {
    pub fn kis_default() -> Self {
        Self {
            provider_id: ProviderId::Kis,
            base_url: String::from("https://openapi.koreainvestment.com:9443"),
            documented_tps: 10,
            max_requests_per_second: 8,
            quota: None,
            max_retries: 3,
            retry: RetryPolicy::default(),
            circuit: CircuitBreakerConfig::default(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn dart_default() -> Self {
        Self {
            provider_id: ProviderId::Dart,
            base_url: String::from("https://opendart.fss.or.kr"),
            documented_tps: 10,
            max_requests_per_second: 5,
            quota: Some(LongWindowQuota {
                window: Duration::from_secs(24 * 60 * 60),
                limit: 20_000,
            }),
            max_retries: 3,
            retry: RetryPolicy::default(),
            circuit: CircuitBreakerConfig::default(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn default_for(provider_id: ProviderId) -> Self {
        match provider_id {
            ProviderId::Kis => Self::kis_default(),
            ProviderId::Dart => Self::dart_default(),
        }
    }
}
