//! Retrying provider client.
//!
//! Every physical attempt takes a rate-limiter slot outside any shared
//! cooldown, checks the long-window quota and then hands the response to
//! [`crate::payload::decode`]. A slot granted while a cooldown started is
//! discarded and the attempt waits again. The retry schedule comes from
//! [`RetryPolicy::plan`]; overload responses are also reported to the shared
//! [`CircuitBreaker`], which may stretch the wait into a forced cooldown.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::circuit_breaker::{CircuitBreaker, Escalation};
use crate::http_client::{HttpClient, HttpErrorKind};
use crate::operation::{FetchTask, Operation, ProviderEndpoint};
use crate::outcome::{CallResult, Disposition, FailureClass, FetchFailure, FetchOutcome};
use crate::payload::{decode, Payload};
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;
use crate::throttling::QuotaGuard;
use crate::ProviderId;

/// HTTP client for one provider that retries, throttles and backs off.
///
/// Cheap to clone; clones share the limiter, breaker and quota guard.
#[derive(Clone)]
pub struct ResilientClient {
    http: Arc<dyn HttpClient>,
    endpoint: ProviderEndpoint,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    quota: Option<Arc<QuotaGuard>>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("provider", &self.endpoint.provider)
            .field("base_url", &self.endpoint.base_url)
            .field("limiter", &self.limiter)
            .field("breaker", &self.breaker.state())
            .field("quota", &self.quota)
            .finish()
    }
}

impl ResilientClient {
    pub fn new(
        http: Arc<dyn HttpClient>,
        endpoint: ProviderEndpoint,
        limiter: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            http,
            endpoint,
            limiter,
            breaker,
            quota: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_quota(mut self, quota: Arc<QuotaGuard>) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn provider(&self) -> ProviderId {
        self.endpoint.provider
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run one task through [`Self::send`] and tag the result with it.
    pub async fn fetch(&self, task: &FetchTask) -> FetchOutcome<Payload> {
        let result = self.send(&task.operation, task.max_retries).await;
        FetchOutcome::new(task.clone(), result, 1)
    }

    /// Perform `operation` with at most `max_retries` additional attempts.
    pub async fn send(
        &self,
        operation: &Operation,
        max_retries: u32,
    ) -> Result<Payload, FetchFailure> {
        let provider = self.endpoint.provider;
        if operation.provider != provider {
            return Err(FetchFailure::task_failed(format!(
                "{} operation {} was routed to the {provider} client",
                operation.provider, operation.path
            )));
        }

        let mut attempt = 0_u32;
        loop {
            self.admit().await;

            if let Some(quota) = &self.quota {
                if let Err(wait) = quota.check() {
                    warn!(
                        %provider,
                        retry_in_mins = wait.as_secs() / 60,
                        "long-window request allowance exhausted"
                    );
                    return Err(FetchFailure::new(
                        FailureClass::QuotaExhausted,
                        format!(
                            "{provider} request allowance is spent; temporarily unavailable, \
                             try again in about {} minutes",
                            wait.as_secs().div_ceil(60)
                        ),
                    )
                    .with_attempts(attempt));
                }
            }

            let call = match self.attempt_once(operation, attempt).await {
                Ok(payload) => {
                    self.breaker.record_success();
                    debug!(%provider, path = %operation.path, attempt, "request succeeded");
                    return Ok(payload);
                }
                Err(call) => call,
            };

            let plan = self.retry.plan(&call, max_retries);
            let wait = match call.class.disposition() {
                Disposition::Overload => {
                    let escalation = self
                        .breaker
                        .record_overload(plan.next_delay.unwrap_or(Duration::ZERO));
                    if let Escalation::Cooldown(wait) = escalation {
                        warn!(
                            %provider,
                            cooldown_mins = wait.as_secs().div_ceil(60),
                            "provider is shedding load; wait a few minutes before rerunning \
                             and consider lowering max_requests_per_second"
                        );
                    }
                    plan.next_delay.map(|_| escalation.wait())
                }
                _ => plan.next_delay,
            };

            let Some(wait) = wait else {
                if call.class.disposition() == Disposition::Terminal {
                    debug!(
                        %provider,
                        path = %operation.path,
                        class = %call.class,
                        "terminal failure"
                    );
                } else {
                    warn!(
                        %provider,
                        path = %operation.path,
                        class = %call.class,
                        attempts = attempt + 1,
                        "retry budget exhausted"
                    );
                }
                return Err(call.into_failure());
            };

            info!(
                %provider,
                path = %operation.path,
                attempt,
                class = %call.class,
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                "retrying request"
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }

    async fn attempt_once(
        &self,
        operation: &Operation,
        attempt: u32,
    ) -> Result<Payload, CallResult> {
        let request = self.endpoint.request(operation);
        debug!(target_path = request.log_target(), attempt, "sending request");

        let response = match self.http.execute(request).await {
            Ok(response) => response,
            Err(error) => {
                let class = match error.kind() {
                    HttpErrorKind::Timeout => FailureClass::Timeout,
                    HttpErrorKind::Connect | HttpErrorKind::Other => FailureClass::ConnectionError,
                };
                return Err(CallResult::failure(attempt, class).with_detail(error.message()));
            }
        };

        decode(operation, &response).map_err(|failure| {
            CallResult::failure(attempt, failure.class)
                .with_status(Some(response.status))
                .with_retry_after(response.retry_after())
                .with_detail(failure.detail)
        })
    }

    /// Wait until both the shared cooldown and the limiter allow a request.
    ///
    /// A sibling may escalate while this caller sleeps in the limiter, so the
    /// cooldown is checked again once a slot is granted. That slot is spent.
    async fn admit(&self) {
        loop {
            self.wait_for_cooldown().await;
            self.limiter.acquire().await;
            if self.breaker.cooldown_remaining().is_none() {
                return;
            }
            debug!(
                provider = %self.endpoint.provider,
                "cooldown started while waiting for a rate-limit slot"
            );
        }
    }

    async fn wait_for_cooldown(&self) {
        while let Some(remaining) = self.breaker.cooldown_remaining() {
            info!(
                provider = %self.endpoint.provider,
                remaining_secs = remaining.as_secs(),
                "waiting out provider cooldown"
            );
            tokio::time::sleep(remaining).await;
        }
    }
}
