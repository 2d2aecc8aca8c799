//! Process-wide fetch state.
//!
//! A [`FetchRuntime`] is built once and passed to whatever needs to talk to
//! the providers. It owns exactly one [`RateLimiter`], one
//! [`CircuitBreaker`] and one optional [`QuotaGuard`] per provider, and every
//! [`ResilientClient`] it hands out shares them.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::circuit_breaker::CircuitBreaker;
use crate::client::ResilientClient;
use crate::config::{Credentials, FetchConfig};
use crate::executor::BatchExecutor;
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::operation::{FetchTask, Operation, ProviderEndpoint};
use crate::outcome::{FetchFailure, FetchOutcome};
use crate::payload::Payload;
use crate::provider_policy::ProviderPolicy;
use crate::rate_limiter::RateLimiter;
use crate::throttling::QuotaGuard;
use crate::{ConfigError, ProviderId, Symbol};

#[derive(Debug)]
struct ProviderState {
    policy: ProviderPolicy,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    quota: Option<Arc<QuotaGuard>>,
    endpoint: Option<ProviderEndpoint>,
}

impl ProviderState {
    fn new(policy: ProviderPolicy, endpoint: Option<ProviderEndpoint>) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::per_second(policy.max_requests_per_second)),
            breaker: Arc::new(CircuitBreaker::new(policy.circuit)),
            quota: policy.quota.map(|quota| Arc::new(QuotaGuard::new(quota))),
            endpoint,
            policy,
        }
    }
}

/// Shared limiter, breaker and quota state for every provider.
pub struct FetchRuntime {
    http: Arc<dyn HttpClient>,
    providers: BTreeMap<ProviderId, ProviderState>,
}

impl std::fmt::Debug for FetchRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchRuntime")
            .field("providers", &self.providers)
            .finish_non_exhaustive()
    }
}

impl FetchRuntime {
    pub fn new(config: &FetchConfig, credentials: &Credentials, http: Arc<dyn HttpClient>) -> Self {
        let providers = ProviderId::ALL
            .into_iter()
            .map(|provider| {
                let policy = config.policy(provider);
                let endpoint = endpoint_for(&policy, credentials);
                info!(
                    %provider,
                    max_rps = policy.max_requests_per_second,
                    documented_tps = policy.documented_tps,
                    max_retries = policy.max_retries,
                    daily_quota = policy.quota.map(|quota| quota.limit),
                    configured = endpoint.is_some(),
                    "provider runtime ready"
                );
                (provider, ProviderState::new(policy, endpoint))
            })
            .collect();

        Self { http, providers }
    }

    /// Real transport, credentials from the environment.
    pub fn from_env(config: &FetchConfig) -> Self {
        Self::new(config, &Credentials::from_env(), Arc::new(ReqwestHttpClient::new()))
    }

    /// Replace the endpoint (base URL and auth) used for its provider.
    pub fn with_endpoint(mut self, endpoint: ProviderEndpoint) -> Self {
        if let Some(state) = self.providers.get_mut(&endpoint.provider) {
            state.endpoint = Some(endpoint);
        }
        self
    }

    pub fn policy(&self, provider: ProviderId) -> Option<&ProviderPolicy> {
        self.providers.get(&provider).map(|state| &state.policy)
    }

    pub fn limiter(&self, provider: ProviderId) -> Option<Arc<RateLimiter>> {
        self.providers.get(&provider).map(|state| Arc::clone(&state.limiter))
    }

    pub fn breaker(&self, provider: ProviderId) -> Option<Arc<CircuitBreaker>> {
        self.providers.get(&provider).map(|state| Arc::clone(&state.breaker))
    }

    /// A client for `provider` sharing this runtime's throttling state.
    pub fn client(&self, provider: ProviderId) -> Result<ResilientClient, ConfigError> {
        let state = self.providers.get(&provider);
        let Some((state, endpoint)) = state.and_then(|s| s.endpoint.clone().map(|e| (s, e))) else {
            return Err(ConfigError::MissingCredentials { provider });
        };

        let mut client = ResilientClient::new(
            Arc::clone(&self.http),
            endpoint,
            Arc::clone(&state.limiter),
            Arc::clone(&state.breaker),
        )
        .with_retry_policy(state.policy.retry.clone());
        if let Some(quota) = &state.quota {
            client = client.with_quota(Arc::clone(quota));
        }
        Ok(client)
    }

    /// Task with the provider's default retry budget.
    pub fn task(&self, symbol: Symbol, operation: Operation) -> FetchTask {
        let max_retries = self
            .policy(operation.provider)
            .map_or(ProviderPolicy::default_for(operation.provider).max_retries, |p| {
                p.max_retries
            });
        FetchTask::new(symbol, operation, max_retries)
    }

    /// Fetch every task on `executor`, each through its provider's client.
    ///
    /// Tasks for a provider without credentials fail individually.
    pub async fn fetch_all(
        &self,
        executor: &BatchExecutor,
        tasks: Vec<FetchTask>,
    ) -> Vec<FetchOutcome<Payload>> {
        let clients: BTreeMap<ProviderId, ResilientClient> = ProviderId::ALL
            .into_iter()
            .filter_map(|provider| self.client(provider).ok().map(|client| (provider, client)))
            .collect();
        debug!(tasks = tasks.len(), providers = clients.len(), "starting fetch batch");
        let clients = Arc::new(clients);

        executor
            .run_all(tasks, move |task| {
                let clients = Arc::clone(&clients);
                async move {
                    match clients.get(&task.provider()) {
                        Some(client) => client.send(&task.operation, task.max_retries).await,
                        None => Err(FetchFailure::task_failed(
                            ConfigError::MissingCredentials {
                                provider: task.provider(),
                            }
                            .to_string(),
                        )),
                    }
                }
            })
            .await
    }
}

fn endpoint_for(policy: &ProviderPolicy, credentials: &Credentials) -> Option<ProviderEndpoint> {
    let endpoint = match policy.provider_id {
        ProviderId::Kis => credentials.kis.as_ref().map(|kis| {
            ProviderEndpoint::kis(
                policy.base_url.as_str(),
                kis.access_token.as_str(),
                kis.app_key.as_str(),
                kis.app_secret.as_str(),
            )
        }),
        ProviderId::Dart => credentials
            .dart_api_key
            .as_ref()
            .map(|key| ProviderEndpoint::dart(policy.base_url.as_str(), key.as_str())),
    };
    endpoint.map(|endpoint| endpoint.with_timeout(policy.timeout))
}
