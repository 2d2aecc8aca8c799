//! Runtime configuration.
//!
//! Values come from an optional TOML file and are then overridden by
//! `FINMERGE_*` environment variables. Credentials are read from the
//! environment only and never from the file.
//!
//! ```toml
//! worker_count = 4
//! default_strategy = "conservative"
//! chunk_size = 50
//! chunk_pause = 5.0
//!
//! [tolerances]
//! revenue = 3.0
//!
//! [dart]
//! max_requests_per_second = 4
//! daily_quota = 10000
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::executor::{BatchExecutor, TaskRetry};
use crate::provider_policy::{LongWindowQuota, ProviderPolicy};
use crate::reconcile::{ReconciliationStrategy, Reconciliator, ToleranceTable};
use crate::retry::{duration_secs, RetryPolicy};
use crate::{ConfigError, ProviderId};

const ENV_MAX_RPS: &str = "FINMERGE_MAX_RPS";
const ENV_MAX_RETRIES: &str = "FINMERGE_MAX_RETRIES";
const ENV_WORKER_COUNT: &str = "FINMERGE_WORKER_COUNT";
const ENV_CHUNK_SIZE: &str = "FINMERGE_CHUNK_SIZE";
const ENV_DEFAULT_STRATEGY: &str = "FINMERGE_DEFAULT_STRATEGY";
const ENV_KIS_BASE_URL: &str = "FINMERGE_KIS_BASE_URL";
const ENV_DART_BASE_URL: &str = "FINMERGE_DART_BASE_URL";

const ENV_KIS_APP_KEY: &str = "FINMERGE_KIS_APP_KEY";
const ENV_KIS_APP_SECRET: &str = "FINMERGE_KIS_APP_SECRET";
const ENV_KIS_ACCESS_TOKEN: &str = "FINMERGE_KIS_ACCESS_TOKEN";
const ENV_DART_API_KEY: &str = "FINMERGE_DART_API_KEY";

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Batch, throttling and reconciliation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub worker_count: usize,
    /// Re-invocations of a failed task body by the batch executor.
    pub task_retries: u32,
    #[serde(with = "duration_secs")]
    pub task_retry_delay: Duration,
    /// Enables chunked batches when set.
    pub chunk_size: Option<usize>,
    #[serde(with = "duration_secs")]
    pub chunk_pause: Duration,
    pub default_strategy: ReconciliationStrategy,
    pub blend_weight_a: f64,
    pub default_tolerance_pct: f64,
    /// Per-metric tolerance overrides on top of the standard table.
    pub tolerances: BTreeMap<String, f64>,
    pub kis: ProviderSettings,
    pub dart: ProviderSettings,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            task_retries: 0,
            task_retry_delay: Duration::from_secs(1),
            chunk_size: None,
            chunk_pause: Duration::from_secs(5),
            default_strategy: ReconciliationStrategy::default(),
            blend_weight_a: Reconciliator::DEFAULT_BLEND_WEIGHT_A,
            default_tolerance_pct: ToleranceTable::DEFAULT_PCT,
            tolerances: BTreeMap::new(),
            kis: ProviderSettings::default(),
            dart: ProviderSettings::default(),
        }
    }
}

/// Optional per-provider overrides of [`ProviderPolicy`] defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderSettings {
    pub base_url: Option<String>,
    pub max_requests_per_second: Option<u32>,
    pub max_retries: Option<u32>,
    /// Requests allowed per rolling day.
    pub daily_quota: Option<u32>,
    pub timeout_secs: Option<f64>,
    pub failure_threshold: Option<u32>,
    pub cooldown_secs: Option<f64>,
    pub retry: Option<RetryPolicy>,
}

impl FetchConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// File (if any), then environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_path(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides using `lookup` in place of the process environment.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(rps) = parse_env::<u32, _>(&lookup, ENV_MAX_RPS)? {
            self.kis.max_requests_per_second = Some(rps);
            self.dart.max_requests_per_second = Some(rps);
        }
        if let Some(retries) = parse_env::<u32, _>(&lookup, ENV_MAX_RETRIES)? {
            self.kis.max_retries = Some(retries);
            self.dart.max_retries = Some(retries);
        }
        if let Some(workers) = parse_env(&lookup, ENV_WORKER_COUNT)? {
            self.worker_count = workers;
        }
        if let Some(chunk_size) = parse_env(&lookup, ENV_CHUNK_SIZE)? {
            self.chunk_size = Some(chunk_size);
        }
        if let Some(strategy) = parse_env(&lookup, ENV_DEFAULT_STRATEGY)? {
            self.default_strategy = strategy;
        }
        if let Some(url) = lookup(ENV_KIS_BASE_URL) {
            self.kis.base_url = Some(url);
        }
        if let Some(url) = lookup(ENV_DART_BASE_URL) {
            self.dart.base_url = Some(url);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::invalid("worker_count", "must be at least 1"));
        }
        if self.chunk_size == Some(0) {
            return Err(ConfigError::invalid("chunk_size", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.blend_weight_a) {
            return Err(ConfigError::invalid("blend_weight_a", "must be between 0 and 1"));
        }
        check_tolerance("default_tolerance_pct", self.default_tolerance_pct)?;
        for (metric, pct) in &self.tolerances {
            check_tolerance(&format!("tolerances.{metric}"), *pct)?;
        }

        for provider in ProviderId::ALL {
            let settings = self.settings(provider);
            let field = |name: &str| format!("{provider}.{name}");
            if settings.max_requests_per_second == Some(0) {
                return Err(ConfigError::invalid(
                    field("max_requests_per_second"),
                    "must be at least 1",
                ));
            }
            if settings.daily_quota == Some(0) {
                return Err(ConfigError::invalid(field("daily_quota"), "must be at least 1"));
            }
            if settings.failure_threshold == Some(0) {
                return Err(ConfigError::invalid(field("failure_threshold"), "must be at least 1"));
            }
            for (name, secs) in [
                ("timeout_secs", settings.timeout_secs),
                ("cooldown_secs", settings.cooldown_secs),
            ] {
                if secs.is_some_and(|secs| !secs.is_finite() || secs < 0.0) {
                    return Err(ConfigError::invalid(field(name), "must be a non-negative number"));
                }
            }
        }
        Ok(())
    }

    pub fn settings(&self, provider: ProviderId) -> &ProviderSettings {
        match provider {
            ProviderId::Kis => &self.kis,
            ProviderId::Dart => &self.dart,
        }
    }

    /// Provider defaults with this config's overrides applied.
    pub fn policy(&self, provider: ProviderId) -> ProviderPolicy {
        let settings = self.settings(provider);
        let mut policy = ProviderPolicy::default_for(provider);

        if let Some(url) = &settings.base_url {
            policy.base_url = url.trim_end_matches('/').to_owned();
        }
        if let Some(rps) = settings.max_requests_per_second {
            policy.max_requests_per_second = rps;
        }
        if let Some(retries) = settings.max_retries {
            policy.max_retries = retries;
        }
        if let Some(limit) = settings.daily_quota {
            policy.quota = Some(LongWindowQuota { window: DAY, limit });
        }
        if let Some(timeout) = settings.timeout_secs.and_then(secs_to_duration) {
            policy.timeout = timeout;
        }
        if let Some(threshold) = settings.failure_threshold {
            policy.circuit = CircuitBreakerConfig {
                failure_threshold: threshold,
                ..policy.circuit
            };
        }
        if let Some(cooldown) = settings.cooldown_secs.and_then(secs_to_duration) {
            policy.circuit = CircuitBreakerConfig {
                cooldown,
                ..policy.circuit
            };
        }
        if let Some(retry) = &settings.retry {
            policy.retry = retry.clone();
        }
        policy
    }

    pub fn tolerance_table(&self) -> ToleranceTable {
        let mut table = ToleranceTable::standard();
        table.set_default_pct(self.default_tolerance_pct);
        for (metric, pct) in &self.tolerances {
            table.set(metric, *pct);
        }
        table
    }

    pub fn reconciliator(&self) -> Reconciliator {
        Reconciliator::new(self.tolerance_table())
            .with_blend_weight(self.blend_weight_a)
            .with_default_strategy(self.default_strategy)
    }

    pub fn batch_executor(&self) -> BatchExecutor {
        let executor = BatchExecutor::new(self.worker_count).with_task_retry(TaskRetry {
            attempts: self.task_retries,
            delay: self.task_retry_delay,
        });
        match self.chunk_size {
            Some(size) => executor.with_chunking(size, self.chunk_pause),
            None => executor,
        }
    }
}

fn check_tolerance(field: &str, pct: f64) -> Result<(), ConfigError> {
    if pct.is_finite() && pct >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, "tolerance must be a non-negative percentage"))
    }
}

fn secs_to_duration(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

fn parse_env<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnv { name, value: raw })
}

/// Brokerage credentials. All three values are required together.
#[derive(Clone, PartialEq, Eq)]
pub struct KisCredentials {
    pub app_key: String,
    pub app_secret: String,
    pub access_token: String,
}

impl std::fmt::Debug for KisCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KisCredentials")
            .field("app_key", &"<redacted>")
            .field("app_secret", &"<redacted>")
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Provider secrets, sourced from the environment.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub kis: Option<KisCredentials>,
    pub dart_api_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("kis", &self.kis)
            .field("dart_api_key", &self.dart_api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let kis = match (
            non_empty(ENV_KIS_APP_KEY),
            non_empty(ENV_KIS_APP_SECRET),
            non_empty(ENV_KIS_ACCESS_TOKEN),
        ) {
            (Some(app_key), Some(app_secret), Some(access_token)) => Some(KisCredentials {
                app_key,
                app_secret,
                access_token,
            }),
            _ => None,
        };

        Self {
            kis,
            dart_api_key: non_empty(ENV_DART_API_KEY),
        }
    }

    pub fn with_kis(
        mut self,
        app_key: impl Into<String>,
        app_secret: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        self.kis = Some(KisCredentials {
            app_key: app_key.into(),
            app_secret: app_secret.into(),
            access_token: access_token.into(),
        });
        self
    }

    pub fn with_dart(mut self, api_key: impl Into<String>) -> Self {
        self.dart_api_key = Some(api_key.into());
        self
    }

    pub fn has(&self, provider: ProviderId) -> bool {
        match provider {
            ProviderId::Kis => self.kis.is_some(),
            ProviderId::Dart => self.dart_api_key.is_some(),
        }
    }
}
