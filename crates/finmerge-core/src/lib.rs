//! # Finmerge Core
//!
//! Rate-limited acquisition and cross-source reconciliation of Korean
//! equity fundamentals.
//!
//! ## Overview
//!
//! Two upstreams report overlapping figures for the same listed company: a
//! brokerage OpenAPI (KIS: prices, valuation ratios) and the regulatory
//! disclosure API (DART: filed statements, corporate-code registry). Both
//! suspend credentials that exceed their request quotas, and their numbers
//! do not always agree. This crate provides:
//!
//! - **Sliding-window rate limiting** shared by every caller of a provider
//! - **A retrying client** with class-specific backoff and ban-avoidance cooldowns
//! - **A bounded batch executor** with failure isolation, chunking and cancellation
//! - **A reconciliator** that merges disagreeing values under an explicit strategy
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`circuit_breaker`] | Consecutive-overload counter and forced cooldown |
//! | [`client`] | Retrying, throttled provider client |
//! | [`config`] | TOML + environment configuration, credentials |
//! | [`domain`] | Symbol and UTC timestamp primitives |
//! | [`error`] | Validation and configuration errors |
//! | [`executor`] | Bounded-concurrency batch runner |
//! | [`http_client`] | Transport trait, reqwest and scripted transports |
//! | [`operation`] | Endpoint descriptors, fetch tasks, provider auth |
//! | [`outcome`] | Attempt classification and typed fetch results |
//! | [`payload`] | Response decoding and provider status checks |
//! | [`provider_policy`] | Per-provider quotas and retry budgets |
//! | [`rate_limiter`] | Sliding-window request limiter |
//! | [`reconcile`] | Tolerances, strategies and audit records |
//! | [`retry`] | Backoff curves and the retry state machine |
//! | [`runtime`] | Process-wide per-provider state |
//! | [`source`] | Provider identifiers |
//! | [`telemetry`] | Tracing subscriber setup |
//! | [`throttling`] | Long-window (daily) quota guard |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use finmerge_core::{FetchConfig, FetchRuntime, Operation, ProviderId, Symbol};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     finmerge_core::telemetry::init_tracing()?;
//!     let config = FetchConfig::load(None)?;
//!     let runtime = FetchRuntime::from_env(&config);
//!
//!     let tasks = ["005930", "000660"]
//!         .into_iter()
//!         .map(|code| {
//!             let symbol = Symbol::parse(code)?;
//!             Ok(runtime.task(symbol.clone(), Operation::kis_quote(&symbol)))
//!         })
//!         .collect::<Result<Vec<_>, finmerge_core::ValidationError>>()?;
//!
//!     for outcome in runtime.fetch_all(&config.batch_executor(), tasks).await {
//!         match outcome.result {
//!             Ok(payload) => println!("{}: {:?}", outcome.task.symbol, payload.as_json()),
//!             Err(failure) => eprintln!("{}: {failure}", outcome.task.symbol),
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ BatchExecutor   │  worker_count permits, chunking, cancellation
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ ResilientClient │────▶│ RateLimiter      │  one per provider
//! │ (retry plan)    │────▶│ CircuitBreaker   │  (owned by FetchRuntime)
//! └────────┬────────┘     │ QuotaGuard       │
//!          │              └──────────────────┘
//!          ▼
//! ┌─────────────────┐
//! │ HttpClient      │  reqwest / scripted
//! └────────┬────────┘
//!          │  Payload
//!          ▼
//! ┌─────────────────┐
//! │ Reconciliator   │  ReconciliationRecord, MergedRecord
//! └─────────────────┘
//! ```
//!
//! ## Security
//!
//! - Credentials come from environment variables only and are redacted in `Debug`
//! - Logs carry request paths, never query strings

pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
pub mod http_client;
pub mod operation;
pub mod outcome;
pub mod payload;
pub mod provider_policy;
pub mod rate_limiter;
pub mod reconcile;
pub mod retry;
pub mod runtime;
pub mod source;
pub mod telemetry;
pub mod throttling;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, Escalation};
pub use client::ResilientClient;
pub use config::{Credentials, FetchConfig, KisCredentials, ProviderSettings};
pub use domain::{Symbol, UtcDateTime};
pub use error::{ConfigError, ValidationError};
pub use executor::{BatchExecutor, BatchSummary, CancellationFlag, TaskRetry};
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpErrorKind, HttpMethod, HttpRequest, HttpResponse,
    RecordedRequest, ReqwestHttpClient, ScriptedHttpClient,
};
pub use operation::{FetchTask, Operation, ProviderEndpoint, ResponseFormat};
pub use outcome::{CallResult, Disposition, FailureClass, FetchFailure, FetchOutcome};
pub use payload::{DecodeFailure, Payload};
pub use provider_policy::{LongWindowQuota, ProviderPolicy};
pub use rate_limiter::RateLimiter;
pub use reconcile::{
    MergedRecord, MetricKind, MetricObservation, ReconciliationRecord, ReconciliationStrategy,
    Reconciliator, ToleranceTable,
};
pub use retry::{Attempt, Backoff, RetryPolicy};
pub use runtime::FetchRuntime;
pub use source::ProviderId;
pub use throttling::QuotaGuard;
