use thiserror::Error;

use crate::ProviderId;

/// Validation and contract errors exposed by `finmerge-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("invalid source '{value}', expected one of kis, dart")]
    InvalidSource { value: String },

    #[error(
        "invalid reconciliation strategy '{value}', expected one of prefer_a, prefer_b, \
         average, conservative, weighted_blend, flag_and_skip"
    )]
    InvalidStrategy { value: String },

    #[error("invalid RFC3339 timestamp: '{value}'")]
    InvalidTimestamp { value: String },

    #[error("unix timestamp {seconds} is outside the supported date range")]
    TimestampOutOfRange { seconds: i64 },

    #[error("operation path must start with '/': '{value}'")]
    InvalidOperationPath { value: String },
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("environment variable {name} has invalid value '{value}'")]
    InvalidEnv { name: &'static str, value: String },

    #[error("config field '{field}' is invalid: {reason}")]
    Invalid { field: String, reason: String },

    #[error("no credentials configured for provider '{provider}'")]
    MissingCredentials { provider: ProviderId },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
