//! Attempt-level results and the typed outcome of a logical fetch.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::operation::FetchTask;

/// Classification of one physical attempt, or of an executor-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Success,
    ConnectionError,
    Timeout,
    Http5xx,
    Http429,
    /// Any other non-2xx status (400, 401, 403, 404, ...).
    Http4xx,
    MalformedBody,
    SemanticError,
    /// Long-window provider quota spent; retrying now would only burn credential standing.
    QuotaExhausted,
    Cancelled,
    /// The task body failed outside the HTTP client.
    TaskFailed,
    TaskPanicked,
}

/// How the retry loop treats a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Done,
    Transient,
    Overload,
    Terminal,
}

impl FailureClass {
    pub const fn disposition(self) -> Disposition {
        match self {
            Self::Success => Disposition::Done,
            Self::ConnectionError | Self::Timeout => Disposition::Transient,
            Self::Http5xx | Self::Http429 => Disposition::Overload,
            Self::Http4xx
            | Self::MalformedBody
            | Self::SemanticError
            | Self::QuotaExhausted
            | Self::Cancelled
            | Self::TaskFailed
            | Self::TaskPanicked => Disposition::Terminal,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ConnectionError => "connection_error",
            Self::Timeout => "timeout",
            Self::Http5xx => "http_5xx",
            Self::Http429 => "http_429",
            Self::Http4xx => "http_4xx",
            Self::MalformedBody => "malformed_body",
            Self::SemanticError => "semantic_error",
            Self::QuotaExhausted => "quota_exhausted",
            Self::Cancelled => "cancelled",
            Self::TaskFailed => "task_failed",
            Self::TaskPanicked => "task_panicked",
        }
    }
}

impl Display for FailureClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single physical attempt. Folded into the final result and dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    /// 0-based attempt index.
    pub attempt: u32,
    pub class: FailureClass,
    pub status: Option<u16>,
    pub retry_after: Option<Duration>,
    pub detail: String,
}

impl CallResult {
    pub fn failure(attempt: u32, class: FailureClass) -> Self {
        Self {
            attempt,
            class,
            status: None,
            retry_after: None,
            detail: String::new(),
        }
    }

    pub fn with_status(mut self, status: Option<u16>) -> Self {
        self.status = status;
        self
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn into_failure(self) -> FetchFailure {
        FetchFailure {
            class: self.class,
            message: self.detail,
            status: self.status,
            attempts: self.attempt.saturating_add(1),
        }
    }
}

/// Typed failure of a logical fetch after local retries are exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    class: FailureClass,
    message: String,
    status: Option<u16>,
    attempts: u32,
}

impl FetchFailure {
    pub fn new(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            status: None,
            attempts: 0,
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FailureClass::Cancelled, "batch was cancelled before the task finished")
    }

    pub fn task_failed(message: impl Into<String>) -> Self {
        Self::new(FailureClass::TaskFailed, message)
    }

    pub fn semantic(message: impl Into<String>) -> Self {
        Self::new(FailureClass::SemanticError, message)
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub const fn class(&self) -> FailureClass {
        self.class
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn status(&self) -> Option<u16> {
        self.status
    }

    /// Physical HTTP attempts spent before giving up; 0 when none were made.
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// True for classes that may succeed if the caller tries again later.
    pub const fn retryable(&self) -> bool {
        matches!(
            self.class.disposition(),
            Disposition::Transient | Disposition::Overload
        ) || matches!(self.class, FailureClass::QuotaExhausted)
    }

    pub const fn code(&self) -> &'static str {
        match self.class {
            FailureClass::Success => "fetch.success",
            FailureClass::ConnectionError => "fetch.connection_error",
            FailureClass::Timeout => "fetch.timeout",
            FailureClass::Http5xx => "fetch.http_5xx",
            FailureClass::Http429 => "fetch.http_429",
            FailureClass::Http4xx => "fetch.http_4xx",
            FailureClass::MalformedBody => "fetch.malformed_body",
            FailureClass::SemanticError => "fetch.semantic_error",
            FailureClass::QuotaExhausted => "fetch.quota_exhausted",
            FailureClass::Cancelled => "fetch.cancelled",
            FailureClass::TaskFailed => "fetch.task_failed",
            FailureClass::TaskPanicked => "fetch.task_panicked",
        }
    }
}

impl Display for FetchFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for FetchFailure {}

/// Result of one submitted task, tagged with the task for out-of-order correlation.
#[derive(Debug, Clone)]
pub struct FetchOutcome<T> {
    pub task: FetchTask,
    pub result: Result<T, FetchFailure>,
    /// Invocations of the task body, including task-level retries.
    pub invocations: u32,
}

impl<T> FetchOutcome<T> {
    pub fn new(task: FetchTask, result: Result<T, FetchFailure>, invocations: u32) -> Self {
        Self {
            task,
            result,
            invocations,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn failure(&self) -> Option<&FetchFailure> {
        self.result.as_ref().err()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FetchOutcome<U> {
        FetchOutcome {
            task: self.task,
            result: self.result.map(f),
            invocations: self.invocations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overload_and_transient_failures_are_retryable() {
        for class in [
            FailureClass::ConnectionError,
            FailureClass::Timeout,
            FailureClass::Http5xx,
            FailureClass::Http429,
            FailureClass::QuotaExhausted,
        ] {
            assert!(FetchFailure::new(class, "x").retryable(), "{class}");
        }
        for class in [FailureClass::MalformedBody, FailureClass::SemanticError] {
            assert!(!FetchFailure::new(class, "x").retryable(), "{class}");
        }
    }

    #[test]
    fn call_result_counts_attempts_from_one() {
        let failure = CallResult::failure(2, FailureClass::Timeout)
            .with_detail("read timed out")
            .into_failure();

        assert_eq!(failure.attempts(), 3);
        assert_eq!(failure.code(), "fetch.timeout");
        assert_eq!(failure.to_string(), "read timed out (fetch.timeout)");
    }
}
