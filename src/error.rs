//! Error types for the Greeting Operator

use std::time::Duration;

use thiserror::Error;

/// Result type for the operator
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the operator
#[derive(Debug, Error)]
pub enum Error {
    /// Resource store error
    #[error("Resource store error: {0}")]
    Store(#[from] StoreError),

    /// The GreetingService spec failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// A reconcile call ran longer than the configured timeout
    #[error("Reconcile timed out after {0:?}")]
    Timeout(Duration),

    /// The custom resource kind is not registered in the cluster
    #[error("Custom resource kind not registered: {0}")]
    KindNotRegistered(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A reconcile task failed unexpectedly
    #[error("Internal error: {0}")]
    Internal(String),
}

/// How the dispatcher should schedule the next attempt after an error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryClass {
    /// Retry soon, backing off exponentially
    Backoff,
    /// Retrying immediately cannot help; retry on the long interval
    Slow,
}

impl Error {
    /// Classify the error for the retry policy
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Error::Validation(_) | Error::Config(_) | Error::KindNotRegistered(_) => {
                RetryClass::Slow
            }
            Error::Store(StoreError::Invalid(_)) => RetryClass::Slow,
            Error::Store(_) | Error::Timeout(_) | Error::Internal(_) => RetryClass::Backoff,
        }
    }

    /// Short label used for metrics
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::Store(e) => e.metric_label(),
            Error::Validation(_) => "validation",
            Error::Timeout(_) => "timeout",
            Error::KindNotRegistered(_) => "kind_not_registered",
            Error::Config(_) => "config",
            Error::Internal(_) => "internal",
        }
    }
}

/// Errors surfaced by a [`ResourceStore`](crate::store::ResourceStore)
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Optimistic concurrency or field ownership conflict
    #[error("conflict: {0}")]
    Conflict(String),

    /// The addressed object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The store rejected the object body
    #[error("invalid object: {0}")]
    Invalid(String),

    /// The store asked the client to slow down
    #[error("throttled: {0}")]
    Throttled(String),

    /// Network or server-side failure
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    fn metric_label(&self) -> &'static str {
        match self {
            StoreError::Conflict(_) => "conflict",
            StoreError::NotFound(_) => "not_found",
            StoreError::Invalid(_) => "invalid",
            StoreError::Throttled(_) => "throttled",
            StoreError::Unavailable(_) => "unavailable",
            StoreError::Other(_) => "other",
        }
    }
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => match resp.code {
                404 => StoreError::NotFound(resp.message),
                409 => StoreError::Conflict(resp.message),
                400 | 422 => StoreError::Invalid(resp.message),
                429 => StoreError::Throttled(resp.message),
                code if code >= 500 => StoreError::Unavailable(resp.message),
                _ => StoreError::Other(format!("{} ({})", resp.message, resp.code)),
            },
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}
