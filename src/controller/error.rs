//! Error types for the controller.
//!
//! Defines custom error types with classification for retry behavior. No
//! error is fatal to the process: every failure is scoped to one resource
//! and turned into a requeue by the error policy.

use std::time::Duration;
use thiserror::Error;

use crate::convert::ConversionError;

/// Bounded convergence latency classes.
///
/// Every requeue the controller asks for falls into one of these, so any
/// pending work is revisited within a known bound.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ConvergenceClass {
    /// Mid-transition work (mirror just created, authority migrating).
    Short,
    /// Retries after transient failures.
    Medium,
    /// Periodic resync of a converged pair.
    Long,
    /// Errors that need a human (invalid spec, unconvertible fields).
    Overlong,
}

impl ConvergenceClass {
    pub fn duration(self) -> Duration {
        match self {
            ConvergenceClass::Short => Duration::from_secs(5),
            ConvergenceClass::Medium => Duration::from_secs(30),
            ConvergenceClass::Long => Duration::from_secs(120),
            ConvergenceClass::Overlong => Duration::from_secs(600),
        }
    }
}

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Missing required field in resource
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Validation error in resource spec
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transient error that should be retried
    #[error("Transient error: {0}")]
    Transient(String),

    /// A field could not be converted to the other API
    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this error is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 409)
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                // Retry on network errors, conflicts, rate limiting, and server errors
                matches!(
                    e,
                    kube::Error::Api(api_err)
                        if api_err.code >= 500 || api_err.code == 429 || api_err.code == 409
                ) || matches!(e, kube::Error::Service(_))
            }
            Error::Transient(_) | Error::Conversion(_) => true,
            Error::Validation(_) | Error::MissingField(_) => false,
            Error::Serialization(_) => false,
        }
    }

    /// Convergence class for the requeue after this error
    pub fn convergence_class(&self) -> ConvergenceClass {
        match self {
            Error::Kube(_) if self.is_conflict() => ConvergenceClass::Short,
            Error::Conversion(_) => ConvergenceClass::Medium,
            _ if self.is_retryable() => ConvergenceClass::Medium,
            _ => ConvergenceClass::Overlong,
        }
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        self.convergence_class().duration()
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
