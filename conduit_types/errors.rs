use std::time::Duration;
use thiserror::Error;

pub mod registry_error;
pub mod validation_error;

pub use registry_error::RegistryError;
pub use validation_error::FieldError;

pub type Result<T, E = ApplicationError> = std::result::Result<T, E>;

/// Generic code used when a handler panics while processing a request.
pub const HANDLER_EXCEPTION: &str = "HANDLER_EXCEPTION";

/// Errors returned by every operation at and below the dispatch boundary.
///
/// `Ok` is a success and `Err` a failure: the two are mutually exclusive.
/// Reading the wrong side (`unwrap` on a failure, `unwrap_err` on a success)
/// panics, which is treated as a programming error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplicationError {
    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("Validation failed: {}", validation_error::join(.0))]
    Validation(Vec<FieldError>),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("No handler registered for {0}")]
    HandlerNotFound(&'static str),

    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Request was cancelled")]
    Cancelled,

    #[error("Gave up after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        last: Box<ApplicationError>,
    },

    #[error("{code}: {message}")]
    Generic { code: String, message: String },
}

impl ApplicationError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }

    pub fn generic(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Generic {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Wraps a panic (or any unexpected failure) raised by user code.
    pub fn handler_exception(message: impl Into<String>) -> Self {
        Self::generic(HANDLER_EXCEPTION, message)
    }

    /// Machine-readable code of this error.
    pub fn code(&self) -> &str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::HandlerNotFound(_) => "HANDLER_NOT_FOUND",
            Self::Timeout(_) => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            Self::Generic { code, .. } => code.as_str(),
        }
    }

    /// Whether retrying the same request could produce a different outcome.
    /// Deterministic rejections (validation, authorization, missing data or
    /// handlers) and caller-driven aborts are never retried.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            Self::NotFound { .. }
                | Self::Validation(_)
                | Self::Unauthorized(_)
                | Self::HandlerNotFound(_)
                | Self::Timeout(_)
                | Self::Cancelled
        )
    }

    /// Failing fields of a validation error, empty for any other kind.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Validation(fields) => fields,
            _ => &[],
        }
    }
}

impl From<serde_json::Error> for ApplicationError {
    fn from(err: serde_json::Error) -> Self {
        ApplicationError::generic("SERIALIZATION", err.to_string())
    }
}

impl From<anyhow::Error> for ApplicationError {
    fn from(err: anyhow::Error) -> Self {
        ApplicationError::generic("UNKNOWN", err.to_string())
    }
}
