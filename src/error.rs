// src/error.rs
//! Application error types with structured error handling.
//!
//! Two layers of failure exist. [`FetchError`] describes what went wrong
//! with one request against the remote API and carries the classification
//! the retry controller and scheduler dispatch on. [`AppError`] is what a
//! pipeline run, configuration load, or sink reports to the caller.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The classification vocabulary for request failures.
///
/// Retry and failure-scoping decisions are made on this type rather than on
/// HTTP status codes scattered through the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// HTTP 429 or a `RATE_LIMITS` error body: wait and re-issue.
    RateLimited,
    /// Connection failures, timeouts, 408 and 5xx: retry a bounded number of times.
    Transient,
    /// Anything else: the affected key is abandoned.
    Fatal,
    /// The run was cancelled while the request was in flight.
    Cancelled,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate_limited"),
            Self::Transient => write!(f, "transient"),
            Self::Fatal => write!(f, "fatal"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A classified failure of a single page request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("Rate limited (HTTP {status})")]
    RateLimited {
        status: u16,
        /// Server-provided `Retry-After`, when present.
        retry_after: Option<Duration>,
    },

    #[error("Transient failure: {message}")]
    Transient { message: String },

    #[error("{}", fatal_message(*status, message))]
    Fatal { status: Option<u16>, message: String },

    #[error("Request cancelled")]
    Cancelled,
}

fn fatal_message(status: Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("HTTP {}: {}", code, message),
        None => format!("Fatal: {}", message),
    }
}

impl FetchError {
    /// Creates a fatal error without an HTTP status (decoding, request building).
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            status: None,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::RateLimited { .. } => ErrorClass::RateLimited,
            Self::Transient { .. } => ErrorClass::Transient,
            Self::Fatal { .. } => ErrorClass::Fatal,
            Self::Cancelled => ErrorClass::Cancelled,
        }
    }

    /// Whether the retry controller may re-issue the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient { .. })
    }

    /// Classifies a transport-level reqwest failure.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), err.to_string());
        }
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            Self::transient(err.to_string())
        } else {
            Self::fatal(err.to_string())
        }
    }

    /// Classifies an HTTP error status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            429 => Self::RateLimited {
                status,
                retry_after: None,
            },
            408 | 500..=599 => Self::Transient {
                message: format!("HTTP {}: {}", status, message.into()),
            },
            _ => Self::Fatal {
                status: Some(status),
                message: message.into(),
            },
        }
    }
}

/// Main application error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Missing configuration: {0}")]
    MissingConfiguration(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Network failure: {0}")]
    NetworkFailure(#[from] reqwest::Error),

    #[error("Filesystem IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings file {path}: {source}")]
    ConfigFileParse {
        path: std::path::PathBuf,
        source: serde_json::Error,
    },

    #[error("Stage '{stage}' failed ({class}): {message}")]
    StageFailed {
        stage: String,
        class: ErrorClass,
        message: String,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Output sink failed: {0}")]
    Sink(String),

    #[error("Internal error: {message}")]
    InternalError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error(transparent)]
    Validation(#[from] crate::types::ValidationError),
}

impl AppError {
    /// Creates a stage failure from the error that aborted it.
    pub fn stage_failed(stage: impl fmt::Display, cause: &FetchError) -> Self {
        Self::StageFailed {
            stage: stage.to_string(),
            class: cause.class(),
            message: cause.to_string(),
        }
    }

    /// The classification of the failure, when it originated from a request.
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            Self::StageFailed { class, .. } => Some(*class),
            Self::Cancelled => Some(ErrorClass::Cancelled),
            _ => None,
        }
    }
}

// Allow converting from anyhow::Error, preserving the message
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalError {
            message: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias for convenience
pub type Result<T, E = AppError> = std::result::Result<T, E>;
