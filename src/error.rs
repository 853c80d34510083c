use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error as ThisError;

const VALIDATION_CODE: &str = "ValidationException";

/// Table operation error
///
/// Only [`Error::CapacityExceeded`] is retried by the throughput controller;
/// every other variant is surfaced to the caller as soon as it is observed.
#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum Error {
    /// The backend rejected the request because provisioned throughput was exceeded
    #[error("provisioned throughput exceeded: {message}")]
    CapacityExceeded {
        /// Backend message
        message: String,
    },
    /// A conditional write or delete found its existence condition false
    #[error("condition check failed: {message}")]
    ConditionFailed {
        /// Backend message
        message: String,
    },
    /// The addressed item does not exist
    #[error("item not found: {partition_key} / {sort_key}")]
    NotFound {
        /// Partition key of the missing item
        partition_key: String,
        /// Sort key of the missing item
        sort_key: String,
    },
    /// The encoded item is larger than the backend accepts
    #[error("item too large: {size_kb:.1} KB")]
    PayloadTooLarge {
        /// Encoded item size in KB
        size_kb: f64,
    },
    /// Raising provisioned capacity failed
    #[error("capacity scale-up failed: {message}")]
    ScalingFailed {
        /// Cause of the failure
        message: String,
    },
    /// A capacity change did not become active within the wait budget
    #[error("capacity change not active after {waited:?}")]
    ActivationTimeout {
        /// Total time spent polling
        waited: Duration,
    },
    /// Codec failure while converting between domain values and stored items
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Any other backend or transport failure
    #[error("backend error: {message}")]
    Transport {
        /// Backend message
        message: String,
        /// Backend error code, if any
        code: Option<String>,
        /// HTTP status of the raw response, if any
        status: Option<u16>,
        /// Request identifier assigned by the backend, if any
        request_id: Option<String>,
    },
}

/// Stable classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// See [`Error::CapacityExceeded`]
    CapacityExceeded,
    /// See [`Error::ConditionFailed`]
    ConditionFailed,
    /// See [`Error::NotFound`]
    NotFound,
    /// See [`Error::PayloadTooLarge`]
    PayloadTooLarge,
    /// See [`Error::ScalingFailed`]
    ScalingFailed,
    /// See [`Error::ActivationTimeout`]
    ActivationTimeout,
    /// See [`Error::Serialization`]
    Serialization,
    /// See [`Error::Transport`]
    Unknown,
}

impl ErrorKind {
    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::CapacityExceeded => "CAPACITY_EXCEEDED",
            ErrorKind::ConditionFailed => "CONDITION_FAILED",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorKind::ScalingFailed => "SCALING_FAILED",
            ErrorKind::ActivationTimeout => "ACTIVATION_TIMEOUT",
            ErrorKind::Serialization => "SERIALIZATION",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure handed to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorDetail {
    /// Human readable message
    pub message: String,
    /// Classification
    pub kind: ErrorKind,
    /// Backend error code when one was reported, otherwise the kind name
    pub code: String,
}

impl Error {
    /// Classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            Error::ConditionFailed { .. } => ErrorKind::ConditionFailed,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            Error::ScalingFailed { .. } => ErrorKind::ScalingFailed,
            Error::ActivationTimeout { .. } => ErrorKind::ActivationTimeout,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::Transport { .. } => ErrorKind::Unknown,
        }
    }

    /// Structured `{message, kind, code}` form of this error
    pub fn detail(&self) -> ErrorDetail {
        let code = match self {
            Error::Transport {
                code: Some(code), ..
            } => code.clone(),
            other => other.kind().as_str().to_string(),
        };

        ErrorDetail {
            message: self.to_string(),
            kind: self.kind(),
            code,
        }
    }

    /// Whether the throughput controller may retry this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::CapacityExceeded { .. })
    }

    /// Check if the error means the addressed item is absent
    ///
    /// True for both [`Error::NotFound`] and [`Error::ConditionFailed`], since a
    /// failed existence condition is how a lost update race surfaces.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. } | Error::ConditionFailed { .. })
    }

    /// Check if the error is a serialization/deserialization error
    pub fn is_serialization_error(&self) -> bool {
        matches!(self, Error::Serialization(_))
    }

    /// HTTP status of the raw backend response, if one was observed
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Transport { status, .. } => *status,
            _ => None,
        }
    }

    /// Backend request identifier, if one was observed
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Error::Transport { request_id, .. } => request_id.as_deref(),
            _ => None,
        }
    }

    /// Check if the backend rejected the request as malformed
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Error::Transport { code: Some(code), .. } if code == VALIDATION_CODE)
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
            code: Some(VALIDATION_CODE.to_string()),
            status: Some(400),
            request_id: None,
        }
    }

    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
            code: None,
            status: None,
            request_id: None,
        }
    }
}

/// Maps an [`Error`] to the HTTP status an API caller should respond with.
///
/// - `NotFound`, `ConditionFailed` -> 404
/// - `PayloadTooLarge`, `Serialization` -> 400
/// - `Transport` carrying a `ValidationException` code -> 400
/// - `CapacityExceeded` -> 503
/// - `ScalingFailed`, `ActivationTimeout`, any other `Transport` -> 500
pub fn status_code_for(error: &Error) -> u16 {
    match error {
        Error::NotFound { .. } | Error::ConditionFailed { .. } => 404,
        Error::PayloadTooLarge { .. } | Error::Serialization(_) => 400,
        err if err.is_validation_error() => 400,
        Error::CapacityExceeded { .. } => 503,
        Error::ScalingFailed { .. } | Error::ActivationTimeout { .. } | Error::Transport { .. } => {
            500
        }
    }
}

macro_rules! impl_from_codec_error {
    ($name:path) => {
        impl From<$name> for Error {
            fn from(e: $name) -> Self {
                Error::Serialization(e.to_string())
            }
        }
    };
}

impl_from_codec_error!(serde_dynamo::Error);
impl_from_codec_error!(serde_json::Error);
