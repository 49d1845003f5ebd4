//! # Error Definitions
//!
//! [`CallError`] is what a caller sees when a procedure call fails. It is also
//! the `error` body of a result envelope, so it serializes exactly as sent.
//! [`WireError`] covers payloads that could not be read or written at all.

use serde::Deserialize;
use serde::Serialize;

use crate::envelope::CallId;

/// Failure taxonomy carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Input failed schema validation.
    BadInput,
    /// Path or referenced entity missing.
    NotFound,
    /// Uniqueness or state violation.
    Conflict,
    Unauthorized,
    Forbidden,
    /// Unhandled handler fault. Details stay in the server log.
    Internal,
    /// The payload or one batch member was not a readable call.
    ParseError,
    /// The call did not finish within its deadline.
    Timeout,
    PayloadTooLarge,
    /// The client link shut down before the call resolved.
    ClientClosed,
    /// A code this build does not know about.
    #[serde(other)]
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadInput => "BAD_INPUT",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::Internal => "INTERNAL",
            Self::ParseError => "PARSE_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::ClientClosed => "CLIENT_CLOSED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// HTTP status an HTTP adapter should answer with for this code.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadInput | Self::ParseError => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Timeout => 408,
            Self::Conflict => 409,
            Self::PayloadTooLarge => 413,
            Self::ClientClosed => 499,
            Self::Internal | Self::Unknown => 500,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured call failure: `{ code, message, validationPath? }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{code}: {message}")]
pub struct CallError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_path: Option<String>,
}

impl CallError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            validation_path: None,
        }
    }

    pub fn with_validation_path(mut self, path: impl Into<String>) -> Self {
        self.validation_path = Some(path.into());
        self
    }

    pub fn bad_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadInput, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    /// The generic internal failure. Never carries the underlying cause.
    pub fn internal() -> Self {
        Self::new(ErrorCode::Internal, "internal server error")
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, message)
    }
}

/// Payload-level failures: the bytes were not a readable call or result.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Not valid JSON at all.
    #[error("invalid JSON: {0}")]
    Syntax(String),
    /// Valid JSON but not an envelope. The id is kept when it could be read.
    #[error("invalid envelope: {reason}")]
    InvalidEnvelope { id: Option<CallId>, reason: String },
    /// Top-level value was neither an object nor an array.
    #[error("expected an object or an array, found {0}")]
    UnexpectedShape(&'static str),
    #[error("batch is empty")]
    EmptyBatch,
    #[error("payload of {actual} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize, actual: usize },
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl WireError {
    /// The call error a server answers with when it cannot read a payload.
    pub fn to_call_error(&self) -> CallError {
        match self {
            Self::PayloadTooLarge { .. } => CallError::new(ErrorCode::PayloadTooLarge, self.to_string()),
            Self::Serialize(_) => CallError::internal(),
            _ => CallError::parse(self.to_string()),
        }
    }

    /// Id of the offending call, if one could be recovered.
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            Self::InvalidEnvelope { id, .. } => id.as_ref(),
            _ => None,
        }
    }
}

/// A specialized Result type for wire operations.
pub type Result<T> = std::result::Result<T, WireError>;
