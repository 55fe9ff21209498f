//! Normalized error taxonomy
//!
//! Callers only ever see an `ApiError`. The UI branches on its kind:
//! `Auth` sends the user back to login, `Network` offers a retry, `Api`
//! renders what the server said, `Validation` highlights local input.

use bytes::Bytes;
use reqwest::StatusCode;

use crate::transport::TransportError;

const NETWORK_MESSAGE: &str = "Network error occurred";
const AUTH_MESSAGE: &str = "Authentication failed";
const API_MESSAGE: &str = "An unexpected error occurred";
const UNKNOWN_MESSAGE: &str = "Unknown error occurred";

/// Fieldless discriminant of `ApiError`, for branching and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Auth,
    Api,
    Validation,
}

impl ErrorKind {
    /// Label for logging and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Auth => "auth",
            ErrorKind::Api => "api",
            ErrorKind::Validation => "validation",
        }
    }
}

/// Every failure the pipeline can surface.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// No response was received (refused, DNS, timeout).
    #[error("network error: {message}")]
    Network { message: String },

    /// Authorization rejected and not recoverable by renewal.
    #[error("authentication error: {message}")]
    Auth { message: String },

    /// The server answered with a non-success status. `body` is verbatim.
    #[error("API error {status}: {message}")]
    Api {
        status: u16,
        message: String,
        body: Bytes,
    },

    /// A local precondition failed before anything was sent.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Network { .. } => ErrorKind::Network,
            ApiError::Auth { .. } => ErrorKind::Auth,
            ApiError::Api { .. } => ErrorKind::Api,
            ApiError::Validation { .. } => ErrorKind::Validation,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        ApiError::Network {
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        ApiError::Auth {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation {
            message: message.into(),
        }
    }

    /// Failure with no server status to report; surfaces as a synthetic 500.
    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Api {
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            message: message.into(),
            body: Bytes::new(),
        }
    }

    /// HTTP status, for `Api` and `Auth` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Api { status, .. } => Some(*status),
            ApiError::Auth { .. } => Some(StatusCode::UNAUTHORIZED.as_u16()),
            ApiError::Network { .. } | ApiError::Validation { .. } => None,
        }
    }

    /// Raw response body, for `Api` errors.
    pub fn body(&self) -> Option<&Bytes> {
        match self {
            ApiError::Api { body, .. } => Some(body),
            _ => None,
        }
    }

    /// The `message` field of a JSON error body, if the server sent one.
    ///
    /// The backend's error shape is `{"status":..,"message":..,"timestamp":..}`.
    pub fn server_message(&self) -> Option<String> {
        let body = self.body()?;
        let value: serde_json::Value = serde_json::from_slice(body).ok()?;
        value.get("message")?.as_str().map(str::to_owned)
    }

    /// Text for the error boundary, one distinct message per kind.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Network { .. } => {
                "Unable to reach the server. Check your connection and try again.".to_string()
            }
            ApiError::Auth { .. } => "Your session has ended. Please sign in again.".to_string(),
            ApiError::Api {
                status, message, ..
            } => match self.server_message() {
                Some(detail) => format!("Server error {status}: {detail}"),
                None => format!("Server error {status}: {message}"),
            },
            ApiError::Validation { message } => message.clone(),
        }
    }
}

/// Map a raw transport failure onto exactly one `ApiError`.
pub fn normalize(failure: &TransportError) -> ApiError {
    match failure {
        TransportError::NoResponse(detail) => {
            ApiError::network(format!("{NETWORK_MESSAGE}: {detail}"))
        }
        TransportError::Status { status, .. } if *status == StatusCode::UNAUTHORIZED => {
            ApiError::auth(AUTH_MESSAGE)
        }
        TransportError::Status { status, body } => ApiError::Api {
            status: status.as_u16(),
            message: API_MESSAGE.to_string(),
            body: body.clone(),
        },
        TransportError::Request(detail) => ApiError::internal(format!("{UNKNOWN_MESSAGE}: {detail}")),
    }
}
