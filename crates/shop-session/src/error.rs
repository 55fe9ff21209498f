//! Error types for session persistence

/// Errors from reading or writing the session file.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("session parse error: {0}")]
    SessionParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
