//! Error taxonomy shared by every tensorgate crate.
//!
//! Errors local to one request are converted into error responses and
//! delivered through the request callback; errors crossing a protocol
//! boundary are mapped to status codes by the server adapters.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed request, unknown platform, shape mismatch.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown model or worker.
    #[error("not found: {0}")]
    NotFound(String),

    /// The worker exists but is not in the Running state.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Client-side transport failure. Retryable.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server answered with a non-2xx or malformed response.
    #[error("bad status {code}: {message}")]
    BadStatus { code: u16, message: String },

    /// Load/unload failure, kernel init failure.
    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("file read error: {0}")]
    FileRead(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Error::Unavailable(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Error::Connection(msg.into())
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Error::Runtime(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Whether a client helper should retry after a short sleep.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Connection(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
