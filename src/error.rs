//! Error types for chunk-dl
//!
//! This module provides the error handling for the library:
//! - One crate-wide [`Error`] enum with contextual variants
//! - [`CryptoError`] for the key-recovery primitives
//! - [`ErrorClass`], the retry/fatal classification every retry decision is made on

use std::time::Duration;
use thiserror::Error;

/// Result type alias for chunk-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for chunk-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "engine.threads")
        key: Option<String>,
    },

    /// The chunk server answered with a non-success HTTP status
    #[error("HTTP status {status} from {url}")]
    HttpStatus {
        /// HTTP status code
        status: u16,
        /// Request URL
        url: String,
    },

    /// Network / transport level error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A batch payload did not match its chunk descriptors
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Key material or chunk ciphertext could not be processed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The worker was killed or its cancellation token fired
    #[error("interrupted")]
    Interrupted,

    /// The engine did not finish within its configured bound
    #[error("engine timed out after {elapsed:?}")]
    Timeout {
        /// How long the engine waited for its workers
        elapsed: Duration,
        /// Error recorded by a worker before the timeout, if any
        fatal: Option<Box<Error>>,
    },

    /// A worker task panicked
    #[error("worker panicked: {0}")]
    WorkerPanic(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Errors raised by the key-recovery primitives
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Tag-length-value data is truncated or declares an impossible length
    #[error("data corruption: {0}")]
    Corrupt(String),

    /// The integrity check value did not match after unwrapping
    #[error("key unwrap integrity check failed")]
    Integrity,

    /// Key has an unsupported length
    #[error("invalid key length: {0} bytes")]
    KeyLength(usize),

    /// Key-wrap input is not a multiple of 8 bytes or is too short
    #[error("invalid key-wrap input length: {0} bytes")]
    InputLength(usize),

    /// A required key block is absent from the key blob
    #[error("missing key block '{0}'")]
    MissingBlock(String),

    /// Authenticated decryption of a chunk failed
    #[error("chunk decryption failed")]
    Decryption,
}

/// How an error affects the operation that produced it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// HTTP 401: never retried, stops the run
    AuthRejected,
    /// Network or non-401 HTTP failure: retried within the batch budget
    Transient,
    /// Payload or key material could not be decoded: retried like a transient failure
    Malformed,
    /// Kill or cancellation observed: never retried
    Cancelled,
    /// Anything else: stops the worker and the run
    Fatal,
}

impl Error {
    /// Classify this error for retry and shutdown decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::HttpStatus { status: 401, .. } => ErrorClass::AuthRejected,
            Error::HttpStatus { .. } | Error::Network(_) => ErrorClass::Transient,
            Error::MalformedPayload(_) | Error::Crypto(_) => ErrorClass::Malformed,
            Error::Interrupted => ErrorClass::Cancelled,
            Error::Config { .. }
            | Error::Io(_)
            | Error::Timeout { .. }
            | Error::WorkerPanic(_)
            | Error::Other(_) => ErrorClass::Fatal,
        }
    }

    /// Whether the remote service rejected our credentials (HTTP 401)
    pub fn is_auth_rejected(&self) -> bool {
        self.class() == ErrorClass::AuthRejected
    }

    /// Build a configuration error for the given key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            Error::Interrupted
        } else {
            Error::WorkerPanic(err.to_string())
        }
    }
}
