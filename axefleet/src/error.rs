//! Program-wide error type.
//!
//! The variants mirror how failures are handled, not where they occur:
//! transient faults mark a device offline for the tick, protocol faults
//! retain its previous state, configuration faults are rejected at write
//! time and never reach the control loop.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Device unreachable this cycle (timeout, refused connection).
    #[error("device unreachable: {0}")]
    Transient(String),

    /// A response arrived but could not be interpreted.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid rate, schedule, or fleet configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Persistence layer failure. The in-memory store never fails;
    /// durable backends report through this variant.
    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the failure means "could not reach the device", as
    /// opposed to "the device answered garbage".
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::Io(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Error::Transient(err.to_string())
        } else {
            Error::Protocol(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Protocol(err.to_string())
    }
}
