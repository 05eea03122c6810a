//! Error types for dlpool core

use std::io;
use thiserror::Error;

/// Errors that can occur in dlpool core
#[derive(Debug, Error)]
pub enum DlpoolError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Unsupported protocol: {0}")]
    Protocol(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },

    #[error("Timeout")]
    Timeout,

    #[error("Download was cancelled")]
    Cancelled,

    #[error("Engine is shutting down")]
    Shutdown,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DlpoolError {
    /// Cancellation and shutdown end a transfer on purpose; they are not failures
    pub fn is_signal(&self) -> bool {
        matches!(self, DlpoolError::Cancelled | DlpoolError::Shutdown)
    }

    /// Classify a failed read of a response body
    ///
    /// reqwest's blocking body reports its own timeout as an `Other` I/O
    /// error wrapping a `reqwest::Error`.
    pub(crate) fn from_body_read(error: io::Error) -> Self {
        if error.kind() == io::ErrorKind::TimedOut {
            return DlpoolError::Timeout;
        }
        let timed_out = error
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
            .is_some_and(|inner| inner.is_timeout());
        if timed_out {
            DlpoolError::Timeout
        } else {
            DlpoolError::Io(error)
        }
    }
}

impl From<reqwest::Error> for DlpoolError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            DlpoolError::Timeout
        } else if let Some(status) = error.status() {
            DlpoolError::Server {
                status: status.as_u16(),
                message: error.to_string(),
            }
        } else {
            DlpoolError::Connection(error.to_string())
        }
    }
}

impl From<serde_json::Error> for DlpoolError {
    fn from(error: serde_json::Error) -> Self {
        DlpoolError::Serialization(error.to_string())
    }
}

impl From<url::ParseError> for DlpoolError {
    fn from(error: url::ParseError) -> Self {
        DlpoolError::InvalidUrl(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signals_are_not_failures() {
        assert!(DlpoolError::Cancelled.is_signal());
        assert!(DlpoolError::Shutdown.is_signal());
        assert!(!DlpoolError::Timeout.is_signal());
        assert!(!DlpoolError::Protocol("gopher".into()).is_signal());
    }

    #[test]
    fn test_body_read_errors() {
        let timed_out = io::Error::new(io::ErrorKind::TimedOut, "read timed out");
        assert!(matches!(
            DlpoolError::from_body_read(timed_out),
            DlpoolError::Timeout
        ));

        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(matches!(
            DlpoolError::from_body_read(reset),
            DlpoolError::Io(e) if e.kind() == io::ErrorKind::ConnectionReset
        ));
    }

    #[test]
    fn test_url_parse_error_maps_to_invalid_url() {
        let error: DlpoolError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(error, DlpoolError::InvalidUrl(_)));
    }
}
