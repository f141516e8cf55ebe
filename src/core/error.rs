use std::io;
use thiserror::Error;

/// Custom error types for the miIO protocol engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Discovery incomplete, missing devices: {}", missing.join(", "))]
    Discovery {
        /// Names of configured devices that never replied
        missing: Vec<String>,
    },
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Creates a new network error
    pub fn network(msg: impl Into<String>) -> Self {
        Error::Network(msg.into())
    }

    /// Creates a new crypto error
    pub fn crypto(msg: impl Into<String>) -> Self {
        Error::Crypto(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Returns true for the per-attempt failures the retry layer absorbs
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout | Error::Network(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::protocol("test error");
        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(err.to_string(), "Protocol error: test error");
    }

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::Other, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_discovery_error_names_devices() {
        let err = Error::Discovery {
            missing: vec!["Lamp".to_string(), "Plug".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Discovery incomplete, missing devices: Lamp, Plug"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(Error::Timeout.is_retryable());
        assert!(Error::network("send failed").is_retryable());
        assert!(!Error::config("bad token").is_retryable());
    }
}
