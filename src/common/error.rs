//! Error types for the proxy core

use std::io;
use thiserror::Error;

/// Proxy error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Handshake timed out")]
    HandshakeTimeout,

    #[error("Handshake carried no destination")]
    NoDestination,

    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    #[error("Dial error: {0}")]
    Dial(String),

    #[error("Relay inactivity timeout")]
    RelayTimeout,

    #[error("Shutdown requested")]
    Shutdown,
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Error::Parse(msg.into())
    }

    pub fn auth<S: Into<String>>(msg: S) -> Self {
        Error::AuthRejected(msg.into())
    }

    pub fn dial<S: Into<String>>(msg: S) -> Self {
        Error::Dial(msg.into())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let e = Error::config("test error");
        assert!(matches!(e, Error::Config(_)));
    }

    #[test]
    fn test_error_display() {
        let e = Error::dial("connection refused");
        assert_eq!(e.to_string(), "Dial error: connection refused");

        assert_eq!(Error::RelayTimeout.to_string(), "Relay inactivity timeout");
    }
}
