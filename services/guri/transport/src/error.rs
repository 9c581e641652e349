//! Transport error types.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by a transport binding
#[derive(Error, Debug)]
pub enum TransportError {
    /// Underlying read or write failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port could not be opened or configured
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// TLS setup or handshake failed
    #[error("TLS error: {0}")]
    Tls(String),

    /// The receive stream has ended
    #[error("stream closed")]
    Closed,

    /// Operation did not finish in time
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Operation needs a connected transport
    #[error("not connected")]
    NotConnected,

    /// Remote address is not `host:port`
    #[error("invalid remote address {0:?}")]
    InvalidAddress(String),
}

impl From<rustls::Error> for TransportError {
    fn from(err: rustls::Error) -> Self {
        TransportError::Tls(err.to_string())
    }
}

impl From<tokio::task::JoinError> for TransportError {
    fn from(err: tokio::task::JoinError) -> Self {
        TransportError::Io(std::io::Error::other(err))
    }
}
