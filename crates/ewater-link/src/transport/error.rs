//! Transport layer errors

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to open {port}: {reason}")]
    OpenFailed { port: String, reason: String },

    #[error("Port not open")]
    NotConnected,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Failed to list ports: {0}")]
    Enumeration(String),

    #[error("Transport not supported: {0}")]
    Unsupported(String),
}
