//! Transport layer errors

use thiserror::Error;

/// Failures at the client-library boundary. Foreign status codes are
/// translated into these variants before leaving the transport module.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to open connection: {0}")]
    Open(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout after {0} ms")]
    Timeout(u64),

    #[error("Request of {size} bytes exceeds maximum frame size {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Response exceeds maximum frame size {max}")]
    ResponseTooLarge { max: usize },

    #[error("Client library error {code}: {message}")]
    Foreign { code: i32, message: String },

    #[error("Transport not supported: {0}")]
    Unsupported(String),

    #[error("Transport worker failed: {0}")]
    Worker(String),
}

impl TransportError {
    /// Numeric code reported in error details
    pub fn code(&self) -> Option<i32> {
        match self {
            TransportError::Foreign { code, .. } => Some(*code),
            _ => None,
        }
    }
}
