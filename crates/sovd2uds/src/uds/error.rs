//! Frame and value codec errors

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("Empty response frame")]
    Empty,

    #[error("Frame too short: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Unexpected response service 0x{actual:02X} (expected 0x{expected:02X})")]
    UnexpectedService { expected: u8, actual: u8 },

    #[error("Response echo mismatch: {0}")]
    EchoMismatch(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Value out of range: {0}")]
    ValueOutOfRange(String),

    #[error("Expected {expected} value, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}
