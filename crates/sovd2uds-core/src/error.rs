//! Stable error identifiers shared with outer layers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error kinds surfaced by the translation engine.
///
/// Every engine error maps onto exactly one kind, so a caller can pick an
/// HTTP status without understanding UDS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unknown component or data item
    NotFound,
    /// Request parameters do not fit the catalog entry
    InvalidRequest,
    /// Response frame failed to parse
    MalformedResponse,
    /// ECU rejected the request with a negative response code
    NegativeResponse,
    /// ECU refused a diagnostic session change
    SessionTransitionDenied,
    /// Seed/key exchange failed
    SecurityAccessDenied,
    /// Deadline exceeded while queueing, retrying or waiting on a pending response
    Timeout,
    /// Link or foreign library failure
    TransportError,
    /// Connection cap reached and waiting is disabled
    ConnectionPoolExhausted,
}

impl ErrorKind {
    /// Stable identifier string
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::NegativeResponse => "negative_response",
            ErrorKind::SessionTransitionDenied => "session_transition_denied",
            ErrorKind::SecurityAccessDenied => "security_access_denied",
            ErrorKind::Timeout => "timeout",
            ErrorKind::TransportError => "transport_error",
            ErrorKind::ConnectionPoolExhausted => "connection_pool_exhausted",
        }
    }

    /// Returns the HTTP status code for this error kind
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidRequest => 400,
            ErrorKind::MalformedResponse => 502,
            ErrorKind::NegativeResponse => 502,
            ErrorKind::SessionTransitionDenied => 409,
            ErrorKind::SecurityAccessDenied => 403,
            ErrorKind::Timeout => 504,
            ErrorKind::TransportError => 503,
            ErrorKind::ConnectionPoolExhausted => 503,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detail attached to a failed response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Human-readable error message
    pub message: String,
    /// Service ID that was rejected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_id: Option<u8>,
    /// Negative Response Code from ECU
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nrc: Option<u8>,
    /// Symbolic NRC name (e.g. "RequestOutOfRange")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nrc_name: Option<String>,
    /// Foreign library error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    /// Set when the ECU mandates a delay before the next security attempt
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub delay_required: bool,
}

impl ErrorDetail {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}
