//! Engine errors

use sovd2uds_core::{ErrorDetail, ErrorKind};
use thiserror::Error;

use crate::catalog::CatalogError;
use crate::session::SessionType;
use crate::transport::TransportError;
use crate::uds::{CodecError, NegativeResponseCode};

/// Why a SecurityAccess exchange was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityDenial {
    InvalidKey,
    ExceededAttempts,
    TimeDelayNotExpired,
    /// Any other refusal of the seed or key request
    AccessDenied,
}

impl SecurityDenial {
    pub fn from_nrc(nrc: NegativeResponseCode) -> Self {
        match nrc {
            NegativeResponseCode::InvalidKey => SecurityDenial::InvalidKey,
            NegativeResponseCode::ExceededNumberOfAttempts => SecurityDenial::ExceededAttempts,
            NegativeResponseCode::RequiredTimeDelayNotExpired => {
                SecurityDenial::TimeDelayNotExpired
            }
            _ => SecurityDenial::AccessDenied,
        }
    }

    /// The ECU enforces a delay before the next attempt
    pub fn delay_required(&self) -> bool {
        matches!(
            self,
            SecurityDenial::ExceededAttempts | SecurityDenial::TimeDelayNotExpired
        )
    }
}

impl std::fmt::Display for SecurityDenial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SecurityDenial::InvalidKey => "invalid key",
            SecurityDenial::ExceededAttempts => "exceeded number of attempts",
            SecurityDenial::TimeDelayNotExpired => "required time delay not expired",
            SecurityDenial::AccessDenied => "access denied",
        })
    }
}

/// Error returned by every engine operation
#[derive(Debug, Error)]
pub enum DiagError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Negative response to service 0x{service_id:02X}: {nrc} (0x{:02X})", .nrc.code())]
    NegativeResponse {
        service_id: u8,
        nrc: NegativeResponseCode,
    },

    #[error("Transition to {requested} session denied: {nrc}")]
    SessionTransitionDenied {
        requested: SessionType,
        nrc: NegativeResponseCode,
    },

    #[error("Security access level {level} denied: {reason}")]
    SecurityAccessDenied {
        level: u8,
        reason: SecurityDenial,
        nrc: Option<NegativeResponseCode>,
    },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Connection pool exhausted ({max} connections open)")]
    ConnectionPoolExhausted { max: usize },
}

impl DiagError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DiagError::NotFound(_) => ErrorKind::NotFound,
            DiagError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            DiagError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            DiagError::NegativeResponse { .. } => ErrorKind::NegativeResponse,
            DiagError::SessionTransitionDenied { .. } => ErrorKind::SessionTransitionDenied,
            DiagError::SecurityAccessDenied { .. } => ErrorKind::SecurityAccessDenied,
            DiagError::Timeout(_) => ErrorKind::Timeout,
            DiagError::Transport(_) => ErrorKind::TransportError,
            DiagError::ConnectionPoolExhausted { .. } => ErrorKind::ConnectionPoolExhausted,
        }
    }

    /// Structured detail for the response envelope
    pub fn detail(&self) -> ErrorDetail {
        let mut detail = ErrorDetail::new(self.to_string());
        let nrc = match self {
            DiagError::NegativeResponse { service_id, nrc } => {
                detail.service_id = Some(*service_id);
                Some(*nrc)
            }
            DiagError::SessionTransitionDenied { nrc, .. } => Some(*nrc),
            DiagError::SecurityAccessDenied { reason, nrc, .. } => {
                detail.delay_required = reason.delay_required();
                *nrc
            }
            DiagError::Transport(e) => {
                detail.code = e.code();
                None
            }
            _ => None,
        };
        if let Some(nrc) = nrc {
            detail.nrc = Some(nrc.code());
            detail.nrc_name = Some(nrc.name().to_string());
        }
        detail
    }

    /// Whether the session's link can no longer be trusted
    pub fn is_connection_fault(&self) -> bool {
        matches!(self, DiagError::Transport(_) | DiagError::Timeout(_))
    }

    pub fn negative(service_id: u8, nrc: NegativeResponseCode) -> Self {
        DiagError::NegativeResponse { service_id, nrc }
    }
}

impl From<TransportError> for DiagError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(ms) => {
                DiagError::Timeout(format!("no response within {ms} ms"))
            }
            other => DiagError::Transport(other),
        }
    }
}

impl From<CodecError> for DiagError {
    fn from(err: CodecError) -> Self {
        DiagError::MalformedResponse(err.to_string())
    }
}

impl From<CatalogError> for DiagError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound { .. } => DiagError::NotFound(err.to_string()),
            other => DiagError::InvalidRequest(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DiagError>;
