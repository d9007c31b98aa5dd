//! UDS request/response frame codec
//!
//! Frames crossing the FFI boundary are exactly these byte sequences; the
//! linked client library adds any transport framing.

use super::{CodecError, NegativeResponseCode};

/// Negative response marker
pub const NEGATIVE_RESPONSE: u8 = 0x7F;
/// Added to the request service ID to form a positive response ID
pub const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;

/// A request frame: service ID, optional sub-function, payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdsRequest {
    pub service_id: u8,
    pub sub_function: Option<u8>,
    pub payload: Vec<u8>,
}

impl UdsRequest {
    pub fn new(service_id: u8) -> Self {
        Self {
            service_id,
            sub_function: None,
            payload: Vec::new(),
        }
    }

    pub fn with_sub_function(mut self, sub_function: u8) -> Self {
        self.sub_function = Some(sub_function);
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Append a 16-bit identifier (DID, RID, IOID) big-endian
    pub fn with_id(mut self, id: u16) -> Self {
        self.payload.extend_from_slice(&id.to_be_bytes());
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_request(self.service_id, self.sub_function, &self.payload)
    }
}

/// Build a request frame: `[service_id, sub_function?, payload...]`
pub fn encode_request(service_id: u8, sub_function: Option<u8>, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(2 + payload.len());
    frame.push(service_id);
    if let Some(sub) = sub_function {
        frame.push(sub);
    }
    frame.extend_from_slice(payload);
    frame
}

/// A decoded response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UdsResponse {
    /// `service_id` is the response ID (request ID + 0x40)
    Positive { service_id: u8, payload: Vec<u8> },
    /// `service_id` is the rejected request's service ID
    Negative {
        service_id: u8,
        nrc: NegativeResponseCode,
    },
}

impl UdsResponse {
    /// True for NRC 0x78: the final answer is still to come on this exchange
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            UdsResponse::Negative {
                nrc: NegativeResponseCode::ResponsePending,
                ..
            }
        )
    }
}

/// Decode a response frame to a request with service ID `request_sid`.
///
/// A negative response needs the full `[0x7F, sid, nrc]` and must echo
/// `request_sid`. Positive frames
/// carry at least one byte after the response ID, except the bare `0x54` of
/// ClearDiagnosticInformation.
pub fn decode_response(request_sid: u8, frame: &[u8]) -> Result<UdsResponse, CodecError> {
    let (&first, rest) = frame.split_first().ok_or(CodecError::Empty)?;
    if rest.is_empty() && request_sid != super::service_id::CLEAR_DIAGNOSTIC_INFO {
        return Err(CodecError::Truncated {
            expected: 2,
            actual: 1,
        });
    }

    if first == NEGATIVE_RESPONSE {
        if frame.len() < 3 {
            return Err(CodecError::Truncated {
                expected: 3,
                actual: frame.len(),
            });
        }
        if rest[0] != request_sid {
            return Err(CodecError::UnexpectedService {
                expected: request_sid,
                actual: rest[0],
            });
        }
        return Ok(UdsResponse::Negative {
            service_id: rest[0],
            nrc: NegativeResponseCode::from(rest[1]),
        });
    }

    let expected = request_sid.wrapping_add(POSITIVE_RESPONSE_OFFSET);
    if first != expected {
        return Err(CodecError::UnexpectedService {
            expected,
            actual: first,
        });
    }

    Ok(UdsResponse::Positive {
        service_id: first,
        payload: rest.to_vec(),
    })
}
