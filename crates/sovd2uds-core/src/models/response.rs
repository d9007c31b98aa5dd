//! Response envelope returned to the outer layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SovdValue;
use crate::error::{ErrorDetail, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Failure,
}

/// Result of one symbolic operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SovdResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<SovdValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<ErrorDetail>,
    /// Correlates the response with log output
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl SovdResponse {
    pub fn success(request_id: Uuid, data: Option<SovdValue>) -> Self {
        Self {
            status: ResponseStatus::Success,
            data,
            error_kind: None,
            error_detail: None,
            request_id,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(request_id: Uuid, kind: ErrorKind, detail: ErrorDetail) -> Self {
        Self {
            status: ResponseStatus::Failure,
            data: None,
            error_kind: Some(kind),
            error_detail: Some(detail),
            request_id,
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// HTTP status an outer REST layer should answer with
    pub fn status_code(&self) -> u16 {
        self.error_kind.map(|k| k.status_code()).unwrap_or(200)
    }
}
