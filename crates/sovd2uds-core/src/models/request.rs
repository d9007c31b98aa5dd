//! Inbound symbolic request

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::SovdValue;

/// Kind of symbolic operation requested by the outer layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    ReadData,
    WriteData,
    ReadDtc,
    ClearDtc,
    ControlActuator,
    ExecuteRoutine,
    SessionControl,
    SecurityAccess,
    EcuReset,
}

impl OperationKind {
    pub const ALL: [OperationKind; 9] = [
        OperationKind::ReadData,
        OperationKind::WriteData,
        OperationKind::ReadDtc,
        OperationKind::ClearDtc,
        OperationKind::ControlActuator,
        OperationKind::ExecuteRoutine,
        OperationKind::SessionControl,
        OperationKind::SecurityAccess,
        OperationKind::EcuReset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::ReadData => "read_data",
            OperationKind::WriteData => "write_data",
            OperationKind::ReadDtc => "read_dtc",
            OperationKind::ClearDtc => "clear_dtc",
            OperationKind::ControlActuator => "control_actuator",
            OperationKind::ExecuteRoutine => "execute_routine",
            OperationKind::SessionControl => "session_control",
            OperationKind::SecurityAccess => "security_access",
            OperationKind::EcuReset => "ecu_reset",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown operation kind '{s}'"))
    }
}

/// Named request parameters
pub type Parameters = BTreeMap<String, SovdValue>;

/// A symbolic operation request
///
/// ```text
/// { component_id: "engine", operation_kind: "read_data", identifier: "vin" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SovdRequest {
    /// Component (ECU target) identifier, e.g. "engine"
    pub component_id: String,
    pub operation_kind: OperationKind,
    /// Data item, DTC selector, routine, actuator, session or level
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Parameters>,
    /// Overall deadline override in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl SovdRequest {
    pub fn new(
        component_id: impl Into<String>,
        operation_kind: OperationKind,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            component_id: component_id.into(),
            operation_kind,
            identifier: identifier.into(),
            parameters: None,
            timeout_ms: None,
        }
    }

    /// Add a parameter
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<SovdValue>) -> Self {
        self.parameters
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Override the overall deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn param(&self, key: &str) -> Option<&SovdValue> {
        self.parameters.as_ref().and_then(|p| p.get(key))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}
