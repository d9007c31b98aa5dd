//! DID/Service catalog
//!
//! Static mapping from symbolic names to UDS identifiers and their wire
//! encodings. Built once per target at engine construction and shared
//! read-only afterwards.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::hex_or_int;
use crate::session::SessionType;
use crate::uds::{standard_did, ServiceIds};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CatalogError {
    #[error("Unknown {kind}: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("Duplicate {kind} '{name}'")]
    Duplicate { kind: &'static str, name: String },

    #[error("Invalid {kind} '{name}': {reason}")]
    Invalid {
        kind: &'static str,
        name: String,
        reason: String,
    },
}

// =============================================================================
// Data types
// =============================================================================

/// Numeric wire representation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberKind {
    #[default]
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl NumberKind {
    pub fn size(&self) -> usize {
        match self {
            NumberKind::U8 | NumberKind::I8 => 1,
            NumberKind::U16 | NumberKind::I16 => 2,
            NumberKind::U32 | NumberKind::I32 | NumberKind::F32 => 4,
            NumberKind::U64 | NumberKind::I64 | NumberKind::F64 => 8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NumberKind::U8 => "u8",
            NumberKind::U16 => "u16",
            NumberKind::U32 => "u32",
            NumberKind::U64 => "u64",
            NumberKind::I8 => "i8",
            NumberKind::I16 => "i16",
            NumberKind::I32 => "i32",
            NumberKind::I64 => "i64",
            NumberKind::F32 => "f32",
            NumberKind::F64 => "f64",
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, NumberKind::F32 | NumberKind::F64)
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            NumberKind::I8 | NumberKind::I16 | NumberKind::I32 | NumberKind::I64
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

/// Declared payload type of a DID, routine result or actuator state
///
/// ```toml
/// data_type = { type = "number", kind = "u16", scale = 0.25 }
/// data_type = { type = "string", length = 17 }
/// data_type = { type = "array", count = 4, element = { type = "number", kind = "u8" } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataType {
    /// Fixed-width text, NUL padded
    String { length: usize },
    /// physical = raw * scale + offset
    Number {
        #[serde(default)]
        kind: NumberKind,
        #[serde(default = "default_scale")]
        scale: f64,
        #[serde(default)]
        offset: f64,
        #[serde(default)]
        byte_order: ByteOrder,
    },
    /// One byte, non-zero is true
    Boolean,
    /// Raw bytes; without a length the rest of the payload
    Bytes {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        length: Option<usize>,
    },
    Array { element: Box<DataType>, count: usize },
    Object { fields: Vec<FieldSpec> },
}

fn default_scale() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub data_type: DataType,
}

impl DataType {
    pub fn string(length: usize) -> Self {
        DataType::String { length }
    }

    pub fn number(kind: NumberKind) -> Self {
        DataType::Number {
            kind,
            scale: 1.0,
            offset: 0.0,
            byte_order: ByteOrder::Big,
        }
    }

    pub fn bytes(length: Option<usize>) -> Self {
        DataType::Bytes { length }
    }

    /// Encoded size, `None` for variable-length types
    pub fn fixed_len(&self) -> Option<usize> {
        match self {
            DataType::String { length } => Some(*length),
            DataType::Number { kind, .. } => Some(kind.size()),
            DataType::Boolean => Some(1),
            DataType::Bytes { length } => *length,
            DataType::Array { element, count } => element.fixed_len().map(|l| l * count),
            DataType::Object { fields } => fields
                .iter()
                .map(|f| f.data_type.fixed_len())
                .sum::<Option<usize>>(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            DataType::String { .. } => "string",
            DataType::Number { .. } => "number",
            DataType::Boolean => "boolean",
            DataType::Bytes { .. } => "bytes",
            DataType::Array { .. } => "array",
            DataType::Object { .. } => "object",
        }
    }

    /// Structural checks: no zero-width strings, scale must be usable, and
    /// variable-length bytes only in the last position
    fn check(&self, last: bool) -> Result<(), String> {
        match self {
            DataType::String { length: 0 } => Err("string length must be positive".into()),
            DataType::Number { scale, offset, .. } => {
                if *scale == 0.0 || !scale.is_finite() || !offset.is_finite() {
                    Err("number scale must be finite and non-zero".into())
                } else {
                    Ok(())
                }
            }
            DataType::Bytes { length: Some(0) } => Err("bytes length must be positive".into()),
            DataType::Bytes { length: None } if !last => {
                Err("variable-length bytes must be the last element".into())
            }
            DataType::Array { element, count } => {
                if *count == 0 {
                    return Err("array count must be positive".into());
                }
                if element.fixed_len().is_none() {
                    return Err("array elements must have a fixed length".into());
                }
                element.check(true)
            }
            DataType::Object { fields } => {
                if fields.is_empty() {
                    return Err("object needs at least one field".into());
                }
                let n = fields.len();
                for (i, f) in fields.iter().enumerate() {
                    f.data_type.check(last && i + 1 == n)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::String { length } => write!(f, "string[{length}]"),
            DataType::Number { kind, .. } => f.write_str(kind.as_str()),
            DataType::Boolean => f.write_str("boolean"),
            DataType::Bytes { length: Some(n) } => write!(f, "bytes[{n}]"),
            DataType::Bytes { length: None } => f.write_str("bytes"),
            DataType::Array { element, count } => write!(f, "{element}[{count}]"),
            DataType::Object { fields } => write!(f, "object{{{}}}", fields.len()),
        }
    }
}

// =============================================================================
// Catalog entries
// =============================================================================

/// Symbolic data item backed by a DID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DidMapping {
    pub name: String,
    #[serde(with = "hex_or_int")]
    pub did: u16,
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default)]
    pub writable: bool,
    /// Minimum security level for writes (0 = none)
    #[serde(default)]
    pub security_level: u8,
    /// Session required for writes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionType>,
}

impl DidMapping {
    pub fn read_only(name: &str, did: u16, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            did,
            data_type,
            unit: None,
            writable: false,
            security_level: 0,
            session: None,
        }
    }
}

/// Symbolic routine backed by a RoutineControl identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutineMapping {
    pub name: String,
    #[serde(with = "hex_or_int")]
    pub rid: u16,
    #[serde(default)]
    pub security_level: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionType>,
    /// Type of the routine status record; raw bytes when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_type: Option<DataType>,
}

/// Symbolic actuator backed by an InputOutputControl identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorMapping {
    pub name: String,
    #[serde(with = "hex_or_int")]
    pub ioid: u16,
    pub data_type: DataType,
    #[serde(default)]
    pub security_level: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionType>,
}

/// Requirements for ClearDiagnosticInformation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DtcPolicy {
    #[serde(default)]
    pub clear_security_level: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clear_session: Option<SessionType>,
}

/// Catalog section of the configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub data: Vec<DidMapping>,
    #[serde(default)]
    pub routines: Vec<RoutineMapping>,
    #[serde(default)]
    pub actuators: Vec<ActuatorMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtc: Option<DtcPolicy>,
}

// =============================================================================
// Service resolution
// =============================================================================

/// Kind of UDS service an operation needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    ReadData,
    WriteData,
    ReadDtc,
    ClearDtc,
    RoutineControl,
    SessionControl,
    SecurityAccess,
    IoControl,
    TesterPresent,
    EcuReset,
}

/// Service ID and default sub-function for an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceTemplate {
    pub service_id: u8,
    pub sub_function: Option<u8>,
}

// =============================================================================
// Catalog
// =============================================================================

/// Resolved catalog of one ECU target
#[derive(Debug, Clone)]
pub struct Catalog {
    data: BTreeMap<String, DidMapping>,
    routines: BTreeMap<String, RoutineMapping>,
    actuators: BTreeMap<String, ActuatorMapping>,
    dtc: DtcPolicy,
    services: ServiceIds,
}

impl Catalog {
    /// Standard identification DIDs seeded into every catalog
    pub fn standard_identification() -> Vec<DidMapping> {
        vec![
            DidMapping::read_only("vin", standard_did::VIN, DataType::string(17)),
            DidMapping::read_only(
                "ecu_serial_number",
                standard_did::ECU_SERIAL_NUMBER,
                DataType::string(16),
            ),
            DidMapping::read_only(
                "ecu_hardware_version",
                standard_did::ECU_HARDWARE_NUMBER,
                DataType::string(16),
            ),
            DidMapping::read_only(
                "ecu_software_version",
                standard_did::SUPPLIER_SW_NUMBER,
                DataType::string(16),
            ),
            DidMapping::read_only(
                "manufacturing_date",
                standard_did::ECU_MANUFACTURING_DATE,
                DataType::bytes(Some(3)),
            ),
            DidMapping::read_only(
                "system_supplier_id",
                standard_did::SYSTEM_SUPPLIER_ID,
                DataType::string(10),
            ),
            DidMapping::read_only(
                "active_diagnostic_session",
                standard_did::ACTIVE_DIAGNOSTIC_SESSION,
                DataType::number(NumberKind::U8),
            ),
        ]
    }

    /// Merge standard entries, the shared catalog and the target's own
    /// catalog. Later layers replace earlier entries of the same name; a name
    /// repeated within one layer is an error.
    pub fn build(
        shared: &CatalogConfig,
        local: &CatalogConfig,
        services: ServiceIds,
    ) -> Result<Self, CatalogError> {
        let mut data = BTreeMap::new();
        for m in Self::standard_identification() {
            data.insert(m.name.clone(), m);
        }
        let mut routines = BTreeMap::new();
        let mut actuators = BTreeMap::new();

        for layer in [shared, local] {
            merge_layer(&mut data, &layer.data, "data item", |m| &m.name)?;
            merge_layer(&mut routines, &layer.routines, "routine", |m| &m.name)?;
            merge_layer(&mut actuators, &layer.actuators, "actuator", |m| &m.name)?;
        }

        for m in data.values() {
            m.data_type.check(true).map_err(|reason| CatalogError::Invalid {
                kind: "data item",
                name: m.name.clone(),
                reason,
            })?;
        }
        for m in actuators.values() {
            m.data_type.check(true).map_err(|reason| CatalogError::Invalid {
                kind: "actuator",
                name: m.name.clone(),
                reason,
            })?;
        }
        for m in routines.values() {
            if let Some(t) = &m.result_type {
                t.check(true).map_err(|reason| CatalogError::Invalid {
                    kind: "routine",
                    name: m.name.clone(),
                    reason,
                })?;
            }
        }

        let dtc = local
            .dtc
            .clone()
            .or_else(|| shared.dtc.clone())
            .unwrap_or_default();

        Ok(Self {
            data,
            routines,
            actuators,
            dtc,
            services,
        })
    }

    /// Look up a data item by symbolic name
    pub fn resolve(&self, name: &str) -> Result<&DidMapping, CatalogError> {
        self.data.get(name).ok_or_else(|| CatalogError::NotFound {
            kind: "data item",
            name: name.to_string(),
        })
    }

    pub fn resolve_routine(&self, name: &str) -> Result<&RoutineMapping, CatalogError> {
        self.routines.get(name).ok_or_else(|| CatalogError::NotFound {
            kind: "routine",
            name: name.to_string(),
        })
    }

    pub fn resolve_actuator(&self, name: &str) -> Result<&ActuatorMapping, CatalogError> {
        self.actuators.get(name).ok_or_else(|| CatalogError::NotFound {
            kind: "actuator",
            name: name.to_string(),
        })
    }

    /// Service ID and default sub-function for an operation on this target
    pub fn resolve_operation(&self, kind: ServiceKind) -> ServiceTemplate {
        let s = &self.services;
        let (service_id, sub_function) = match kind {
            ServiceKind::ReadData => (s.read_data_by_id, None),
            ServiceKind::WriteData => (s.write_data_by_id, None),
            ServiceKind::ReadDtc => (s.read_dtc_info, Some(0x02)),
            ServiceKind::ClearDtc => (s.clear_diagnostic_info, None),
            ServiceKind::RoutineControl => (s.routine_control, Some(0x01)),
            ServiceKind::SessionControl => (s.diagnostic_session_control, Some(0x01)),
            ServiceKind::SecurityAccess => (s.security_access, Some(0x01)),
            ServiceKind::IoControl => (s.io_control_by_id, None),
            ServiceKind::TesterPresent => (s.tester_present, Some(0x00)),
            ServiceKind::EcuReset => (s.ecu_reset, Some(0x01)),
        };
        ServiceTemplate {
            service_id,
            sub_function,
        }
    }

    pub fn services(&self) -> &ServiceIds {
        &self.services
    }

    pub fn dtc_policy(&self) -> &DtcPolicy {
        &self.dtc
    }

    pub fn data(&self) -> impl Iterator<Item = &DidMapping> {
        self.data.values()
    }

    pub fn routines(&self) -> impl Iterator<Item = &RoutineMapping> {
        self.routines.values()
    }

    pub fn actuators(&self) -> impl Iterator<Item = &ActuatorMapping> {
        self.actuators.values()
    }
}

impl Default for Catalog {
    /// Standard identification entries only
    fn default() -> Self {
        Self {
            data: Self::standard_identification()
                .into_iter()
                .map(|m| (m.name.clone(), m))
                .collect(),
            routines: BTreeMap::new(),
            actuators: BTreeMap::new(),
            dtc: DtcPolicy::default(),
            services: ServiceIds::default(),
        }
    }
}

fn merge_layer<T: Clone>(
    into: &mut BTreeMap<String, T>,
    entries: &[T],
    kind: &'static str,
    name: impl Fn(&T) -> &String,
) -> Result<(), CatalogError> {
    let mut seen = std::collections::HashSet::new();
    for entry in entries {
        let n = name(entry);
        if !seen.insert(n.clone()) {
            return Err(CatalogError::Duplicate {
                kind,
                name: n.clone(),
            });
        }
        into.insert(n.clone(), entry.clone());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceOverrides;
    use pretty_assertions::assert_eq;

    fn parse(toml_str: &str) -> CatalogConfig {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn test_standard_vin() {
        let catalog = Catalog::default();
        let vin = catalog.resolve("vin").unwrap();
        assert_eq!(vin.did, 0xF190);
        assert_eq!(vin.data_type, DataType::String { length: 17 });
        assert!(!vin.writable);
    }

    #[test]
    fn test_not_found() {
        let catalog = Catalog::default();
        assert_eq!(
            catalog.resolve("warp_factor"),
            Err(CatalogError::NotFound {
                kind: "data item",
                name: "warp_factor".into()
            })
        );
        assert!(catalog.resolve_routine("self_destruct").is_err());
        assert!(catalog.resolve_actuator("fan").is_err());
    }

    #[test]
    fn test_layers_override_by_name() {
        let shared = parse(
            r#"
            [[data]]
            name = "coolant_temp"
            did = "0xF405"
            unit = "°C"
            data_type = { type = "number", kind = "u8", offset = -40.0 }
            "#,
        );
        let local = parse(
            r#"
            [[data]]
            name = "vin"
            did = 0xF190
            data_type = { type = "string", length = 17 }
            writable = true
            security_level = 1

            [[routines]]
            name = "self_test"
            rid = "0xFF00"
            result_type = { type = "number", kind = "u8" }

            [[actuators]]
            name = "fan"
            ioid = "0xF001"
            data_type = { type = "number", kind = "u8" }
            security_level = 1
            session = "extended"
            "#,
        );

        let catalog = Catalog::build(&shared, &local, ServiceIds::default()).unwrap();
        assert!(catalog.resolve("vin").unwrap().writable);
        assert_eq!(catalog.resolve("coolant_temp").unwrap().did, 0xF405);
        assert_eq!(catalog.resolve_routine("self_test").unwrap().rid, 0xFF00);
        let fan = catalog.resolve_actuator("fan").unwrap();
        assert_eq!(fan.ioid, 0xF001);
        assert_eq!(fan.session, Some(SessionType::Extended));
    }

    #[test]
    fn test_duplicate_in_layer() {
        let local = parse(
            r#"
            [[data]]
            name = "rpm"
            did = 1
            data_type = { type = "number", kind = "u16" }
            [[data]]
            name = "rpm"
            did = 2
            data_type = { type = "number", kind = "u16" }
            "#,
        );
        let err = Catalog::build(&CatalogConfig::default(), &local, ServiceIds::default());
        assert!(matches!(err, Err(CatalogError::Duplicate { .. })));
    }

    #[test]
    fn test_invalid_types_rejected() {
        for data_type in [
            "{ type = \"string\", length = 0 }",
            "{ type = \"number\", kind = \"u8\", scale = 0.0 }",
            "{ type = \"array\", count = 2, element = { type = \"bytes\" } }",
            "{ type = \"object\", fields = [{ name = \"a\", data_type = { type = \"bytes\" } }, { name = \"b\", data_type = { type = \"boolean\" } }] }",
        ] {
            let local = parse(&format!(
                "[[data]]\nname = \"x\"\ndid = 1\ndata_type = {data_type}\n"
            ));
            assert!(
                Catalog::build(&CatalogConfig::default(), &local, ServiceIds::default()).is_err(),
                "{data_type} should be rejected"
            );
        }
    }

    #[test]
    fn test_resolve_operation_honors_overrides() {
        let overrides = ServiceOverrides {
            write_data_by_id: Some(0xBC),
            ..Default::default()
        };
        let empty = CatalogConfig::default();
        let catalog =
            Catalog::build(&empty, &empty, ServiceIds::from_overrides(&overrides)).unwrap();

        assert_eq!(
            catalog.resolve_operation(ServiceKind::WriteData),
            ServiceTemplate {
                service_id: 0xBC,
                sub_function: None
            }
        );
        assert_eq!(
            catalog.resolve_operation(ServiceKind::ReadDtc),
            ServiceTemplate {
                service_id: 0x19,
                sub_function: Some(0x02)
            }
        );
        for (kind, sid) in [
            (ServiceKind::ReadData, 0x22),
            (ServiceKind::ClearDtc, 0x14),
            (ServiceKind::RoutineControl, 0x31),
            (ServiceKind::SessionControl, 0x10),
            (ServiceKind::SecurityAccess, 0x27),
            (ServiceKind::IoControl, 0x2F),
            (ServiceKind::TesterPresent, 0x3E),
            (ServiceKind::EcuReset, 0x11),
        ] {
            assert_eq!(catalog.resolve_operation(kind).service_id, sid);
        }
    }

    #[test]
    fn test_fixed_len() {
        let t = DataType::Array {
            element: Box::new(DataType::number(NumberKind::U16)),
            count: 3,
        };
        assert_eq!(t.fixed_len(), Some(6));
        assert_eq!(DataType::bytes(None).fixed_len(), None);
    }
}
