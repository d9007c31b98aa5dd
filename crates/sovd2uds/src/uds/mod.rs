//! UDS (Unified Diagnostic Services) protocol layer
//!
//! Pure, synchronous codecs: request/response frames, NRCs, payload values
//! and DTC records. Nothing in here touches a connection.

pub mod dtc;
mod error;
pub mod frame;
mod nrc;
pub mod value;

pub use dtc::{Dtc, DtcCategory, DtcCount, DtcStatus};
pub use error::CodecError;
pub use frame::{decode_response, encode_request, UdsRequest, UdsResponse};
pub use nrc::{NegativeResponseCode, NrcCategory};
pub use value::{decode_value, encode_value};

use crate::config::ServiceOverrides;

/// Standard UDS service ID constants
pub mod service_id {
    pub const DIAGNOSTIC_SESSION_CONTROL: u8 = 0x10;
    pub const ECU_RESET: u8 = 0x11;
    pub const CLEAR_DIAGNOSTIC_INFO: u8 = 0x14;
    pub const READ_DTC_INFO: u8 = 0x19;
    pub const READ_DATA_BY_ID: u8 = 0x22;
    pub const SECURITY_ACCESS: u8 = 0x27;
    pub const WRITE_DATA_BY_ID: u8 = 0x2E;
    pub const IO_CONTROL_BY_ID: u8 = 0x2F;
    pub const ROUTINE_CONTROL: u8 = 0x31;
    pub const TESTER_PRESENT: u8 = 0x3E;
}

/// ECUReset (0x11) reset types
pub mod reset_type {
    pub const HARD_RESET: u8 = 0x01;
    pub const KEY_OFF_ON_RESET: u8 = 0x02;
    pub const SOFT_RESET: u8 = 0x03;
}

/// RoutineControl (0x31) sub-functions
pub mod routine_sub_function {
    pub const START_ROUTINE: u8 = 0x01;
    pub const STOP_ROUTINE: u8 = 0x02;
    pub const REQUEST_ROUTINE_RESULTS: u8 = 0x03;
}

/// InputOutputControlById (0x2F) control options
pub mod io_control_option {
    pub const RETURN_CONTROL_TO_ECU: u8 = 0x00;
    pub const RESET_TO_DEFAULT: u8 = 0x01;
    pub const FREEZE_CURRENT_STATE: u8 = 0x02;
    pub const SHORT_TERM_ADJUSTMENT: u8 = 0x03;
}

/// Standard identification DIDs (ISO 14229-1 Annex C)
pub mod standard_did {
    pub const ACTIVE_DIAGNOSTIC_SESSION: u16 = 0xF186;
    pub const SYSTEM_SUPPLIER_ID: u16 = 0xF18A;
    pub const ECU_MANUFACTURING_DATE: u16 = 0xF18B;
    pub const ECU_SERIAL_NUMBER: u16 = 0xF18C;
    pub const VIN: u16 = 0xF190;
    pub const ECU_HARDWARE_NUMBER: u16 = 0xF191;
    pub const SUPPLIER_SW_NUMBER: u16 = 0xF194;
}

/// Resolved service IDs for a specific ECU
///
/// Starts from the standard UDS service IDs and applies any OEM-specific
/// overrides from the target configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceIds {
    pub diagnostic_session_control: u8,
    pub ecu_reset: u8,
    pub clear_diagnostic_info: u8,
    pub read_dtc_info: u8,
    pub read_data_by_id: u8,
    pub security_access: u8,
    pub write_data_by_id: u8,
    pub io_control_by_id: u8,
    pub routine_control: u8,
    pub tester_present: u8,
}

impl Default for ServiceIds {
    fn default() -> Self {
        Self {
            diagnostic_session_control: service_id::DIAGNOSTIC_SESSION_CONTROL,
            ecu_reset: service_id::ECU_RESET,
            clear_diagnostic_info: service_id::CLEAR_DIAGNOSTIC_INFO,
            read_dtc_info: service_id::READ_DTC_INFO,
            read_data_by_id: service_id::READ_DATA_BY_ID,
            security_access: service_id::SECURITY_ACCESS,
            write_data_by_id: service_id::WRITE_DATA_BY_ID,
            io_control_by_id: service_id::IO_CONTROL_BY_ID,
            routine_control: service_id::ROUTINE_CONTROL,
            tester_present: service_id::TESTER_PRESENT,
        }
    }
}

impl ServiceIds {
    /// Create ServiceIds with OEM-specific overrides applied
    pub fn from_overrides(overrides: &ServiceOverrides) -> Self {
        let d = Self::default();
        Self {
            diagnostic_session_control: overrides
                .diagnostic_session_control
                .unwrap_or(d.diagnostic_session_control),
            ecu_reset: overrides.ecu_reset.unwrap_or(d.ecu_reset),
            clear_diagnostic_info: overrides
                .clear_diagnostic_info
                .unwrap_or(d.clear_diagnostic_info),
            read_dtc_info: overrides.read_dtc_info.unwrap_or(d.read_dtc_info),
            read_data_by_id: overrides.read_data_by_id.unwrap_or(d.read_data_by_id),
            security_access: overrides.security_access.unwrap_or(d.security_access),
            write_data_by_id: overrides.write_data_by_id.unwrap_or(d.write_data_by_id),
            io_control_by_id: overrides.io_control_by_id.unwrap_or(d.io_control_by_id),
            routine_control: overrides.routine_control.unwrap_or(d.routine_control),
            tester_present: overrides.tester_present.unwrap_or(d.tester_present),
        }
    }
}
