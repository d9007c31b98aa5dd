//! DTC (Diagnostic Trouble Code) records for ReadDTCInformation (0x19)
//!
//! Parsers take the positive payload, i.e. everything after the response
//! service ID, starting with the echoed report type.

use sovd2uds_core::SovdValue;

use super::CodecError;

/// Report types of ReadDTCInformation (0x19)
pub mod sub_function {
    pub const REPORT_NUMBER_OF_DTC_BY_STATUS_MASK: u8 = 0x01;
    pub const REPORT_DTC_BY_STATUS_MASK: u8 = 0x02;
    pub const REPORT_DTC_SNAPSHOT_RECORD_BY_DTC_NUMBER: u8 = 0x04;
    pub const REPORT_DTC_EXTENDED_DATA_RECORD_BY_DTC_NUMBER: u8 = 0x06;
}

/// Group-of-DTC values for ClearDiagnosticInformation (0x14)
pub mod dtc_group {
    pub const ALL: u32 = 0xFFFFFF;
}

/// DTC status byte bits (ISO 14229-1 D.2)
pub mod status_bit {
    pub const TEST_FAILED: u8 = 0x01;
    pub const TEST_FAILED_THIS_OPERATION_CYCLE: u8 = 0x02;
    pub const PENDING_DTC: u8 = 0x04;
    pub const CONFIRMED_DTC: u8 = 0x08;
    pub const TEST_NOT_COMPLETED_SINCE_LAST_CLEAR: u8 = 0x10;
    pub const TEST_FAILED_SINCE_LAST_CLEAR: u8 = 0x20;
    pub const TEST_NOT_COMPLETED_THIS_OPERATION_CYCLE: u8 = 0x40;
    pub const WARNING_INDICATOR_REQUESTED: u8 = 0x80;
}

/// System letter of a DTC, from the two high bits of the first byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtcCategory {
    /// P codes
    Powertrain,
    /// C codes
    Chassis,
    /// B codes
    Body,
    /// U codes
    Network,
}

impl DtcCategory {
    pub fn from_high_byte(high_byte: u8) -> Self {
        match high_byte >> 6 {
            0 => DtcCategory::Powertrain,
            1 => DtcCategory::Chassis,
            2 => DtcCategory::Body,
            _ => DtcCategory::Network,
        }
    }

    fn from_prefix(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'P' => Some(DtcCategory::Powertrain),
            'C' => Some(DtcCategory::Chassis),
            'B' => Some(DtcCategory::Body),
            'U' => Some(DtcCategory::Network),
            _ => None,
        }
    }

    pub fn prefix(&self) -> char {
        match self {
            DtcCategory::Powertrain => 'P',
            DtcCategory::Chassis => 'C',
            DtcCategory::Body => 'B',
            DtcCategory::Network => 'U',
        }
    }

    fn bits(&self) -> u8 {
        match self {
            DtcCategory::Powertrain => 0,
            DtcCategory::Chassis => 1,
            DtcCategory::Body => 2,
            DtcCategory::Network => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DtcCategory::Powertrain => "powertrain",
            DtcCategory::Chassis => "chassis",
            DtcCategory::Body => "body",
            DtcCategory::Network => "network",
        }
    }
}

impl std::fmt::Display for DtcCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// DTC status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtcStatus(pub u8);

impl DtcStatus {
    fn bit(&self, mask: u8) -> bool {
        self.0 & mask != 0
    }

    pub fn test_failed(&self) -> bool {
        self.bit(status_bit::TEST_FAILED)
    }

    pub fn pending(&self) -> bool {
        self.bit(status_bit::PENDING_DTC)
    }

    pub fn confirmed(&self) -> bool {
        self.bit(status_bit::CONFIRMED_DTC)
    }

    /// Test failed and confirmed
    pub fn is_active(&self) -> bool {
        self.test_failed() && self.confirmed()
    }

    pub fn matches_mask(&self, mask: u8) -> bool {
        self.0 & mask != 0
    }

    pub fn to_value(&self) -> SovdValue {
        use status_bit::*;
        SovdValue::object([
            ("test_failed", SovdValue::Bool(self.bit(TEST_FAILED))),
            (
                "test_failed_this_operation_cycle",
                SovdValue::Bool(self.bit(TEST_FAILED_THIS_OPERATION_CYCLE)),
            ),
            ("pending", SovdValue::Bool(self.bit(PENDING_DTC))),
            ("confirmed", SovdValue::Bool(self.bit(CONFIRMED_DTC))),
            (
                "test_not_completed_since_last_clear",
                SovdValue::Bool(self.bit(TEST_NOT_COMPLETED_SINCE_LAST_CLEAR)),
            ),
            (
                "test_failed_since_last_clear",
                SovdValue::Bool(self.bit(TEST_FAILED_SINCE_LAST_CLEAR)),
            ),
            (
                "test_not_completed_this_operation_cycle",
                SovdValue::Bool(self.bit(TEST_NOT_COMPLETED_THIS_OPERATION_CYCLE)),
            ),
            (
                "warning_indicator_requested",
                SovdValue::Bool(self.bit(WARNING_INDICATOR_REQUESTED)),
            ),
            ("raw", SovdValue::Integer(self.0 as i64)),
        ])
    }
}

/// A DTC with its status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dtc {
    /// High, middle and low (failure type) byte
    pub code: [u8; 3],
    pub status: DtcStatus,
}

impl Dtc {
    pub fn new(high: u8, mid: u8, low: u8, status: u8) -> Self {
        Self {
            code: [high, mid, low],
            status: DtcStatus(status),
        }
    }

    pub fn category(&self) -> DtcCategory {
        DtcCategory::from_high_byte(self.code[0])
    }

    /// SAE J2012 display form, e.g. `P0101` or `U0100`
    pub fn to_code_string(&self) -> String {
        format!(
            "{}{:X}{:X}{:02X}",
            self.category().prefix(),
            (self.code[0] >> 4) & 0x03,
            self.code[0] & 0x0F,
            self.code[1]
        )
    }

    /// All three bytes as hex, e.g. `010100`
    pub fn to_id(&self) -> String {
        hex::encode_upper(self.code)
    }

    /// Parse a DTC given as `P0101`, `P01011A` (with failure type) or six
    /// hex digits.
    pub fn parse_code(s: &str) -> Option<[u8; 3]> {
        let s = s.trim();
        let bytes = match s.len() {
            5 | 7 => {
                let category = DtcCategory::from_prefix(s.chars().next()?)?;
                let digits = s.get(1..)?;
                let mut bytes = hex::decode(digits.get(..4)?).ok()?;
                bytes.push(match digits.get(4..) {
                    Some(ft) if !ft.is_empty() => u8::from_str_radix(ft, 16).ok()?,
                    _ => 0x00,
                });
                if bytes[0] > 0x3F {
                    return None;
                }
                bytes[0] |= category.bits() << 6;
                bytes
            }
            6 => hex::decode(s).ok()?,
            _ => return None,
        };
        Some([bytes[0], bytes[1], bytes[2]])
    }

    /// Whether `code` (any form accepted by [`Dtc::parse_code`]) names this
    /// DTC. The short form matches every failure type.
    pub fn matches(&self, code: &str) -> bool {
        let trimmed = code.trim();
        if trimmed.len() == 5 {
            return trimmed.eq_ignore_ascii_case(&self.to_code_string());
        }
        Self::parse_code(trimmed) == Some(self.code)
    }

    pub fn to_value(&self) -> SovdValue {
        SovdValue::object([
            ("code", SovdValue::String(self.to_code_string())),
            ("id", SovdValue::String(self.to_id())),
            ("status", self.status.to_value()),
            ("category", SovdValue::from(self.category().as_str())),
        ])
    }
}

/// Result of reportNumberOfDTCByStatusMask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtcCount {
    pub status_availability_mask: u8,
    pub format_identifier: u8,
    pub count: u16,
}

impl DtcCount {
    pub fn to_value(&self) -> SovdValue {
        SovdValue::object([
            ("count", SovdValue::Integer(self.count as i64)),
            (
                "status_availability_mask",
                SovdValue::Integer(self.status_availability_mask as i64),
            ),
            (
                "format_identifier",
                SovdValue::Integer(self.format_identifier as i64),
            ),
        ])
    }
}

/// Snapshot or extended data of one DTC. Record contents depend on
/// ECU-specific DID lengths, so each record is kept as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtcRecords {
    pub dtc: Dtc,
    pub record_number: Option<u8>,
    pub data: Vec<u8>,
}

impl DtcRecords {
    pub fn to_value(&self) -> SovdValue {
        let mut fields = match self.dtc.to_value() {
            SovdValue::Object(fields) => fields,
            other => vec![("dtc".to_string(), other)],
        };
        if let Some(n) = self.record_number {
            fields.push(("record".to_string(), SovdValue::Integer(n as i64)));
        }
        fields.push(("data".to_string(), SovdValue::Bytes(self.data.clone())));
        SovdValue::Object(fields)
    }
}

fn check_report(payload: &[u8], expected: u8, min_len: usize) -> Result<(), CodecError> {
    let &report = payload.first().ok_or(CodecError::Truncated {
        expected: min_len,
        actual: 0,
    })?;
    if report != expected {
        return Err(CodecError::EchoMismatch(format!(
            "report type 0x{report:02X}, expected 0x{expected:02X}"
        )));
    }
    if payload.len() < min_len {
        return Err(CodecError::Truncated {
            expected: min_len,
            actual: payload.len(),
        });
    }
    Ok(())
}

/// Parse `[0x01, availability, format, count_hi, count_lo]`
pub fn parse_count(payload: &[u8]) -> Result<DtcCount, CodecError> {
    check_report(payload, sub_function::REPORT_NUMBER_OF_DTC_BY_STATUS_MASK, 5)?;
    Ok(DtcCount {
        status_availability_mask: payload[1],
        format_identifier: payload[2],
        count: u16::from_be_bytes([payload[3], payload[4]]),
    })
}

/// Parse `[0x02, availability, {dtc_hi, dtc_mid, dtc_lo, status}*]`,
/// preserving ECU order
pub fn parse_by_status_mask(payload: &[u8]) -> Result<(u8, Vec<Dtc>), CodecError> {
    check_report(payload, sub_function::REPORT_DTC_BY_STATUS_MASK, 2)?;
    let records = &payload[2..];
    if records.len() % 4 != 0 {
        return Err(CodecError::InvalidData(format!(
            "{} trailing bytes after DTC records",
            records.len() % 4
        )));
    }
    let dtcs = records
        .chunks_exact(4)
        .map(|c| Dtc::new(c[0], c[1], c[2], c[3]))
        .collect();
    Ok((payload[1], dtcs))
}

/// Parse a 0x04 or 0x06 report:
/// `[report, dtc_hi, dtc_mid, dtc_lo, status, record_number?, data...]`
pub fn parse_records(report: u8, payload: &[u8]) -> Result<DtcRecords, CodecError> {
    check_report(payload, report, 5)?;
    let dtc = Dtc::new(payload[1], payload[2], payload[3], payload[4]);
    let rest = &payload[5..];
    Ok(DtcRecords {
        dtc,
        record_number: rest.first().copied(),
        data: rest.get(1..).unwrap_or_default().to_vec(),
    })
}

/// Serialize DTCs back into a 0x02 report; used by the simulated ECU
pub fn encode_by_status_mask(availability: u8, dtcs: &[Dtc]) -> Vec<u8> {
    let mut out = vec![sub_function::REPORT_DTC_BY_STATUS_MASK, availability];
    for dtc in dtcs {
        out.extend_from_slice(&dtc.code);
        out.push(dtc.status.0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case([0x01, 0x01, 0x00], "P0101", DtcCategory::Powertrain)]
    #[case([0x44, 0x20, 0x00], "C0420", DtcCategory::Chassis)]
    #[case([0x92, 0x34, 0x00], "B1234", DtcCategory::Body)]
    #[case([0xC1, 0x00, 0x00], "U0100", DtcCategory::Network)]
    fn test_code_string(
        #[case] bytes: [u8; 3],
        #[case] code: &str,
        #[case] category: DtcCategory,
    ) {
        let dtc = Dtc::new(bytes[0], bytes[1], bytes[2], 0x00);
        assert_eq!(dtc.to_code_string(), code);
        assert_eq!(dtc.category(), category);
        assert_eq!(Dtc::parse_code(code), Some(bytes));
    }

    #[test]
    fn test_parse_code_forms() {
        assert_eq!(Dtc::parse_code("P01011A"), Some([0x01, 0x01, 0x1A]));
        assert_eq!(Dtc::parse_code("c0420"), Some([0x44, 0x20, 0x00]));
        assert_eq!(Dtc::parse_code("010100"), Some([0x01, 0x01, 0x00]));
        assert_eq!(Dtc::parse_code("X0101"), None);
        assert_eq!(Dtc::parse_code("P4101"), None);
        assert_eq!(Dtc::parse_code("P01"), None);
    }

    #[test]
    fn test_matches() {
        let dtc = Dtc::new(0x01, 0x01, 0x1A, 0x09);
        assert!(dtc.matches("P0101"));
        assert!(dtc.matches("p0101"));
        assert!(dtc.matches("01011A"));
        assert!(!dtc.matches("010100"));
        assert!(!dtc.matches("C0420"));
    }

    #[test]
    fn test_status() {
        let active = DtcStatus(0x09);
        assert!(active.test_failed());
        assert!(active.confirmed());
        assert!(!active.pending());
        assert!(active.is_active());

        let pending = DtcStatus(0x04);
        assert!(pending.pending());
        assert!(!pending.is_active());
        assert!(pending.matches_mask(0xFF));
        assert!(!pending.matches_mask(0x08));
    }

    #[test]
    fn test_parse_count() {
        let count = parse_count(&[0x01, 0xFF, 0x01, 0x00, 0x05]).unwrap();
        assert_eq!(
            count,
            DtcCount {
                status_availability_mask: 0xFF,
                format_identifier: 0x01,
                count: 5
            }
        );
    }

    #[test]
    fn test_parse_by_status_mask_keeps_order() {
        let payload = [
            0x02, 0xFF, //
            0x44, 0x20, 0x00, 0x04, // C0420 pending
            0x01, 0x01, 0x00, 0x09, // P0101 active
        ];
        let (mask, dtcs) = parse_by_status_mask(&payload).unwrap();
        assert_eq!(mask, 0xFF);
        assert_eq!(
            dtcs.iter().map(Dtc::to_code_string).collect::<Vec<_>>(),
            vec!["C0420", "P0101"]
        );
        assert!(dtcs[1].status.is_active());
        assert_eq!(encode_by_status_mask(0xFF, &dtcs), payload.to_vec());
    }

    #[test]
    fn test_parse_empty_list() {
        let (_, dtcs) = parse_by_status_mask(&[0x02, 0xFF]).unwrap();
        assert!(dtcs.is_empty());
    }

    #[rstest]
    #[case::wrong_report(&[0x01, 0xFF, 0x01, 0x02, 0x03, 0x04])]
    #[case::partial_record(&[0x02, 0xFF, 0x01, 0x01])]
    #[case::empty(&[])]
    fn test_parse_by_status_mask_malformed(#[case] payload: &[u8]) {
        assert!(parse_by_status_mask(payload).is_err());
    }

    #[test]
    fn test_parse_records() {
        let payload = [0x04, 0x01, 0x01, 0x00, 0x09, 0x01, 0x02, 0xF1, 0x90, 0x41];
        let records = parse_records(0x04, &payload).unwrap();
        assert_eq!(records.dtc.to_code_string(), "P0101");
        assert_eq!(records.record_number, Some(0x01));
        assert_eq!(records.data, vec![0x02, 0xF1, 0x90, 0x41]);

        let bare = parse_records(0x06, &[0x06, 0x01, 0x01, 0x00, 0x09]).unwrap();
        assert_eq!(bare.record_number, None);
        assert!(bare.data.is_empty());
    }

    #[test]
    fn test_to_value() {
        let value = Dtc::new(0x01, 0x01, 0x00, 0x09).to_value();
        assert_eq!(value.get("code"), Some(&SovdValue::from("P0101")));
        assert_eq!(value.get("category"), Some(&SovdValue::from("powertrain")));
        let status = value.get("status").unwrap();
        assert_eq!(status.get("confirmed"), Some(&SovdValue::Bool(true)));
        assert_eq!(status.get("raw"), Some(&SovdValue::Integer(9)));
    }
}
