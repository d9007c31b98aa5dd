//! UDS Negative Response Codes (NRC)

use std::fmt;

/// Coarse grouping of NRCs used by the retry policy and error mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NrcCategory {
    /// Service or sub-function not supported (in general or in this session)
    NotSupported,
    /// Malformed or out-of-range request
    InvalidRequest,
    /// Preconditions not met
    Conditions,
    /// Security access related
    Security,
    /// Worth repeating the whole request
    Transient,
    /// Response pending, keep waiting on the same exchange
    Pending,
    Other,
}

macro_rules! nrc_codes {
    ($( $(#[$meta:meta])* $name:ident = $code:literal => $desc:literal, )*) => {
        /// UDS Negative Response Codes (NRC)
        ///
        /// The NRC space is open-ended: any byte outside the named set decodes
        /// to [`NegativeResponseCode::Unknown`] rather than failing.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum NegativeResponseCode {
            $( $(#[$meta])* $name, )*
            /// Unknown/reserved NRC
            Unknown(u8),
        }

        impl From<u8> for NegativeResponseCode {
            fn from(value: u8) -> Self {
                match value {
                    $( $code => Self::$name, )*
                    other => Self::Unknown(other),
                }
            }
        }

        impl From<NegativeResponseCode> for u8 {
            fn from(nrc: NegativeResponseCode) -> Self {
                match nrc {
                    $( NegativeResponseCode::$name => $code, )*
                    NegativeResponseCode::Unknown(v) => v,
                }
            }
        }

        impl NegativeResponseCode {
            /// Symbolic name, stable across releases
            pub fn name(&self) -> &'static str {
                match self {
                    $( Self::$name => stringify!($name), )*
                    Self::Unknown(_) => "Unknown",
                }
            }

            /// Human-readable description
            pub fn description(&self) -> &'static str {
                match self {
                    $( Self::$name => $desc, )*
                    Self::Unknown(_) => "Unknown negative response code",
                }
            }
        }
    };
}

nrc_codes! {
    GeneralReject = 0x10 => "General reject",
    ServiceNotSupported = 0x11 => "Service not supported",
    SubFunctionNotSupported = 0x12 => "Sub-function not supported",
    IncorrectMessageLengthOrFormat = 0x13 => "Incorrect message length or invalid format",
    ResponseTooLong = 0x14 => "Response too long",
    BusyRepeatRequest = 0x21 => "Busy, repeat request",
    ConditionsNotCorrect = 0x22 => "Conditions not correct",
    RequestSequenceError = 0x24 => "Request sequence error",
    NoResponseFromSubnet = 0x25 => "No response from subnet component",
    FailurePreventsExecution = 0x26 => "Failure prevents execution of requested action",
    RequestOutOfRange = 0x31 => "Request out of range",
    SecurityAccessDenied = 0x33 => "Security access denied",
    InvalidKey = 0x35 => "Invalid key",
    ExceededNumberOfAttempts = 0x36 => "Exceeded number of attempts",
    RequiredTimeDelayNotExpired = 0x37 => "Required time delay not expired",
    UploadDownloadNotAccepted = 0x70 => "Upload/download not accepted",
    TransferDataSuspended = 0x71 => "Transfer data suspended",
    GeneralProgrammingFailure = 0x72 => "General programming failure",
    WrongBlockSequenceCounter = 0x73 => "Wrong block sequence counter",
    /// Not a terminal error: the ECU will answer later on the same exchange
    ResponsePending = 0x78 => "Request correctly received, response pending",
    SubFunctionNotSupportedInActiveSession = 0x7E => "Sub-function not supported in active session",
    ServiceNotSupportedInActiveSession = 0x7F => "Service not supported in active session",
    RpmTooHigh = 0x81 => "RPM too high",
    RpmTooLow = 0x82 => "RPM too low",
    EngineRunning = 0x83 => "Engine is running",
    EngineNotRunning = 0x84 => "Engine is not running",
    EngineRunTimeTooLow = 0x85 => "Engine run time too low",
    TemperatureTooHigh = 0x86 => "Temperature too high",
    TemperatureTooLow = 0x87 => "Temperature too low",
    VehicleSpeedTooHigh = 0x88 => "Vehicle speed too high",
    VehicleSpeedTooLow = 0x89 => "Vehicle speed too low",
    ThrottleTooHigh = 0x8A => "Throttle/pedal too high",
    ThrottleTooLow = 0x8B => "Throttle/pedal too low",
    TransmissionNotInNeutral = 0x8C => "Transmission range not in neutral",
    TransmissionNotInGear = 0x8D => "Transmission range not in gear",
    BrakeSwitchNotClosed = 0x8F => "Brake switch not closed",
    ShifterNotInPark = 0x90 => "Shifter lever not in park",
    TorqueConverterClutchLocked = 0x91 => "Torque converter clutch locked",
    VoltageTooHigh = 0x92 => "Voltage too high",
    VoltageTooLow = 0x93 => "Voltage too low",
}

impl NegativeResponseCode {
    pub fn code(&self) -> u8 {
        (*self).into()
    }

    pub fn category(&self) -> NrcCategory {
        use NegativeResponseCode::*;
        match self {
            ServiceNotSupported
            | SubFunctionNotSupported
            | SubFunctionNotSupportedInActiveSession
            | ServiceNotSupportedInActiveSession => NrcCategory::NotSupported,
            IncorrectMessageLengthOrFormat | RequestOutOfRange => NrcCategory::InvalidRequest,
            ConditionsNotCorrect | RequestSequenceError => NrcCategory::Conditions,
            SecurityAccessDenied
            | InvalidKey
            | ExceededNumberOfAttempts
            | RequiredTimeDelayNotExpired => NrcCategory::Security,
            BusyRepeatRequest | NoResponseFromSubnet => NrcCategory::Transient,
            ResponsePending => NrcCategory::Pending,
            _ => NrcCategory::Other,
        }
    }

    /// True for NRCs that warrant repeating the whole request
    pub fn is_transient(&self) -> bool {
        self.category() == NrcCategory::Transient
    }

    /// True when the ECU refused a session change
    pub fn denies_session_transition(&self) -> bool {
        matches!(
            self,
            Self::SubFunctionNotSupported
                | Self::ConditionsNotCorrect
                | Self::SubFunctionNotSupportedInActiveSession
                | Self::ServiceNotSupportedInActiveSession
        )
    }
}

impl fmt::UpperHex for NegativeResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(&self.code(), f)
    }
}

impl fmt::Display for NegativeResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(v) => write!(f, "Unknown(0x{:02X})", v),
            named => f.write_str(named.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0x10, NegativeResponseCode::GeneralReject)]
    #[case(0x21, NegativeResponseCode::BusyRepeatRequest)]
    #[case(0x31, NegativeResponseCode::RequestOutOfRange)]
    #[case(0x35, NegativeResponseCode::InvalidKey)]
    #[case(0x78, NegativeResponseCode::ResponsePending)]
    #[case(0x7E, NegativeResponseCode::SubFunctionNotSupportedInActiveSession)]
    #[case(0x93, NegativeResponseCode::VoltageTooLow)]
    fn test_named_codes(#[case] byte: u8, #[case] nrc: NegativeResponseCode) {
        assert_eq!(NegativeResponseCode::from(byte), nrc);
        assert_eq!(u8::from(nrc), byte);
    }

    #[test]
    fn test_every_byte_decodes() {
        for byte in 0..=u8::MAX {
            let nrc = NegativeResponseCode::from(byte);
            assert_eq!(nrc.code(), byte);
        }
        assert_eq!(
            NegativeResponseCode::from(0xF0),
            NegativeResponseCode::Unknown(0xF0)
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(
            NegativeResponseCode::RequestOutOfRange.to_string(),
            "RequestOutOfRange"
        );
        assert_eq!(NegativeResponseCode::Unknown(0xAB).to_string(), "Unknown(0xAB)");
        assert_eq!(format!("{:02X}", NegativeResponseCode::InvalidKey), "35");
    }

    #[test]
    fn test_categories() {
        assert!(NegativeResponseCode::BusyRepeatRequest.is_transient());
        assert!(NegativeResponseCode::NoResponseFromSubnet.is_transient());
        assert!(!NegativeResponseCode::RequestOutOfRange.is_transient());
        assert_eq!(
            NegativeResponseCode::ResponsePending.category(),
            NrcCategory::Pending
        );
        assert_eq!(
            NegativeResponseCode::ExceededNumberOfAttempts.category(),
            NrcCategory::Security
        );
        assert!(NegativeResponseCode::SubFunctionNotSupportedInActiveSession
            .denies_session_transition());
    }
}
