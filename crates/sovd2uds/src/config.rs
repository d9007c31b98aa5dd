//! Bridge configuration
//!
//! One TOML document describes the connection pool, a catalog shared by all
//! targets and the list of ECU targets with their transport, timing, session
//! and catalog settings. Every field has a default so a minimal target only
//! needs an `id` and a `transport`.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{Catalog, CatalogConfig};
use crate::session::SessionType;
use crate::uds::ServiceIds;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    /// Entries merged into every target's catalog
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub targets: Vec<EcuTargetConfig>,
}

impl BridgeConfig {
    /// Load and validate a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn target(&self, id: &str) -> Option<&EcuTargetConfig> {
        self.targets.iter().find(|t| t.id == id)
    }

    /// Check structural constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "pool.max_connections must be at least 1".into(),
            ));
        }
        if self.pool.max_frame_size < 8 {
            return Err(ConfigError::Invalid(format!(
                "pool.max_frame_size {} is below the 8 byte minimum",
                self.pool.max_frame_size
            )));
        }

        let mut seen = HashSet::new();
        for target in &self.targets {
            if target.id.trim().is_empty() {
                return Err(ConfigError::Invalid("target id must not be empty".into()));
            }
            if !seen.insert(target.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate target id '{}'",
                    target.id
                )));
            }
            target
                .timing
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("target '{}': {}", target.id, e)))?;

            Catalog::build(
                &self.catalog,
                &target.catalog,
                ServiceIds::from_overrides(&target.service_overrides),
            )
            .map_err(|e| ConfigError::Invalid(format!("target '{}': {}", target.id, e)))?;
        }
        Ok(())
    }
}

// =============================================================================
// Logging
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

// =============================================================================
// Connection Pool
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Cap on simultaneously open ECU connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Wait for a free connection at capacity instead of failing
    #[serde(default = "default_true")]
    pub wait_for_capacity: bool,
    /// Period of the idle-expiry / tester-present sweep
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_ms: u64,
    /// Largest frame accepted across the FFI boundary, in either direction
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            wait_for_capacity: default_true(),
            maintenance_interval_ms: default_maintenance_interval(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl PoolConfig {
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms.max(1))
    }
}

fn default_max_connections() -> usize {
    8
}

fn default_true() -> bool {
    true
}

fn default_maintenance_interval() -> u64 {
    250
}

fn default_max_frame_size() -> usize {
    4096
}

// =============================================================================
// ECU Target
// =============================================================================

/// One diagnosable unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcuTargetConfig {
    /// Symbolic component ID (e.g. "engine")
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub transport: TransportConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    /// Service ID overrides for OEM variants
    #[serde(default)]
    pub service_overrides: ServiceOverrides,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// Transport parameters handed to the foreign client library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// CAN with ISO-TP addressing
    Can(CanConfig),
    /// DoIP (Diagnostics over IP) - ISO 13400
    Doip(DoIpConfig),
    /// In-process simulated ECU
    Simulated(SimulatedConfig),
}

impl TransportConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Can(_) => "can",
            TransportConfig::Doip(_) => "doip",
            TransportConfig::Simulated(_) => "simulated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanConfig {
    /// CAN interface name (e.g., "can0")
    pub interface: String,
    /// Transmit CAN ID (tester -> ECU)
    #[serde(with = "hex_or_int")]
    pub tx_id: u32,
    /// Receive CAN ID (ECU -> tester)
    #[serde(with = "hex_or_int")]
    pub rx_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoIpConfig {
    /// Gateway IP address or hostname
    pub host: String,
    #[serde(default = "default_doip_port")]
    pub port: u16,
    /// Tester logical address
    #[serde(default = "default_doip_source", with = "hex_or_int")]
    pub source_address: u16,
    /// ECU logical address
    #[serde(with = "hex_or_int")]
    pub target_address: u16,
}

fn default_doip_port() -> u16 {
    13400
}

fn default_doip_source() -> u16 {
    0x0E80
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulatedConfig {
    /// Simulated per-exchange latency in milliseconds
    #[serde(default)]
    pub latency_ms: u64,
}

// =============================================================================
// Timing and retry policy
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Per-attempt send/receive timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// Retries after a transient NRC (busy-repeat, no-response-from-subnet)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// Sleep between re-reads while the ECU reports response pending
    #[serde(default = "default_pending_poll_interval")]
    pub pending_poll_interval_ms: u64,
    /// Hard ceiling on cumulative response-pending wait; 10x the request
    /// timeout when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_ceiling_ms: Option<u64>,
    /// Overall deadline of one operation (queueing, setup, retries)
    #[serde(default = "default_request_deadline")]
    pub request_deadline_ms: u64,
    /// Sessions without requests for this long are closed
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,
    #[serde(default = "default_tester_present_interval")]
    pub tester_present_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout(),
            max_retries: default_max_retries(),
            backoff: BackoffConfig::default(),
            pending_poll_interval_ms: default_pending_poll_interval(),
            pending_ceiling_ms: None,
            request_deadline_ms: default_request_deadline(),
            idle_timeout_ms: default_idle_timeout(),
            tester_present_interval_ms: default_tester_present_interval(),
        }
    }
}

impl TimingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn pending_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pending_poll_interval_ms)
    }

    pub fn pending_ceiling(&self) -> Duration {
        Duration::from_millis(
            self.pending_ceiling_ms
                .unwrap_or(self.request_timeout_ms.saturating_mul(10)),
        )
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn tester_present_interval(&self) -> Duration {
        Duration::from_millis(self.tester_present_interval_ms)
    }

    fn validate(&self) -> Result<(), String> {
        if self.request_timeout_ms == 0 {
            return Err("timing.request_timeout_ms must be positive".into());
        }
        if self.pending_poll_interval_ms == 0 {
            return Err("timing.pending_poll_interval_ms must be positive".into());
        }
        if self.pending_ceiling() < self.pending_poll_interval() {
            return Err(format!(
                "timing.pending_ceiling_ms ({}) is below the poll interval ({})",
                self.pending_ceiling().as_millis(),
                self.pending_poll_interval_ms
            ));
        }
        if self.request_deadline_ms == 0 {
            return Err("timing.request_deadline_ms must be positive".into());
        }
        Ok(())
    }
}

fn default_request_timeout() -> u64 {
    2000
}

fn default_max_retries() -> u32 {
    3
}

fn default_pending_poll_interval() -> u64 {
    50
}

fn default_request_deadline() -> u64 {
    30_000
}

fn default_idle_timeout() -> u64 {
    60_000
}

fn default_tester_present_interval() -> u64 {
    2000
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// base * 2^attempt
    #[default]
    Exponential,
    /// base * (attempt + 1)
    Linear,
}

/// Delay between retries of a request rejected with a transient NRC
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default)]
    pub strategy: BackoffStrategy,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::default(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let ms = match self.strategy {
            BackoffStrategy::Exponential => self
                .base_delay_ms
                .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX)),
            BackoffStrategy::Linear => self.base_delay_ms.saturating_mul(attempt as u64 + 1),
        };
        Duration::from_millis(ms.min(self.max_delay_ms))
    }
}

fn default_base_delay() -> u64 {
    50
}

fn default_max_delay() -> u64 {
    1000
}

// =============================================================================
// Session Configuration
// =============================================================================

/// DiagnosticSessionControl sub-functions per session type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session")]
    pub default_session: u8,
    #[serde(default = "programming_session")]
    pub programming_session: u8,
    #[serde(default = "extended_session")]
    pub extended_session: u8,
    #[serde(default = "safety_session")]
    pub safety_session: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_session: default_session(),
            programming_session: programming_session(),
            extended_session: extended_session(),
            safety_session: safety_session(),
        }
    }
}

impl SessionConfig {
    pub fn sub_function(&self, session: SessionType) -> u8 {
        match session {
            SessionType::Default => self.default_session,
            SessionType::Programming => self.programming_session,
            SessionType::Extended => self.extended_session,
            SessionType::Safety => self.safety_session,
        }
    }
}

fn default_session() -> u8 {
    0x01
}

fn programming_session() -> u8 {
    0x02
}

fn extended_session() -> u8 {
    0x03
}

fn safety_session() -> u8 {
    0x04
}

/// Security access key derivation selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Registered key derivation algorithm name
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    /// Mask used by the built-in "xor" algorithm
    #[serde(default = "default_xor_mask")]
    pub xor_mask: u8,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            xor_mask: default_xor_mask(),
        }
    }
}

fn default_algorithm() -> String {
    "xor".to_string()
}

fn default_xor_mask() -> u8 {
    0xAA
}

// =============================================================================
// Service Overrides
// =============================================================================

/// Service ID overrides for OEM variants
///
/// Some manufacturers use non-standard service IDs for otherwise standard
/// services.
///
/// ```toml
/// [targets.service_overrides]
/// write_data_by_id = "0xBC"   # standard: 0x2E
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceOverrides {
    /// DiagnosticSessionControl (standard: 0x10)
    #[serde(default, with = "hex_or_int::option", skip_serializing_if = "Option::is_none")]
    pub diagnostic_session_control: Option<u8>,
    /// ECUReset (standard: 0x11)
    #[serde(default, with = "hex_or_int::option", skip_serializing_if = "Option::is_none")]
    pub ecu_reset: Option<u8>,
    /// ClearDiagnosticInformation (standard: 0x14)
    #[serde(default, with = "hex_or_int::option", skip_serializing_if = "Option::is_none")]
    pub clear_diagnostic_info: Option<u8>,
    /// ReadDTCInformation (standard: 0x19)
    #[serde(default, with = "hex_or_int::option", skip_serializing_if = "Option::is_none")]
    pub read_dtc_info: Option<u8>,
    /// ReadDataByIdentifier (standard: 0x22)
    #[serde(default, with = "hex_or_int::option", skip_serializing_if = "Option::is_none")]
    pub read_data_by_id: Option<u8>,
    /// SecurityAccess (standard: 0x27)
    #[serde(default, with = "hex_or_int::option", skip_serializing_if = "Option::is_none")]
    pub security_access: Option<u8>,
    /// WriteDataByIdentifier (standard: 0x2E)
    #[serde(default, with = "hex_or_int::option", skip_serializing_if = "Option::is_none")]
    pub write_data_by_id: Option<u8>,
    /// InputOutputControlById (standard: 0x2F)
    #[serde(default, with = "hex_or_int::option", skip_serializing_if = "Option::is_none")]
    pub io_control_by_id: Option<u8>,
    /// RoutineControl (standard: 0x31)
    #[serde(default, with = "hex_or_int::option", skip_serializing_if = "Option::is_none")]
    pub routine_control: Option<u8>,
    /// TesterPresent (standard: 0x3E)
    #[serde(default, with = "hex_or_int::option", skip_serializing_if = "Option::is_none")]
    pub tester_present: Option<u8>,
}

/// Parse a number written as decimal or `0x`-prefixed hex
pub fn parse_number(s: &str) -> Option<u64> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

/// Serde adapter accepting TOML integers or hex strings for identifiers
pub(crate) mod hex_or_int {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Str(String),
    }

    fn to_u64<E: serde::de::Error>(raw: Raw) -> Result<u64, E> {
        match raw {
            Raw::Int(v) => Ok(v),
            Raw::Str(s) => super::parse_number(&s)
                .ok_or_else(|| E::custom(format!("invalid number '{s}'"))),
        }
    }

    pub fn deserialize<'de, D, T>(d: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: TryFrom<u64>,
    {
        let v = to_u64(Raw::deserialize(d)?)?;
        T::try_from(v).map_err(|_| D::Error::custom(format!("value 0x{v:X} out of range")))
    }

    pub fn serialize<S, T>(v: &T, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Copy + Into<u64>,
    {
        s.serialize_str(&format!("0x{:X}", (*v).into()))
    }

    pub mod option {
        use super::*;

        pub fn deserialize<'de, D, T>(d: D) -> Result<Option<T>, D::Error>
        where
            D: Deserializer<'de>,
            T: TryFrom<u64>,
        {
            match Option::<Raw>::deserialize(d)? {
                None => Ok(None),
                Some(raw) => {
                    let v = to_u64(raw)?;
                    T::try_from(v)
                        .map(Some)
                        .map_err(|_| D::Error::custom(format!("value 0x{v:X} out of range")))
                }
            }
        }

        pub fn serialize<S, T>(v: &Option<T>, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
            T: Copy + Into<u64>,
        {
            match v {
                Some(v) => super::serialize(v, s),
                None => s.serialize_none(),
            }
        }
    }
}
