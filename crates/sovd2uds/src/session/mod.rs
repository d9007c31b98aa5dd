//! Diagnostic session state per ECU target
//!
//! This module handles diagnostic session control, security access,
//! tester-present keepalive and the response-pending wait loop.

mod manager;
mod security;

pub use manager::{PendingOperation, Session, SessionManager, SessionRequirement};
pub use security::{IdentityKey, KeyDerivation, KeyRegistry, XorKey};

use serde::{Deserialize, Serialize};

/// UDS diagnostic session type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    #[default]
    Default,
    Programming,
    Extended,
    Safety,
}

impl SessionType {
    pub const ALL: [SessionType; 4] = [
        SessionType::Default,
        SessionType::Programming,
        SessionType::Extended,
        SessionType::Safety,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Default => "default",
            SessionType::Programming => "programming",
            SessionType::Extended => "extended",
            SessionType::Safety => "safety",
        }
    }
}

impl std::fmt::Display for SessionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown session type '{s}'"))
    }
}

/// Connection state of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Disconnected,
    /// Link open, initial DiagnosticSessionControl not yet confirmed
    Connecting,
    Active(SessionType),
}

impl SessionState {
    pub fn session_type(&self) -> Option<SessionType> {
        match self {
            SessionState::Active(t) => Some(*t),
            _ => None,
        }
    }
}

/// Security access state, orthogonal to the session type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SecurityState {
    #[default]
    Locked,
    Unlocked(u8),
}

impl SecurityState {
    /// Whether security is unlocked at `level` or above
    pub fn satisfies(&self, level: u8) -> bool {
        match self {
            _ if level == 0 => true,
            SecurityState::Locked => false,
            SecurityState::Unlocked(current) => *current >= level,
        }
    }
}
