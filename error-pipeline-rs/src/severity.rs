//! # Severity Classification
//!
//! Raw severity codes are bit flags so that reporting masks can be combined
//! and tested with `&`. Every recognized code maps to one of four tiers and a
//! stable human label through a fixed table.

use std::fmt;

/// Raw severity code of a raised error
pub type SeverityCode = u32;

/// Recognized severity codes
pub mod code {
    use super::SeverityCode;

    pub const E_ERROR: SeverityCode = 1;
    pub const E_WARNING: SeverityCode = 2;
    pub const E_PARSE: SeverityCode = 4;
    pub const E_NOTICE: SeverityCode = 8;
    pub const E_CORE_ERROR: SeverityCode = 16;
    pub const E_CORE_WARNING: SeverityCode = 32;
    pub const E_COMPILE_ERROR: SeverityCode = 64;
    pub const E_COMPILE_WARNING: SeverityCode = 128;
    pub const E_USER_ERROR: SeverityCode = 256;
    pub const E_USER_WARNING: SeverityCode = 512;
    pub const E_USER_NOTICE: SeverityCode = 1024;
    pub const E_STRICT: SeverityCode = 2048;
    pub const E_RECOVERABLE_ERROR: SeverityCode = 4096;
    pub const E_DEPRECATED: SeverityCode = 8192;
    pub const E_USER_DEPRECATED: SeverityCode = 16384;

    /// Every recognized code
    pub const ALL: SeverityCode = 32767;

    /// Conditions that terminate the process without reaching the
    /// non-fatal handler. Only the shutdown scan ever sees them.
    pub const TERMINAL: SeverityCode = E_ERROR | E_PARSE | E_CORE_ERROR | E_COMPILE_ERROR;
}

/// Coarse bucket a raw code is classified into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Notice,
    Warning,
    Error,
    Critical,
    /// Code outside the fixed table
    Unknown,
}

impl Tier {
    /// Prefix placed in front of every report of this tier
    pub fn prefix(&self) -> &'static str {
        match self {
            Tier::Error | Tier::Critical => "‼Fatal Error:",
            Tier::Warning => "⚠️Warning:",
            Tier::Notice => "⚠️Notice:",
            Tier::Unknown => "‼Unknown Error:",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Notice => write!(f, "NOTICE"),
            Tier::Warning => write!(f, "WARNING"),
            Tier::Error => write!(f, "ERROR"),
            Tier::Critical => write!(f, "CRITICAL"),
            Tier::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Classification result for a raw code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeverityInfo {
    /// Coarse tier
    pub tier: Tier,
    /// Human label, used as the report category
    pub label: &'static str,
    /// Symbolic code name
    pub name: &'static str,
}

const SEVERITY_TABLE: &[(SeverityCode, Tier, &str, &str)] = &[
    (code::E_ERROR, Tier::Critical, "Fatal Error", "E_ERROR"),
    (code::E_WARNING, Tier::Warning, "Warning", "E_WARNING"),
    (code::E_PARSE, Tier::Error, "Parse Error", "E_PARSE"),
    (code::E_NOTICE, Tier::Notice, "Notice", "E_NOTICE"),
    (code::E_CORE_ERROR, Tier::Critical, "Core Error", "E_CORE_ERROR"),
    (code::E_CORE_WARNING, Tier::Warning, "Core Warning", "E_CORE_WARNING"),
    (code::E_COMPILE_ERROR, Tier::Critical, "Compile Error", "E_COMPILE_ERROR"),
    (code::E_COMPILE_WARNING, Tier::Warning, "Compile Warning", "E_COMPILE_WARNING"),
    (code::E_USER_ERROR, Tier::Error, "User Error", "E_USER_ERROR"),
    (code::E_USER_WARNING, Tier::Warning, "User Warning", "E_USER_WARNING"),
    (code::E_USER_NOTICE, Tier::Notice, "User Notice", "E_USER_NOTICE"),
    (code::E_STRICT, Tier::Notice, "Strict Standards", "E_STRICT"),
    (code::E_RECOVERABLE_ERROR, Tier::Error, "Recoverable Error", "E_RECOVERABLE_ERROR"),
    (code::E_DEPRECATED, Tier::Notice, "Deprecated", "E_DEPRECATED"),
    (code::E_USER_DEPRECATED, Tier::Notice, "User Deprecated", "E_USER_DEPRECATED"),
];

const UNKNOWN: SeverityInfo = SeverityInfo {
    tier: Tier::Unknown,
    label: "Unknown Error",
    name: "E_UNKNOWN",
};

/// Maps a raw code to its tier and label.
///
/// Codes outside the table resolve to [`Tier::Unknown`].
pub fn classify(severity_code: SeverityCode) -> SeverityInfo {
    SEVERITY_TABLE
        .iter()
        .find(|(c, ..)| *c == severity_code)
        .map(|&(_, tier, label, name)| SeverityInfo { tier, label, name })
        .unwrap_or(UNKNOWN)
}

/// Returns true if the code is in the table
pub fn is_recognized(severity_code: SeverityCode) -> bool {
    SEVERITY_TABLE.iter().any(|(c, ..)| *c == severity_code)
}

/// Returns true if the code belongs to the terminal class
pub fn is_terminal(severity_code: SeverityCode) -> bool {
    severity_code & code::TERMINAL != 0
}
