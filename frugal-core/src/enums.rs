//! Enum types for the access layer

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// QUOTA ENUMS
// ============================================================================

/// Operation kinds metered by the backing store's daily quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Read,
    Write,
    Delete,
}

impl OperationKind {
    /// All metered kinds, in ledger order.
    pub const ALL: [OperationKind; 3] = [Self::Read, Self::Write, Self::Delete];

    /// Dense index used by fixed-size counter arrays.
    pub fn index(self) -> usize {
        match self {
            Self::Read => 0,
            Self::Write => 1,
            Self::Delete => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-declared importance of a read.
///
/// - `Normal` is subject to the per-minute window.
/// - `High` is granted while daily read usage is below the emergency
///   threshold, even when the minute window is exhausted.
/// - `Critical` is always granted and never touches the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(ConfigError::UnknownPriority {
                value: s.to_string(),
            }),
        }
    }
}

/// Operating mode derived from daily read usage.
///
/// Variants are declared in order of severity so `Ord` compares severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Normal,
    Conservative,
    Aggressive,
    Emergency,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Self::Normal,
        Self::Conservative,
        Self::Aggressive,
        Self::Emergency,
    ];

    /// 0 for Normal up to 3 for Emergency.
    pub fn severity(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Conservative => 1,
            Self::Aggressive => 2,
            Self::Emergency => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Conservative => "conservative",
            Self::Aggressive => "aggressive",
            Self::Emergency => "emergency",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CACHE ENUMS
// ============================================================================

/// Freshness of a cache lookup at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheState {
    /// `now < fresh_until`
    Fresh,
    /// `fresh_until <= now < stale_until`
    Stale,
    /// Absent or past `stale_until`
    Miss,
}

/// Which branch of the read fallback chain produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadSource {
    /// Fresh cache hit; no budget consulted.
    Fresh,
    /// The fetch function ran and succeeded.
    Fetched,
    /// A stale-but-retained entry served because the budget was denied or
    /// the fetch failed.
    Stale,
    /// The declared default for the key.
    Default,
}

impl ReadSource {
    /// True when the fetch function produced the value.
    pub fn is_fetched(self) -> bool {
        matches!(self, Self::Fetched)
    }

    /// True when the value did not come from the backing store during this
    /// call or a fresh cache entry.
    pub fn is_degraded(self) -> bool {
        matches!(self, Self::Stale | Self::Default)
    }
}

// ============================================================================
// WRITE ENUMS
// ============================================================================

/// Kind of a queued write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteKind {
    Set,
    Update,
    Delete,
}

impl fmt::Display for WriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set => f.write_str("set"),
            Self::Update => f.write_str("update"),
            Self::Delete => f.write_str("delete"),
        }
    }
}
