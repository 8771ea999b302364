//! Vdev health states
//!
//! Ordered so that `Healthy` is the maximum; anything below it needs attention.
//! States are only comparable within one pool.

use serde::{Deserialize, Serialize};

/// Health state of a vdev
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VdevState {
    Unknown,
    Closed,
    Offline,
    Removed,
    #[serde(alias = "UNAVAIL")]
    CantOpen,
    Faulted,
    Degraded,
    #[serde(alias = "ONLINE")]
    Healthy,
}

impl VdevState {
    /// Convert the numeric state the storage layer stores in vdev stats
    pub fn from_raw(raw: u64) -> Self {
        match raw {
            1 => VdevState::Closed,
            2 => VdevState::Offline,
            3 => VdevState::Removed,
            4 => VdevState::CantOpen,
            5 => VdevState::Faulted,
            6 => VdevState::Degraded,
            7 => VdevState::Healthy,
            _ => VdevState::Unknown,
        }
    }

    /// Parse a state name as printed by the storage tools
    pub fn from_name(name: &str) -> Option<Self> {
        let state = match name.to_ascii_uppercase().as_str() {
            "UNKNOWN" => VdevState::Unknown,
            "CLOSED" => VdevState::Closed,
            "OFFLINE" => VdevState::Offline,
            "REMOVED" => VdevState::Removed,
            "CANT_OPEN" | "UNAVAIL" => VdevState::CantOpen,
            "FAULTED" => VdevState::Faulted,
            "DEGRADED" => VdevState::Degraded,
            "HEALTHY" | "ONLINE" => VdevState::Healthy,
            _ => return None,
        };
        Some(state)
    }

    pub fn is_healthy(&self) -> bool {
        *self == VdevState::Healthy
    }

    /// Known and below healthy
    pub fn is_impaired(&self) -> bool {
        *self != VdevState::Unknown && *self < VdevState::Healthy
    }
}

impl Default for VdevState {
    fn default() -> Self {
        VdevState::Unknown
    }
}

impl std::fmt::Display for VdevState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VdevState::Unknown => write!(f, "UNKNOWN"),
            VdevState::Closed => write!(f, "CLOSED"),
            VdevState::Offline => write!(f, "OFFLINE"),
            VdevState::Removed => write!(f, "REMOVED"),
            VdevState::CantOpen => write!(f, "UNAVAIL"),
            VdevState::Faulted => write!(f, "FAULTED"),
            VdevState::Degraded => write!(f, "DEGRADED"),
            VdevState::Healthy => write!(f, "ONLINE"),
        }
    }
}
