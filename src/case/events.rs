//! Case Events
//!
//! Events emitted by the case registry for external consumers to react to
//! case lifecycle changes and requested remediation.

use crate::domain::guid::CaseKey;
use crate::vdev::VdevState;
use serde::{Deserialize, Serialize};

/// Events emitted by cases and the case registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CaseEvent {
    /// A case was opened for a vdev
    Opened { key: CaseKey, state: VdevState },

    /// A case was closed
    Closed { key: CaseKey, reason: CloseReason },

    /// A fault report was attached to a case as evidence
    EvidenceRecorded { key: CaseKey, class: String },

    /// The case wants a hot spare activated for its vdev
    SpareRequested { key: CaseKey, state: VdevState },

    /// The tracked vdev was brought back online at a device path
    DeviceOnlined { key: CaseKey, dev_path: String },

    /// The tracked vdev was replaced by the device at a path
    DeviceReplaced { key: CaseKey, dev_path: String },

    /// A storage command issued on behalf of the case failed
    RemediationFailed {
        key: CaseKey,
        operation: String,
        reason: String,
    },
}

/// Why a case was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// Vdev returned to health
    Solved,
    /// Vdev was removed from the pool configuration
    VdevRemoved,
    /// Pool was destroyed
    PoolDestroyed,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Solved => write!(f, "solved"),
            CloseReason::VdevRemoved => write!(f, "vdev_removed"),
            CloseReason::PoolDestroyed => write!(f, "pool_destroyed"),
        }
    }
}

impl CaseEvent {
    /// Get the case key associated with this event
    pub fn key(&self) -> CaseKey {
        match self {
            CaseEvent::Opened { key, .. } => *key,
            CaseEvent::Closed { key, .. } => *key,
            CaseEvent::EvidenceRecorded { key, .. } => *key,
            CaseEvent::SpareRequested { key, .. } => *key,
            CaseEvent::DeviceOnlined { key, .. } => *key,
            CaseEvent::DeviceReplaced { key, .. } => *key,
            CaseEvent::RemediationFailed { key, .. } => *key,
        }
    }

    /// Check if this event records a storage command
    pub fn is_remediation(&self) -> bool {
        matches!(
            self,
            CaseEvent::SpareRequested { .. }
                | CaseEvent::DeviceOnlined { .. }
                | CaseEvent::DeviceReplaced { .. }
                | CaseEvent::RemediationFailed { .. }
        )
    }
}
