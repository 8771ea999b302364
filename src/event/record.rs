//! Event Records
//!
//! Immutable key/value records produced from kernel notifications. The router
//! only reads them; deferral keeps an owned clone.

use crate::domain::guid::{CaseKey, PoolGuid, VdevGuid};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

// =============================================================================
// Constants
// =============================================================================

/// Device directory prepended to `cdev` names
pub const DEV_DIR: &str = "/dev/";

/// Disk driver name prefixes considered disk-class device nodes
pub const DISK_DRIVER_PREFIXES: &[&str] = &[
    "ada", "da", "nvd", "nda", "vtbd", "mfid", "mfisyspd", "mmcsd", "md", "xbd", "sd", "vd", "xvd",
    "nvme",
];

// =============================================================================
// Event Classification
// =============================================================================

/// Coarse notification type, taken from the first character of a devd line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// `!` generic notification
    Notify,
    /// `?` device with no driver attached
    Nomatch,
    /// `+` driver attached
    Attach,
    /// `-` driver detached
    Detach,
}

impl EventType {
    pub fn from_prefix(c: char) -> Option<Self> {
        match c {
            '!' => Some(EventType::Notify),
            '?' => Some(EventType::Nomatch),
            '+' => Some(EventType::Attach),
            '-' => Some(EventType::Detach),
            _ => None,
        }
    }

    pub fn prefix(&self) -> char {
        match self {
            EventType::Notify => '!',
            EventType::Nomatch => '?',
            EventType::Attach => '+',
            EventType::Detach => '-',
        }
    }
}

/// Which routing path handles an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Device node arrival/departure (`system=DEVFS`)
    Devfs,
    /// Pool and vdev notifications (`system=ZFS`)
    Zfs,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Devfs => write!(f, "devfs"),
            EventKind::Zfs => write!(f, "zfs"),
        }
    }
}

// =============================================================================
// Event
// =============================================================================

/// A classified kernel event
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    kind: EventKind,
    event_type: EventType,
    nvpairs: IndexMap<String, String>,
    raw: String,
    received_at: DateTime<Utc>,
}

impl Event {
    /// Build an event from parsed pairs and the text it came from
    pub fn new(
        kind: EventKind,
        event_type: EventType,
        nvpairs: IndexMap<String, String>,
        raw: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            event_type,
            nvpairs,
            raw: raw.into(),
            received_at: Utc::now(),
        }
    }

    /// Build a notify event from pairs, synthesizing its raw text
    pub fn from_pairs(kind: EventKind, pairs: &[(&str, &str)]) -> Self {
        let nvpairs: IndexMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let raw = format!(
            "{}{}",
            EventType::Notify.prefix(),
            nvpairs
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(" ")
        );
        Self::new(kind, EventType::Notify, nvpairs, raw)
    }

    /// Subsystem notification built from pairs
    pub fn zfs(pairs: &[(&str, &str)]) -> Self {
        Self::from_pairs(EventKind::Zfs, pairs)
    }

    /// Device-node notification built from pairs
    pub fn devfs(pairs: &[(&str, &str)]) -> Self {
        Self::from_pairs(EventKind::Devfs, pairs)
    }

    /// The arrival event a rescan synthesizes for an existing device
    pub fn devfs_create(cdev: &str) -> Self {
        Self::devfs(&[
            ("system", "DEVFS"),
            ("subsystem", "CDEV"),
            ("type", "CREATE"),
            ("cdev", cdev),
        ])
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn nvpairs(&self) -> &IndexMap<String, String> {
        &self.nvpairs
    }

    pub fn contains(&self, key: &str) -> bool {
        self.nvpairs.contains_key(key)
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.nvpairs.get(key).map(String::as_str)
    }

    /// Value of `key`, or the empty string when absent
    pub fn value_or_empty(&self, key: &str) -> &str {
        self.value(key).unwrap_or("")
    }

    /// The `type` tag, empty when absent
    pub fn type_tag(&self) -> &str {
        self.value_or_empty("type")
    }

    /// The `class` tag, empty when absent
    pub fn class_tag(&self) -> &str {
        self.value_or_empty("class")
    }

    // -------------------------------------------------------------------------
    // Subsystem accessors
    // -------------------------------------------------------------------------

    pub fn pool_guid(&self) -> Option<PoolGuid> {
        self.value("pool_guid").and_then(PoolGuid::parse)
    }

    pub fn vdev_guid(&self) -> Option<VdevGuid> {
        self.value("vdev_guid").and_then(VdevGuid::parse)
    }

    /// Identity of the vdev this event is about, when both GUIDs are present
    pub fn case_key(&self) -> Option<CaseKey> {
        Some(CaseKey::new(self.pool_guid()?, self.vdev_guid()?))
    }

    // -------------------------------------------------------------------------
    // Device-node accessors
    // -------------------------------------------------------------------------

    /// Device name (e.g., `da1`)
    pub fn dev_name(&self) -> Option<&str> {
        self.value("cdev").filter(|name| !name.is_empty())
    }

    /// Device node path (e.g., `/dev/da1`)
    pub fn dev_path(&self) -> Option<String> {
        self.dev_name().map(|name| format!("{}{}", DEV_DIR, name))
    }

    /// Whether this event names a disk-class character device
    pub fn is_disk_dev(&self) -> bool {
        self.value("subsystem") == Some("CDEV") && self.dev_name().map_or(false, is_disk_name)
    }

    /// Whether the device is a whole disk rather than a partition or slice
    pub fn is_whole_dev(&self) -> bool {
        self.dev_name().map_or(false, is_whole_disk_name)
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

// =============================================================================
// Device Name Rules
// =============================================================================

/// Split `da12p3` into (`da`, `12`, `p3`) using the known driver prefixes
fn split_disk_name(name: &str) -> Option<(&str, &str)> {
    DISK_DRIVER_PREFIXES
        .iter()
        .filter_map(|prefix| name.strip_prefix(prefix))
        .filter(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
        .map(|rest| {
            let unit_len = rest.chars().take_while(|c| c.is_ascii_digit()).count();
            rest.split_at(unit_len)
        })
        .next()
}

/// Disk driver name followed by a unit number
pub fn is_disk_name(name: &str) -> bool {
    split_disk_name(name).is_some()
}

/// A disk name with no partition or slice suffix. An NVMe namespace suffix
/// (`nvme0n1`) still names the whole device.
pub fn is_whole_disk_name(name: &str) -> bool {
    match split_disk_name(name) {
        Some((_, "")) => true,
        Some((_, suffix)) => suffix
            .strip_prefix('n')
            .map_or(false, |ns| !ns.is_empty() && ns.chars().all(|c| c.is_ascii_digit())),
        None => false,
    }
}
