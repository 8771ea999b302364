//! Domain Ports - Collaborator traits consumed by the event router
//!
//! These traits define the boundaries between the routing policy and the
//! systems it drives. The router is synchronous and run-to-completion, so the
//! ports are plain (non-async) traits; adapters implement them over the
//! kernel, an in-process case store or a topology snapshot.

use crate::domain::guid::{PoolGuid, VdevGuid};
use crate::error::Result;
use crate::event::Event;
use crate::vdev::{Label, PoolTopology, Vdev, VdevState};
use std::sync::Arc;

// =============================================================================
// Device Handle
// =============================================================================

/// A device node opened through the storage layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    /// Device node path (e.g., /dev/da1)
    dev_path: String,
}

impl DeviceHandle {
    pub fn new(dev_path: impl Into<String>) -> Self {
        Self {
            dev_path: dev_path.into(),
        }
    }

    pub fn dev_path(&self) -> &str {
        &self.dev_path
    }
}

// =============================================================================
// Topology Reader Port
// =============================================================================

/// Port for reading live pool configuration
pub trait TopologyReader: Send + Sync {
    /// Live device tree of a pool, `None` when the pool is not visible
    fn pool(&self, pool_guid: PoolGuid) -> Option<PoolTopology>;

    /// GUIDs of every visible pool
    fn pool_guids(&self) -> Vec<PoolGuid>;

    /// A single vdev by identity, `None` when the pool or vdev is not visible
    fn vdev(&self, pool_guid: PoolGuid, vdev_guid: VdevGuid) -> Option<Vdev> {
        self.pool(pool_guid).and_then(|pool| pool.vdev(vdev_guid))
    }
}

// =============================================================================
// Storage Layer Port
// =============================================================================

/// Port for device and pool commands
pub trait StorageLayer: Send + Sync {
    /// Open a device node for reading
    fn open_device(&self, dev_path: &str) -> Result<DeviceHandle>;

    /// Whether the device is claimed by a pool
    fn pool_in_use(&self, device: &DeviceHandle) -> Result<bool>;

    /// Pool-membership label embedded on the device, if any
    fn read_label(&self, device: &DeviceHandle) -> Result<Option<Label>>;

    /// Physical slot path of the device, if the enclosure reports one
    fn physical_path(&self, device: &DeviceHandle) -> Option<String>;

    /// Detach a device from a pool
    fn detach(&self, pool: &PoolTopology, dev_path: &str) -> Result<()>;

    /// Bring a known vdev back online at `dev_path`
    fn online(&self, pool_guid: PoolGuid, vdev_guid: VdevGuid, dev_path: &str) -> Result<()>;

    /// Replace a vdev with the device at `dev_path`
    fn replace(&self, pool_guid: PoolGuid, vdev_guid: VdevGuid, dev_path: &str) -> Result<()>;
}

// =============================================================================
// Case Ports
// =============================================================================

/// One open remediation case, opaque to the router
pub trait CaseFile: Send + Sync {
    fn pool_guid(&self) -> PoolGuid;

    fn vdev_guid(&self) -> VdevGuid;

    /// Last known state of the tracked vdev
    fn vdev_state(&self) -> VdevState;

    /// Physical slot of the tracked vdev
    fn physical_path(&self) -> Option<String>;

    /// Evaluate a subsystem event, returning whether it was consumed
    fn re_evaluate(&self, event: &Event) -> bool;

    /// Evaluate a newly arrived device, returning whether it was consumed.
    ///
    /// `vdev` is `None` when the device was matched by physical path and its
    /// identity is unknown.
    fn re_evaluate_device(&self, dev_path: &str, phys_path: &str, vdev: Option<&Vdev>) -> bool;
}

pub type CaseRef = Arc<dyn CaseFile>;

/// Port for locating and creating cases
pub trait CaseRegistry: Send + Sync {
    /// Open case for a vdev identity
    fn find(&self, pool_guid: PoolGuid, vdev_guid: VdevGuid) -> Option<CaseRef>;

    /// Open case whose vdev occupied `phys_path`
    fn find_by_phys_path(&self, phys_path: &str) -> Option<CaseRef>;

    /// Open a case for `vdev`, or return the one already open
    fn create(&self, vdev: &Vdev) -> CaseRef;

    /// Re-evaluate every case of a pool against `event`
    fn re_evaluate_by_guid(&self, pool_guid: PoolGuid, event: &Event);

    /// All open cases
    fn open_cases(&self) -> Vec<CaseRef>;
}

// =============================================================================
// Deferred Queue Port
// =============================================================================

/// Port for events retained until topology catches up
pub trait DeferredQueue: Send + Sync {
    /// Retain an owned copy of an event
    fn enqueue(&self, event: Event);

    /// Route every retained event through `process` in insertion order.
    ///
    /// `process` returns true when an event should still be retained. With
    /// `discard` set, nothing is retained after the pass.
    fn replay_all(&self, discard: bool, process: &mut dyn FnMut(&Event) -> bool);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every retained event
    fn clear(&self);
}

// =============================================================================
// Daemon Control Port
// =============================================================================

/// Daemon-wide requests the router may raise
pub trait DaemonControl: Send + Sync {
    /// Ask the daemon to re-scan every device once the current event is done
    fn request_system_rescan(&self);
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type TopologyReaderRef = Arc<dyn TopologyReader>;
pub type StorageLayerRef = Arc<dyn StorageLayer>;
pub type CaseRegistryRef = Arc<dyn CaseRegistry>;
pub type DeferredQueueRef = Arc<dyn DeferredQueue>;
pub type DaemonControlRef = Arc<dyn DaemonControl>;
