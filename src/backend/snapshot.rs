//! Topology Snapshot Backend
//!
//! Serves pool topology and device labels from a YAML snapshot and applies
//! storage commands to it in memory. Used when no kernel configuration
//! reader is available and as the fixture backend in tests.
//!
//! ```yaml
//! pools:
//!   - name: tank
//!     guid: 42
//!     vdevs:
//!       - type: mirror
//!         guid: 100
//!         state: DEGRADED
//!         children:
//!           - guid: 7
//!             path: /dev/da1
//!             phys_path: enc0/bay1
//!             state: FAULTED
//!           - guid: 8
//!             path: /dev/da2
//! devices:
//!   - path: /dev/da3
//!     phys_path: enc0/bay1
//!     in_use: true
//!     label: { pool_guid: 42, guid: 7 }
//! ```

use crate::domain::guid::{PoolGuid, VdevGuid};
use crate::domain::ports::{DeviceHandle, StorageLayer, TopologyReader};
use crate::error::{Error, Result};
use crate::vdev::{Label, NodeIndex, PoolTopology, Vdev, VdevState, VdevTree};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use tracing::{debug, info};

// =============================================================================
// Snapshot File Format
// =============================================================================

/// Top-level snapshot document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotSpec {
    #[serde(default)]
    pub pools: Vec<PoolSpec>,
    #[serde(default)]
    pub devices: Vec<DeviceSpec>,
}

/// One pool and its top-level vdevs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSpec {
    pub name: String,
    pub guid: u64,
    #[serde(default)]
    pub vdevs: Vec<VdevSpec>,
}

/// One vdev, recursively
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VdevSpec {
    pub guid: u64,
    #[serde(rename = "type", default = "default_vdev_type")]
    pub vdev_type: String,
    #[serde(default = "default_state")]
    pub state: VdevState,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub phys_path: Option<String>,
    #[serde(default)]
    pub is_spare: bool,
    #[serde(default)]
    pub children: Vec<VdevSpec>,
}

/// A device node that may appear on the system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub path: String,
    #[serde(default)]
    pub phys_path: Option<String>,
    /// Claimed by a pool
    #[serde(default)]
    pub in_use: bool,
    #[serde(default)]
    pub label: Option<Label>,
    /// Label reads fail with an I/O error
    #[serde(default)]
    pub unreadable: bool,
}

impl DeviceSpec {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            phys_path: None,
            in_use: false,
            label: None,
            unreadable: false,
        }
    }

    pub fn with_phys_path(mut self, phys_path: impl Into<String>) -> Self {
        self.phys_path = Some(phys_path.into());
        self
    }

    /// Mark the device as a pool member carrying `label`
    pub fn with_label(mut self, label: Label) -> Self {
        self.in_use = true;
        self.label = Some(label);
        self
    }
}

fn default_vdev_type() -> String {
    "disk".to_string()
}

fn default_state() -> VdevState {
    VdevState::Healthy
}

impl PoolSpec {
    /// Build the arena tree for this pool
    fn to_topology(&self) -> PoolTopology {
        let pool_guid = PoolGuid(self.guid);
        let root = Vdev::interior(pool_guid, VdevGuid(self.guid), "root", VdevState::Healthy);
        let mut tree = VdevTree::new(root);
        let root_idx = tree.root();
        for spec in &self.vdevs {
            add_spec(&mut tree, root_idx, pool_guid, spec);
        }
        PoolTopology::new(self.name.clone(), pool_guid, tree)
    }
}

fn add_spec(tree: &mut VdevTree, parent: NodeIndex, pool_guid: PoolGuid, spec: &VdevSpec) {
    let vdev = Vdev {
        guid: VdevGuid(spec.guid),
        pool_guid,
        vdev_type: spec.vdev_type.clone(),
        state: spec.state,
        path: spec.path.clone(),
        phys_path: spec.phys_path.clone(),
        is_spare: spec.is_spare,
    };
    let idx = tree.add_child(parent, vdev);
    for child in &spec.children {
        add_spec(tree, idx, pool_guid, child);
    }
}

// =============================================================================
// Command Log
// =============================================================================

/// A storage command applied to the snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageCommand {
    Detach { pool_guid: PoolGuid, dev_path: String },
    Online { pool_guid: PoolGuid, vdev_guid: VdevGuid, dev_path: String },
    Replace { pool_guid: PoolGuid, vdev_guid: VdevGuid, dev_path: String },
}

// =============================================================================
// Snapshot Backend
// =============================================================================

/// Most recent storage commands kept for inspection
pub const COMMAND_LOG_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct SnapshotState {
    pools: IndexMap<PoolGuid, PoolTopology>,
    devices: HashMap<String, DeviceSpec>,
    commands: VecDeque<StorageCommand>,
}

impl SnapshotState {
    fn record(&mut self, command: StorageCommand) {
        if self.commands.len() >= COMMAND_LOG_CAPACITY {
            self.commands.pop_front();
        }
        self.commands.push_back(command);
    }
}

/// In-memory topology and storage layer
#[derive(Debug, Default)]
pub struct SnapshotBackend {
    state: RwLock<SnapshotState>,
}

impl SnapshotBackend {
    /// An empty system with no pools or devices
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_spec(spec: &SnapshotSpec) -> Self {
        let backend = Self::new();
        {
            let mut state = backend.state.write();
            for pool in &spec.pools {
                let topology = pool.to_topology();
                state.pools.insert(topology.guid, topology);
            }
            for device in &spec.devices {
                state.devices.insert(device.path.clone(), device.clone());
            }
        }
        backend
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let spec: SnapshotSpec = serde_yaml::from_str(yaml)?;
        Ok(Self::from_spec(&spec))
    }

    /// Load a snapshot file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let backend = Self::from_yaml_str(&contents)?;
        info!(
            path = %path.display(),
            pools = backend.pool_count(),
            devices = backend.device_count(),
            "Loaded topology snapshot"
        );
        Ok(backend)
    }

    /// Add a pool whose leaves sit directly under the root
    pub fn add_pool(&self, name: &str, guid: PoolGuid, leaves: Vec<Vdev>) {
        let root = Vdev::interior(guid, VdevGuid(guid.get()), "root", VdevState::Healthy);
        let mut tree = VdevTree::new(root);
        let root_idx = tree.root();
        for leaf in leaves {
            tree.add_child(root_idx, leaf);
        }
        self.insert_pool(PoolTopology::new(name, guid, tree));
    }

    /// Add or replace a pool
    pub fn insert_pool(&self, pool: PoolTopology) {
        self.state.write().pools.insert(pool.guid, pool);
    }

    /// Add or replace a device node
    pub fn add_device(&self, device: DeviceSpec) {
        self.state.write().devices.insert(device.path.clone(), device);
    }

    /// Set the state of a vdev. Returns false when it does not exist.
    pub fn set_vdev_state(
        &self,
        pool_guid: PoolGuid,
        vdev_guid: VdevGuid,
        vdev_state: VdevState,
    ) -> bool {
        self.with_vdev_mut(pool_guid, vdev_guid, |vdev| vdev.state = vdev_state)
            .is_ok()
    }

    pub fn pool_count(&self) -> usize {
        self.state.read().pools.len()
    }

    pub fn device_count(&self) -> usize {
        self.state.read().devices.len()
    }

    /// Paths of every known device node
    pub fn device_paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.state.read().devices.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Recently applied commands, oldest first
    pub fn commands(&self) -> Vec<StorageCommand> {
        self.state.read().commands.iter().cloned().collect()
    }

    /// Drain the command log
    pub fn take_commands(&self) -> Vec<StorageCommand> {
        self.state.write().commands.drain(..).collect()
    }

    fn with_vdev_mut<F>(&self, pool_guid: PoolGuid, vdev_guid: VdevGuid, f: F) -> Result<()>
    where
        F: FnOnce(&mut Vdev),
    {
        let mut state = self.state.write();
        let pool = state
            .pools
            .get_mut(&pool_guid)
            .ok_or_else(|| Error::PoolNotFound {
                pool_guid: pool_guid.to_string(),
            })?;
        let idx = pool.tree.find(vdev_guid).ok_or_else(|| Error::VdevNotFound {
            pool_guid: pool_guid.to_string(),
            vdev_guid: vdev_guid.to_string(),
        })?;
        if let Some(vdev) = pool.tree.get_mut(idx) {
            f(vdev);
        }
        Ok(())
    }

    fn device(&self, dev_path: &str) -> Result<DeviceSpec> {
        self.state
            .read()
            .devices
            .get(dev_path)
            .cloned()
            .ok_or_else(|| Error::DeviceNotFound {
                device: dev_path.to_string(),
            })
    }

    fn command_failed(operation: &str, pool: String, device: &str, error: Error) -> Error {
        Error::StorageCommand {
            operation: operation.to_string(),
            pool,
            device: device.to_string(),
            reason: error.to_string(),
        }
    }
}

impl TopologyReader for SnapshotBackend {
    fn pool(&self, pool_guid: PoolGuid) -> Option<PoolTopology> {
        self.state.read().pools.get(&pool_guid).cloned()
    }

    fn pool_guids(&self) -> Vec<PoolGuid> {
        self.state.read().pools.keys().copied().collect()
    }
}

impl StorageLayer for SnapshotBackend {
    fn open_device(&self, dev_path: &str) -> Result<DeviceHandle> {
        self.device(dev_path)?;
        Ok(DeviceHandle::new(dev_path))
    }

    fn pool_in_use(&self, device: &DeviceHandle) -> Result<bool> {
        Ok(self.device(device.dev_path())?.in_use)
    }

    fn read_label(&self, device: &DeviceHandle) -> Result<Option<Label>> {
        let spec = self.device(device.dev_path())?;
        if spec.unreadable {
            return Err(Error::LabelRead {
                device: spec.path,
                reason: "I/O error".to_string(),
            });
        }
        Ok(spec.label)
    }

    fn physical_path(&self, device: &DeviceHandle) -> Option<String> {
        self.device(device.dev_path()).ok().and_then(|d| d.phys_path)
    }

    fn detach(&self, pool: &PoolTopology, dev_path: &str) -> Result<()> {
        let mut state = self.state.write();
        let live = state.pools.get_mut(&pool.guid).ok_or_else(|| {
            let missing = Error::PoolNotFound {
                pool_guid: pool.guid.to_string(),
            };
            Self::command_failed("detach", pool.name.clone(), dev_path, missing)
        })?;
        let idx = live.tree.find_by_path(dev_path).ok_or_else(|| Error::StorageCommand {
            operation: "detach".to_string(),
            pool: pool.name.clone(),
            device: dev_path.to_string(),
            reason: "no such device in pool".to_string(),
        })?;
        live.tree.detach(idx);
        state.record(StorageCommand::Detach {
            pool_guid: pool.guid,
            dev_path: dev_path.to_string(),
        });
        debug!(pool = %pool.name, dev_path, "Detached device");
        Ok(())
    }

    fn online(&self, pool_guid: PoolGuid, vdev_guid: VdevGuid, dev_path: &str) -> Result<()> {
        self.with_vdev_mut(pool_guid, vdev_guid, |vdev| {
            vdev.state = VdevState::Healthy;
            vdev.path = Some(dev_path.to_string());
        })
        .map_err(|e| Self::command_failed("online", pool_guid.to_string(), dev_path, e))?;
        self.state.write().record(StorageCommand::Online {
            pool_guid,
            vdev_guid,
            dev_path: dev_path.to_string(),
        });
        Ok(())
    }

    fn replace(&self, pool_guid: PoolGuid, vdev_guid: VdevGuid, dev_path: &str) -> Result<()> {
        let phys_path = self.device(dev_path).ok().and_then(|d| d.phys_path);
        self.with_vdev_mut(pool_guid, vdev_guid, |vdev| {
            vdev.state = VdevState::Healthy;
            vdev.path = Some(dev_path.to_string());
            if phys_path.is_some() {
                vdev.phys_path = phys_path;
            }
        })
        .map_err(|e| Self::command_failed("replace", pool_guid.to_string(), dev_path, e))?;

        let mut state = self.state.write();
        if let Some(device) = state.devices.get_mut(dev_path) {
            device.in_use = true;
        }
        state.record(StorageCommand::Replace {
            pool_guid,
            vdev_guid,
            dev_path: dev_path.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    const SNAPSHOT: &str = r#"
pools:
  - name: tank
    guid: 42
    vdevs:
      - type: mirror
        guid: 100
        state: DEGRADED
        children:
          - guid: 7
            path: /dev/da1
            phys_path: enc0/bay1
            state: FAULTED
          - guid: 8
            path: /dev/da2
          - guid: 9
            path: /dev/da5
            is_spare: true
devices:
  - path: /dev/da3
    phys_path: enc0/bay1
    in_use: true
    label: { pool_guid: 42, guid: 7 }
  - path: /dev/da4
    unreadable: true
"#;

    #[test]
    fn test_parse_snapshot() {
        let backend = SnapshotBackend::from_yaml_str(SNAPSHOT).unwrap();
        assert_eq!(backend.pool_guids(), vec![PoolGuid(42)]);

        let pool = backend.pool(PoolGuid(42)).unwrap();
        assert_eq!(pool.name, "tank");
        let faulted = pool.vdev(VdevGuid(7)).unwrap();
        assert_eq!(faulted.state, VdevState::Faulted);
        assert_eq!(faulted.phys_path.as_deref(), Some("enc0/bay1"));
        assert!(pool.vdev(VdevGuid(9)).unwrap().is_spare);
        assert_eq!(pool.vdev(VdevGuid(100)).unwrap().vdev_type, "mirror");
        assert_eq!(pool.tree.leaves().len(), 3);
    }

    #[test]
    fn test_device_label() {
        let backend = SnapshotBackend::from_yaml_str(SNAPSHOT).unwrap();
        let device = backend.open_device("/dev/da3").unwrap();
        assert!(backend.pool_in_use(&device).unwrap());
        let label = backend.read_label(&device).unwrap().unwrap();
        assert_eq!(label.vdev_guid().unwrap(), VdevGuid(7));
        assert_eq!(backend.physical_path(&device).as_deref(), Some("enc0/bay1"));

        let unreadable = backend.open_device("/dev/da4").unwrap();
        assert_matches!(backend.read_label(&unreadable), Err(Error::LabelRead { .. }));
        assert_matches!(backend.open_device("/dev/da99"), Err(Error::DeviceNotFound { .. }));
    }

    #[test]
    fn test_detach_removes_vdev() {
        let backend = SnapshotBackend::from_yaml_str(SNAPSHOT).unwrap();
        let pool = backend.pool(PoolGuid(42)).unwrap();
        backend.detach(&pool, "/dev/da5").unwrap();

        assert!(backend.vdev(PoolGuid(42), VdevGuid(9)).is_none());
        assert_eq!(
            backend.commands(),
            vec![StorageCommand::Detach {
                pool_guid: PoolGuid(42),
                dev_path: "/dev/da5".to_string()
            }]
        );
        assert_matches!(backend.detach(&pool, "/dev/da5"), Err(Error::StorageCommand { .. }));
    }

    #[test]
    fn test_online_and_replace() {
        let backend = SnapshotBackend::from_yaml_str(SNAPSHOT).unwrap();
        backend.online(PoolGuid(42), VdevGuid(7), "/dev/da3").unwrap();
        assert_eq!(backend.vdev(PoolGuid(42), VdevGuid(7)).unwrap().state, VdevState::Healthy);

        backend.set_vdev_state(PoolGuid(42), VdevGuid(8), VdevState::Removed);
        backend.replace(PoolGuid(42), VdevGuid(8), "/dev/da4").unwrap();
        let replaced = backend.vdev(PoolGuid(42), VdevGuid(8)).unwrap();
        assert_eq!(replaced.path.as_deref(), Some("/dev/da4"));
        assert_eq!(replaced.state, VdevState::Healthy);

        assert_matches!(
            backend.online(PoolGuid(43), VdevGuid(7), "/dev/da3"),
            Err(Error::StorageCommand { .. })
        );
    }

    #[test]
    fn test_command_log_is_bounded() {
        let backend = SnapshotBackend::from_yaml_str(SNAPSHOT).unwrap();
        for i in 0..COMMAND_LOG_CAPACITY + 10 {
            backend.online(PoolGuid(42), VdevGuid(7), &format!("/dev/da{}", i)).unwrap();
        }

        let commands = backend.commands();
        assert_eq!(commands.len(), COMMAND_LOG_CAPACITY);
        assert_matches!(
            commands.first(),
            Some(StorageCommand::Online { dev_path, .. }) if dev_path == "/dev/da10"
        );

        assert_eq!(backend.take_commands().len(), COMMAND_LOG_CAPACITY);
        assert!(backend.commands().is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SNAPSHOT.as_bytes()).unwrap();
        let backend = SnapshotBackend::load(file.path()).unwrap();
        assert_eq!(backend.pool_count(), 1);
        assert_eq!(backend.device_paths(), vec!["/dev/da3", "/dev/da4"]);
    }

    #[test]
    fn test_invalid_yaml() {
        assert_matches!(
            SnapshotBackend::from_yaml_str("pools: [ { name: tank } ]"),
            Err(Error::YamlParse(_))
        );
    }
}
