//! Label Inspector
//!
//! Reads pool-membership labels from newly arrived devices and uses them to
//! resolve open cases by vdev identity.

use crate::domain::ports::{CaseRegistryRef, DeviceHandle, StorageLayerRef};
use crate::error::{Error, Result};
use crate::vdev::{Label, Vdev};
use tracing::{debug, error, info};

/// Outcome of inspecting a device for a label
#[derive(Debug, Clone, Default)]
pub struct LabelRead {
    /// Label data, when present and parsable
    pub label: Option<Label>,
    /// Device is claimed by a pool
    pub in_use: bool,
    /// Label encodes a state below healthy
    pub degraded: bool,
}

/// Inspects device labels and matches them to cases
pub struct LabelInspector {
    storage: StorageLayerRef,
    cases: CaseRegistryRef,
}

impl LabelInspector {
    pub fn new(storage: StorageLayerRef, cases: CaseRegistryRef) -> Self {
        Self { storage, cases }
    }

    /// Inspect an open device.
    ///
    /// Failures never propagate: an unreadable or unparsable label is logged
    /// and reported as absent, and the caller proceeds with what it has.
    pub fn read_label(&self, device: &DeviceHandle) -> LabelRead {
        let mut result = LabelRead::default();

        match self.storage.pool_in_use(device) {
            Ok(in_use) => result.in_use = in_use,
            Err(e) => {
                debug!(dev_path = %device.dev_path(), error = %e, "Pool membership query failed");
                return result;
            }
        }

        match self.probe_label(device) {
            Ok(Some((label, vdev))) => {
                result.degraded = !vdev.state.is_healthy();
                result.label = Some(label);
            }
            Ok(None) => {}
            Err(e @ Error::LabelParse(_)) => {
                let context = format!("read_label: {}: ", device.dev_path());
                error!("{}", e.with_context(&context));
            }
            Err(e) => {
                debug!(dev_path = %device.dev_path(), error = %e, "Label read failed");
            }
        }
        result
    }

    /// Absent label is `Ok(None)`; I/O and parse failures are errors
    fn probe_label(&self, device: &DeviceHandle) -> Result<Option<(Label, Vdev)>> {
        let Some(label) = self.storage.read_label(device)? else {
            return Ok(None);
        };
        let vdev = label.to_vdev()?;
        Ok(Some((label, vdev)))
    }

    /// Resolve a case by the identity recorded in `label`.
    ///
    /// Returns whether a case consumed the device.
    pub fn online_by_label(&self, dev_path: &str, phys_path: &str, label: &Label) -> bool {
        info!(dev_path, "Interrogating vdev label");

        let vdev = match label.to_vdev() {
            Ok(vdev) => vdev,
            Err(e) => {
                let context = format!("online_by_label: {}: ", dev_path);
                error!("{}", e.with_context(&context));
                return false;
            }
        };

        match self.cases.find(vdev.pool_guid, vdev.guid) {
            Some(case) => case.re_evaluate_device(dev_path, phys_path, Some(&vdev)),
            None => false,
        }
    }
}
