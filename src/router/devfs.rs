//! Device-arrival routing
//!
//! A new disk may be the missing half of an open case: either the same vdev
//! coming back (matched by its label) or a replacement slotted into the bay a
//! failed vdev occupied (matched by physical path).

use crate::event::classes::DEVFS_CREATE;
use crate::event::Event;
use crate::router::EventRouter;
use tracing::{debug, info};

impl EventRouter {
    /// Route a device-node event. Device arrivals are never retained.
    pub(crate) fn route_devfs(&self, event: &Event) -> bool {
        // Only newly created nodes that can be vdevs are of interest
        if event.type_tag() != DEVFS_CREATE || !event.is_disk_dev() {
            return false;
        }

        info!(event = %event, "Device arrival");

        let Some(dev_path) = event.dev_path() else {
            return false;
        };

        let device = match self.ctx.storage.open_device(&dev_path) {
            Ok(device) => device,
            Err(e) => {
                debug!(dev_path = %dev_path, error = %e, "Unable to open arriving device");
                return false;
            }
        };

        let inspection = self.inspector.read_label(&device);
        let phys_path = self.ctx.storage.physical_path(&device);
        let dev_name = event.dev_name().unwrap_or_default().to_string();
        drop(device);

        match (&inspection.label, inspection.in_use) {
            (Some(label), true) => {
                self.inspector
                    .online_by_label(&dev_path, phys_path.as_deref().unwrap_or(""), label);
            }
            _ if inspection.degraded => {
                info!(
                    dev_name = %dev_name,
                    "{} is marked degraded. Ignoring as a replace by physical path candidate.",
                    dev_name
                );
            }
            _ => {
                if let (Some(phys_path), true) = (phys_path.as_deref(), event.is_whole_dev()) {
                    if let Some(case) = self.ctx.cases.find_by_phys_path(phys_path) {
                        info!(
                            pool_guid = %case.pool_guid(),
                            vdev_guid = %case.vdev_guid(),
                            state = %case.vdev_state(),
                            "Found case ({}:{}:{}) - re-evaluating",
                            case.pool_guid(),
                            case.vdev_guid(),
                            case.vdev_state()
                        );
                        case.re_evaluate_device(&dev_path, phys_path, None);
                    }
                }
            }
        }

        false
    }
}
