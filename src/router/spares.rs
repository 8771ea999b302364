//! Spare Reclaimer
//!
//! The kernel does not always detach a hot spare once it is no longer
//! needed, e.g. when a drive is pulled, the pool is exported or the machine
//! powered off, and the drive is reinserted before import. Such spares sit
//! next to a healthy sibling and are detached here.

use crate::domain::guid::PoolGuid;
use crate::domain::ports::{StorageLayerRef, TopologyReaderRef};
use crate::metrics::RouterMetrics;
use crate::vdev::{NodeIndex, PoolTopology, VdevTree};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Whether the spare at `idx` has a healthy, non-spare sibling
pub fn is_redundant_spare(tree: &VdevTree, idx: NodeIndex) -> bool {
    let Some(vdev) = tree.get(idx) else {
        return false;
    };
    if !vdev.is_spare {
        return false;
    }
    let Some(parent) = tree.parent(idx) else {
        return false;
    };
    tree.children(parent)
        .iter()
        .filter_map(|sibling| tree.get(*sibling))
        .any(|sibling| !sibling.is_spare && sibling.state.is_healthy())
}

/// Detaches spares that are no longer covering for a failed device
pub struct SpareReclaimer {
    topology: TopologyReaderRef,
    storage: StorageLayerRef,
    metrics: Arc<RouterMetrics>,
}

impl SpareReclaimer {
    pub fn new(
        topology: TopologyReaderRef,
        storage: StorageLayerRef,
        metrics: Arc<RouterMetrics>,
    ) -> Self {
        Self {
            topology,
            storage,
            metrics,
        }
    }

    /// Walk every vdev of a pool and detach each redundant spare.
    ///
    /// Returns the number of spares detached.
    pub fn cleanup_spares(&self, pool_guid: PoolGuid) -> usize {
        let Some(pool) = self.topology.pool(pool_guid) else {
            debug!(%pool_guid, "Pool not visible, no spares to clean up");
            return 0;
        };

        let mut detached = 0;
        pool.tree.each(|idx, _| {
            if self.try_detach(&pool, idx) {
                detached += 1;
            }
            // Never done: other spares in the pool may also be detachable
            false
        });
        detached
    }

    /// Detach the vdev at `idx` if it is a redundant spare.
    ///
    /// Returns whether a detach was issued successfully.
    pub fn try_detach(&self, pool: &PoolTopology, idx: NodeIndex) -> bool {
        if !is_redundant_spare(&pool.tree, idx) {
            return false;
        }
        let Some(vdev) = pool.tree.get(idx) else {
            return false;
        };
        let Some(path) = vdev.path.as_deref() else {
            warn!(
                pool = %pool.name,
                vdev_guid = %vdev.guid,
                "Redundant spare has no device path, cannot detach"
            );
            return false;
        };

        info!(
            pool = %pool.name,
            dev_path = path,
            "Detaching spare vdev {} from pool {}",
            path,
            pool.name
        );
        match self.storage.detach(pool, path) {
            Ok(()) => {
                self.metrics.spares_detached.inc();
                true
            }
            Err(e) => {
                error!(pool = %pool.name, dev_path = path, error = %e, "Spare detach failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::guid::VdevGuid;
    use crate::vdev::{Vdev, VdevState};

    fn tree_with(children: &[Vdev]) -> (VdevTree, Vec<NodeIndex>) {
        let pool = PoolGuid(1);
        let root = Vdev::interior(pool, VdevGuid(100), "root", VdevState::Healthy);
        let mut tree = VdevTree::new(root);
        let group = tree.add_child(
            tree.root(),
            Vdev::interior(pool, VdevGuid(101), "spare", VdevState::Degraded),
        );
        let idx = children.iter().map(|c| tree.add_child(group, c.clone())).collect();
        (tree, idx)
    }

    #[test]
    fn test_spare_with_healthy_sibling_is_redundant() {
        let pool = PoolGuid(1);
        let (tree, idx) = tree_with(&[
            Vdev::disk(pool, VdevGuid(1), VdevState::Healthy).spare(),
            Vdev::disk(pool, VdevGuid(2), VdevState::Faulted),
            Vdev::disk(pool, VdevGuid(3), VdevState::Healthy),
        ]);
        assert!(is_redundant_spare(&tree, idx[0]));
        assert!(!is_redundant_spare(&tree, idx[1]));
    }

    #[test]
    fn test_spare_without_healthy_sibling_is_needed() {
        let pool = PoolGuid(1);
        let (tree, idx) = tree_with(&[
            Vdev::disk(pool, VdevGuid(1), VdevState::Healthy).spare(),
            Vdev::disk(pool, VdevGuid(2), VdevState::Faulted),
        ]);
        assert!(!is_redundant_spare(&tree, idx[0]));
    }

    #[test]
    fn test_healthy_spare_sibling_does_not_count() {
        let pool = PoolGuid(1);
        let (tree, idx) = tree_with(&[
            Vdev::disk(pool, VdevGuid(1), VdevState::Healthy).spare(),
            Vdev::disk(pool, VdevGuid(2), VdevState::Healthy).spare(),
            Vdev::disk(pool, VdevGuid(3), VdevState::Removed),
        ]);
        assert!(!is_redundant_spare(&tree, idx[0]));
    }
}
