//! In-Memory Case Registry
//!
//! Holds every open case keyed by vdev identity. Cases close themselves;
//! the registry prunes closed entries the next time it is consulted.

use crate::case::case_file::VdevCase;
use crate::case::events::CaseEvent;
use crate::domain::guid::{CaseKey, PoolGuid, VdevGuid};
use crate::domain::ports::{CaseFile, CaseRef, CaseRegistry, StorageLayerRef, TopologyReaderRef};
use crate::event::Event;
use crate::vdev::Vdev;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the case event channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct RegistryStats {
    opened: AtomicU64,
    closed: AtomicU64,
}

/// Snapshot of registry statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStatsSnapshot {
    pub open_cases: u64,
    pub opened: u64,
    pub closed: u64,
}

// =============================================================================
// Registry
// =============================================================================

/// Case registry backed by an ordered map
pub struct InMemoryCaseRegistry {
    /// Cases keyed by (pool, vdev)
    cases: RwLock<BTreeMap<CaseKey, Arc<VdevCase>>>,
    topology: TopologyReaderRef,
    storage: StorageLayerRef,
    stats: RegistryStats,
    event_sender: broadcast::Sender<CaseEvent>,
}

impl InMemoryCaseRegistry {
    pub fn new(topology: TopologyReaderRef, storage: StorageLayerRef) -> Arc<Self> {
        let (event_sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            cases: RwLock::new(BTreeMap::new()),
            topology,
            storage,
            stats: RegistryStats::default(),
            event_sender,
        })
    }

    /// Get an event receiver
    pub fn subscribe(&self) -> broadcast::Receiver<CaseEvent> {
        self.event_sender.subscribe()
    }

    /// Concrete case for a key, including not-yet-pruned closed ones
    pub fn get(&self, key: CaseKey) -> Option<Arc<VdevCase>> {
        self.cases.read().get(&key).cloned()
    }

    /// Drop closed cases. Returns how many were removed.
    pub fn prune_closed(&self) -> usize {
        let mut cases = self.cases.write();
        let before = cases.len();
        cases.retain(|key, case| {
            let closed = case.is_closed();
            if closed {
                debug!(case = %key, "Pruning closed case");
            }
            !closed
        });
        let removed = before - cases.len();
        self.stats.closed.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn len(&self) -> usize {
        self.cases.read().values().filter(|c| !c.is_closed()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RegistryStatsSnapshot {
        RegistryStatsSnapshot {
            open_cases: self.len() as u64,
            opened: self.stats.opened.load(Ordering::Relaxed),
            closed: self.stats.closed.load(Ordering::Relaxed),
        }
    }

    fn open_entries(&self) -> Vec<Arc<VdevCase>> {
        self.cases
            .read()
            .values()
            .filter(|c| !c.is_closed())
            .cloned()
            .collect()
    }
}

impl CaseRegistry for InMemoryCaseRegistry {
    fn find(&self, pool_guid: PoolGuid, vdev_guid: VdevGuid) -> Option<CaseRef> {
        let case = self.get(CaseKey::new(pool_guid, vdev_guid))?;
        if case.is_closed() {
            self.prune_closed();
            return None;
        }
        Some(case)
    }

    fn find_by_phys_path(&self, phys_path: &str) -> Option<CaseRef> {
        self.open_entries()
            .into_iter()
            .find(|case| case.physical_path().as_deref() == Some(phys_path))
            .map(|case| case as CaseRef)
    }

    fn create(&self, vdev: &Vdev) -> CaseRef {
        let key = CaseKey::new(vdev.pool_guid, vdev.guid);
        let mut cases = self.cases.write();
        if let Some(existing) = cases.get(&key) {
            if !existing.is_closed() {
                return existing.clone();
            }
            self.stats.closed.fetch_add(1, Ordering::Relaxed);
        }

        let case = Arc::new(VdevCase::new(
            vdev,
            self.topology.clone(),
            self.storage.clone(),
            self.event_sender.clone(),
        ));
        cases.insert(key, case.clone());
        self.stats.opened.fetch_add(1, Ordering::Relaxed);

        let _ = self.event_sender.send(CaseEvent::Opened {
            key,
            state: vdev.state,
        });
        debug!(case = %key, state = %vdev.state, "Opened case");
        case
    }

    fn re_evaluate_by_guid(&self, pool_guid: PoolGuid, event: &Event) {
        // Collected first: a case may close while being evaluated
        let cases: Vec<_> = self
            .open_entries()
            .into_iter()
            .filter(|case| case.key().pool_guid == pool_guid)
            .collect();
        for case in cases {
            case.re_evaluate(event);
        }
        self.prune_closed();
    }

    fn open_cases(&self) -> Vec<CaseRef> {
        self.open_entries()
            .into_iter()
            .map(|case| case as CaseRef)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SnapshotBackend;
    use crate::event::classes::{POOL_DESTROY, RESOURCE_STATECHANGE};
    use crate::vdev::VdevState;

    const POOL: PoolGuid = PoolGuid(42);

    fn setup() -> (Arc<SnapshotBackend>, Arc<InMemoryCaseRegistry>) {
        let backend = SnapshotBackend::new();
        backend.add_pool(
            "tank",
            POOL,
            vec![
                Vdev::disk(POOL, VdevGuid(1), VdevState::Faulted).with_phys_path("bay1"),
                Vdev::disk(POOL, VdevGuid(2), VdevState::Removed).with_phys_path("bay2"),
                Vdev::disk(POOL, VdevGuid(3), VdevState::Healthy),
            ],
        );
        let backend = Arc::new(backend);
        let registry = InMemoryCaseRegistry::new(backend.clone(), backend.clone());
        (backend, registry)
    }

    fn vdev(backend: &SnapshotBackend, guid: u64) -> Vdev {
        use crate::domain::ports::TopologyReader;
        backend.vdev(POOL, VdevGuid(guid)).unwrap()
    }

    #[test]
    fn test_create_and_find() {
        let (backend, registry) = setup();
        let mut rx = registry.subscribe();

        let case = registry.create(&vdev(&backend, 1));
        assert_eq!(case.vdev_guid(), VdevGuid(1));
        assert!(registry.find(POOL, VdevGuid(1)).is_some());
        assert!(registry.find(POOL, VdevGuid(2)).is_none());
        assert!(matches!(rx.try_recv(), Ok(CaseEvent::Opened { .. })));
    }

    #[test]
    fn test_create_is_idempotent() {
        let (backend, registry) = setup();
        let first = registry.create(&vdev(&backend, 1));
        let second = registry.create(&vdev(&backend, 1));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.stats().opened, 1);
    }

    #[test]
    fn test_find_by_phys_path() {
        let (backend, registry) = setup();
        registry.create(&vdev(&backend, 1));
        registry.create(&vdev(&backend, 2));

        let case = registry.find_by_phys_path("bay2").unwrap();
        assert_eq!(case.vdev_guid(), VdevGuid(2));
        assert!(registry.find_by_phys_path("bay9").is_none());
    }

    #[test]
    fn test_pool_destroy_closes_all_cases() {
        let (backend, registry) = setup();
        registry.create(&vdev(&backend, 1));
        registry.create(&vdev(&backend, 2));

        let event = Event::zfs(&[("type", POOL_DESTROY), ("pool_guid", "42")]);
        registry.re_evaluate_by_guid(POOL, &event);

        assert!(registry.is_empty());
        assert!(registry.open_cases().is_empty());
        assert_eq!(registry.stats().closed, 2);
    }

    #[test]
    fn test_closed_case_is_pruned_on_find() {
        let (backend, registry) = setup();
        registry.create(&vdev(&backend, 3));

        // Healthy vdev: the statechange solves the case
        let event = Event::zfs(&[
            ("class", RESOURCE_STATECHANGE),
            ("pool_guid", "42"),
            ("vdev_guid", "3"),
        ]);
        let case = registry.find(POOL, VdevGuid(3)).unwrap();
        assert!(case.re_evaluate(&event));

        assert!(registry.find(POOL, VdevGuid(3)).is_none());
        assert!(registry.get(CaseKey::new(POOL, VdevGuid(3))).is_none());
    }

    #[test]
    fn test_other_pool_untouched() {
        let (backend, registry) = setup();
        registry.create(&vdev(&backend, 1));

        let event = Event::zfs(&[("type", POOL_DESTROY), ("pool_guid", "43")]);
        registry.re_evaluate_by_guid(PoolGuid(43), &event);
        assert_eq!(registry.len(), 1);
    }
}
