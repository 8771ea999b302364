//! Daemon Loop
//!
//! Reads devd lines from an event source, turns them into events and hands
//! each to the router in arrival order. Every (re)connect starts with
//! missed-event detection, since anything that happened while disconnected
//! was never seen.

use crate::daemon::control::RescanFlag;
use crate::daemon::source::EventSource;
use crate::domain::ports::{
    CaseRegistryRef, DaemonControl, StorageLayerRef, TopologyReaderRef,
};
use crate::error::{ErrorAction, Result};
use crate::event::{Event, EventFactory};
use crate::metrics::RouterMetrics;
use crate::router::{EventQueue, EventRouter, RouterContext};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Why the daemon loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Shutdown was requested
    Cancelled,
    /// A non-reconnectable source ran out of input
    EndOfInput,
}

/// The fault-management daemon
pub struct Daemon {
    router: EventRouter,
    factory: EventFactory,
    queue: Arc<EventQueue>,
    rescan: Arc<RescanFlag>,
    rescan_globs: Vec<String>,
}

impl Daemon {
    pub fn new(
        topology: TopologyReaderRef,
        storage: StorageLayerRef,
        cases: CaseRegistryRef,
        metrics: Arc<RouterMetrics>,
        rescan_globs: Vec<String>,
    ) -> Self {
        let queue = Arc::new(EventQueue::new());
        let rescan = Arc::new(RescanFlag::new());
        let router = EventRouter::new(RouterContext {
            topology,
            storage,
            cases,
            deferred: queue.clone(),
            control: rescan.clone(),
            metrics,
        });
        Self {
            router,
            factory: EventFactory::default(),
            queue,
            rescan,
            rescan_globs,
        }
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn rescan_flag(&self) -> &RescanFlag {
        &self.rescan
    }

    /// Parse and route one devd line, then run any rescan it requested
    pub fn process_line(&self, line: &str) {
        if line.is_empty() {
            return;
        }
        match self.factory.build(line) {
            Ok(Some(event)) => self.process_event(&event),
            Ok(None) => debug!(line, "Ignoring event from unhandled system"),
            Err(e) => {
                warn!(line, error = %e, "Dropping malformed event");
                self.router.context().metrics.malformed_events.inc();
            }
        }
    }

    /// Route one event, then run any rescan it requested
    pub fn process_event(&self, event: &Event) {
        self.router.dispatch(event);
        self.run_pending_rescan();
    }

    /// Catch up on whatever happened while no event stream was attached.
    ///
    /// Opens cases for every impaired leaf vdev, gives deferred events
    /// another chance without discarding them, and rescans all devices.
    pub fn detect_missed_events(&self) {
        let ctx = self.router.context();
        let mut opened = 0;
        for pool_guid in ctx.topology.pool_guids() {
            let Some(pool) = ctx.topology.pool(pool_guid) else {
                continue;
            };
            for idx in pool.tree.leaves() {
                let Some(vdev) = pool.tree.get(idx) else {
                    continue;
                };
                if !vdev.state.is_impaired()
                    || ctx.cases.find(vdev.pool_guid, vdev.guid).is_some()
                {
                    continue;
                }
                debug!(
                    pool = %pool.name,
                    vdev_guid = %vdev.guid,
                    state = %vdev.state,
                    "Opening case for impaired vdev"
                );
                ctx.cases.create(vdev);
                ctx.metrics.cases_created.inc();
                opened += 1;
            }
        }
        info!(opened, "Missed event detection complete");

        self.router.replay_deferred(false);
        self.rescan.request_system_rescan();
        self.run_pending_rescan();
    }

    fn run_pending_rescan(&self) {
        // A rescan may itself request another one
        while self.rescan.take() {
            self.system_rescan();
        }
    }

    /// Synthesize a device arrival for every device node matching the
    /// rescan globs. Returns the number of arrivals routed.
    pub fn system_rescan(&self) -> usize {
        self.router.context().metrics.rescans.inc();
        let mut routed = 0;
        for pattern in &self.rescan_globs {
            let paths = match glob::glob(pattern) {
                Ok(paths) => paths,
                Err(e) => {
                    error!(pattern, error = %e, "Invalid rescan pattern");
                    continue;
                }
            };
            for entry in paths {
                let path = match entry {
                    Ok(path) => path,
                    Err(e) => {
                        debug!(error = %e, "Skipping unreadable rescan entry");
                        continue;
                    }
                };
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let event = Event::devfs_create(name);
                self.router.dispatch(&event);
                routed += 1;
            }
        }
        info!(routed, "System rescan complete");
        routed
    }

    /// Run until cancelled or until a non-reconnectable source ends
    pub async fn run<S>(&self, source: &mut S, cancel: CancellationToken) -> Result<ExitReason>
    where
        S: EventSource + ?Sized,
    {
        loop {
            info!(source = %source.describe(), "Connecting to event source");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(ExitReason::Cancelled),
                connected = source.connect() => connected?,
            }
            self.detect_missed_events();

            loop {
                let line = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(ExitReason::Cancelled),
                    line = source.next_line() => line,
                };
                match line {
                    Ok(Some(line)) => self.process_line(&line),
                    Ok(None) => {
                        info!(source = %source.describe(), "Event source closed");
                        break;
                    }
                    Err(e) => match e.action() {
                        ErrorAction::Reconnect => {
                            warn!(source = %source.describe(), error = %e, "Event source failed");
                            break;
                        }
                        ErrorAction::Discard => {
                            warn!(error = %e, "Dropping unreadable event");
                        }
                        ErrorAction::Abort => return Err(e),
                    },
                }
            }

            if !source.reconnectable() {
                return Ok(ExitReason::EndOfInput);
            }
        }
    }
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("router", &self.router)
            .field("rescan_globs", &self.rescan_globs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DeviceSpec, SnapshotBackend};
    use crate::case::InMemoryCaseRegistry;
    use crate::daemon::source::ReaderSource;
    use crate::domain::guid::{PoolGuid, VdevGuid};
    use crate::domain::ports::{CaseRegistry, DeferredQueue};
    use crate::vdev::{Label, Vdev, VdevState};
    use tokio::io::BufReader;

    const POOL: PoolGuid = PoolGuid(42);

    fn daemon_with(
        backend: Arc<SnapshotBackend>,
        globs: Vec<String>,
    ) -> (Daemon, Arc<InMemoryCaseRegistry>) {
        let cases = InMemoryCaseRegistry::new(backend.clone(), backend.clone());
        let metrics = Arc::new(RouterMetrics::new().unwrap());
        let daemon = Daemon::new(backend.clone(), backend, cases.clone(), metrics, globs);
        (daemon, cases)
    }

    fn faulted_pool() -> Arc<SnapshotBackend> {
        let backend = SnapshotBackend::new();
        backend.add_pool(
            "tank",
            POOL,
            vec![
                Vdev::disk(POOL, VdevGuid(7), VdevState::Faulted).with_path("/dev/da1"),
                Vdev::disk(POOL, VdevGuid(8), VdevState::Healthy).with_path("/dev/da2"),
            ],
        );
        Arc::new(backend)
    }

    #[test]
    fn test_missed_event_detection_opens_cases() {
        let (daemon, cases) = daemon_with(faulted_pool(), vec![]);
        daemon.detect_missed_events();

        assert!(cases.find(POOL, VdevGuid(7)).is_some());
        assert!(cases.find(POOL, VdevGuid(8)).is_none());
        assert!(!daemon.rescan_flag().is_pending());
        assert_eq!(daemon.rescan_flag().request_count(), 1);
    }

    #[test]
    fn test_missed_event_detection_skips_unknown_state() {
        let backend = faulted_pool();
        backend.set_vdev_state(POOL, VdevGuid(8), VdevState::Unknown);
        let (daemon, cases) = daemon_with(backend, vec![]);
        daemon.detect_missed_events();

        assert!(cases.find(POOL, VdevGuid(7)).is_some());
        assert!(cases.find(POOL, VdevGuid(8)).is_none());
        assert_eq!(cases.stats().opened, 1);
    }

    #[test]
    fn test_missed_event_detection_keeps_deferred_events() {
        let (daemon, _cases) = daemon_with(faulted_pool(), vec![]);
        daemon.process_line(
            "!system=ZFS subsystem=ZFS class=ereport.fs.zfs.io pool_guid=99 vdev_guid=1",
        );
        assert_eq!(daemon.queue().len(), 1);

        daemon.detect_missed_events();
        assert_eq!(daemon.queue().len(), 1);
    }

    #[test]
    fn test_malformed_line_is_counted() {
        let (daemon, _cases) = daemon_with(faulted_pool(), vec![]);
        daemon.process_line("!system=ZFS \"unterminated");
        daemon.process_line("garbage");
        assert_eq!(daemon.router().context().metrics.malformed_events.get(), 2);
    }

    #[test]
    fn test_rescan_routes_device_arrivals() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("da3"), b"").unwrap();
        std::fs::write(dir.path().join("da4"), b"").unwrap();
        let pattern = format!("{}/da*", dir.path().display());

        let backend = faulted_pool();
        let label = Label::new(serde_json::json!({ "pool_guid": 42, "guid": 7 }));
        backend.add_device(DeviceSpec::new("/dev/da3").with_label(label));
        let (daemon, cases) = daemon_with(backend.clone(), vec![pattern]);
        cases.create(&Vdev::disk(POOL, VdevGuid(7), VdevState::Faulted));

        assert_eq!(daemon.system_rescan(), 2);
        assert!(cases.find(POOL, VdevGuid(7)).is_none());
        assert_eq!(backend.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_run_replays_reader_to_end() {
        let input = b"!system=ZFS subsystem=ZFS class=ereport.fs.zfs.io pool_guid=42 vdev_guid=7\n\
!system=ZFS subsystem=ZFS class=ereport.fs.zfs.io pool_guid=43 vdev_guid=1\n";
        let mut source = ReaderSource::new("test", BufReader::new(&input[..]));
        let (daemon, cases) = daemon_with(faulted_pool(), vec![]);

        let reason = daemon.run(&mut source, CancellationToken::new()).await.unwrap();
        assert_eq!(reason, ExitReason::EndOfInput);
        assert!(cases.find(POOL, VdevGuid(7)).is_some());
        assert_eq!(daemon.queue().len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_when_cancelled() {
        let mock = tokio_test::io::Builder::new()
            .wait(std::time::Duration::from_secs(3600))
            .build();
        let mut source = ReaderSource::new("idle", BufReader::new(mock));
        let (daemon, _cases) = daemon_with(faulted_pool(), vec![]);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let reason = daemon.run(&mut source, cancel).await.unwrap();
        assert_eq!(reason, ExitReason::Cancelled);
    }
}
