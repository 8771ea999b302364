//! Event Router
//!
//! The policy engine at the heart of the daemon. Each dispatched event is
//! classified by kind, correlated to an open case by vdev identity (or, for
//! device arrivals only, by physical slot), and either forwarded, used to open
//! a new case, discarded, or retained for replay once topology catches up.
//!
//! Routing is synchronous and run-to-completion: there is no suspension point
//! between receiving an event and returning the retain decision.

pub mod devfs;
pub mod inspector;
pub mod queue;
pub mod spares;
pub mod zfs;

pub use inspector::{LabelInspector, LabelRead};
pub use queue::EventQueue;
pub use spares::SpareReclaimer;

use crate::domain::ports::{
    CaseRegistryRef, DaemonControlRef, DeferredQueueRef, StorageLayerRef, TopologyReaderRef,
};
use crate::event::{Event, EventKind};
use crate::metrics::RouterMetrics;
use std::sync::Arc;
use tracing::{debug, info};

// =============================================================================
// Router Context
// =============================================================================

/// Collaborators injected into the router at construction
#[derive(Clone)]
pub struct RouterContext {
    /// Live pool configuration
    pub topology: TopologyReaderRef,
    /// Device and pool commands
    pub storage: StorageLayerRef,
    /// Open cases
    pub cases: CaseRegistryRef,
    /// Events waiting for topology
    pub deferred: DeferredQueueRef,
    /// Daemon-wide requests
    pub control: DaemonControlRef,
    /// Routing counters
    pub metrics: Arc<RouterMetrics>,
}

// =============================================================================
// Event Router
// =============================================================================

/// Decides, for every event, which case it belongs to and whether to keep it
pub struct EventRouter {
    ctx: RouterContext,
    inspector: LabelInspector,
    reclaimer: SpareReclaimer,
}

impl EventRouter {
    /// Create a router over the given collaborators
    pub fn new(ctx: RouterContext) -> Self {
        let inspector = LabelInspector::new(ctx.storage.clone(), ctx.cases.clone());
        let reclaimer = SpareReclaimer::new(
            ctx.topology.clone(),
            ctx.storage.clone(),
            ctx.metrics.clone(),
        );
        Self {
            ctx,
            inspector,
            reclaimer,
        }
    }

    pub fn context(&self) -> &RouterContext {
        &self.ctx
    }

    pub fn inspector(&self) -> &LabelInspector {
        &self.inspector
    }

    pub fn reclaimer(&self) -> &SpareReclaimer {
        &self.reclaimer
    }

    /// Route one event. Returns true when the event should be retained and
    /// replayed later.
    pub fn route(&self, event: &Event) -> bool {
        let retain = match event.kind() {
            EventKind::Devfs => self.route_devfs(event),
            EventKind::Zfs => self.route_zfs(event),
        };
        self.ctx.metrics.observe_route(event.kind(), retain);
        retain
    }

    /// Route an event handed over by the dispatcher, retaining a copy on the
    /// deferred queue when routing asks for it.
    pub fn dispatch(&self, event: &Event) -> bool {
        let retain = self.route(event);
        if retain {
            debug!(event = %event, "Deferring event");
            self.ctx.deferred.enqueue(event.clone());
            self.ctx.metrics.events_deferred.inc();
            self.ctx.metrics.deferred_depth.set(self.ctx.deferred.len() as i64);
        }
        retain
    }

    /// Re-route every deferred event in insertion order.
    ///
    /// With `discard` set, events that still fail to resolve are dropped
    /// instead of being retained again.
    pub fn replay_deferred(&self, discard: bool) {
        let pending = self.ctx.deferred.len();
        if pending == 0 {
            return;
        }
        info!(pending, discard, "Replaying deferred events");

        let mut replayed = 0u64;
        let mut dropped = 0u64;
        self.ctx.deferred.replay_all(discard, &mut |event| {
            replayed += 1;
            let retain = self.route(event);
            if retain && discard {
                info!(event = %event, "Dropping deferred event that still does not resolve");
                dropped += 1;
            }
            retain
        });

        self.ctx.metrics.events_replayed.inc_by(replayed);
        self.ctx.metrics.replay_discarded.inc_by(dropped);
        self.ctx.metrics.deferred_depth.set(self.ctx.deferred.len() as i64);
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("deferred", &self.ctx.deferred.len())
            .finish()
    }
}
