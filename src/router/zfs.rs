//! Storage-subsystem routing
//!
//! Pool-scoped notifications drive pool-wide actions (replay, bulk
//! re-evaluation, spare cleanup, rescans). Vdev-scoped notifications are
//! matched to a case by identity, open a new case, or wait on the deferred
//! queue until the pool or vdev becomes visible.

use crate::event::classes::{
    CONFIG_SYNC, NO_REPLICAS, POOL_DESTROY, POOL_EVENT_PREFIX, RESILVER_FINISH, VDEV_REMOVE,
};
use crate::event::Event;
use crate::router::EventRouter;
use tracing::{error, info};

impl EventRouter {
    /// Route a subsystem event. Returns true to retain it for replay.
    pub(crate) fn route_zfs(&self, event: &Event) -> bool {
        if !event.contains("class") && !event.contains("type") {
            error!(event = %event, "Subsystem event is missing class or type data");
            return false;
        }

        // On config syncs, replay queued events first. Anything that still
        // does not resolve refers to a vdev or pool that no longer exists.
        if event.type_tag().starts_with(CONFIG_SYNC) {
            self.replay_deferred(true);
            if let Some(pool_guid) = event.pool_guid() {
                self.ctx.cases.re_evaluate_by_guid(pool_guid, event);
            }
        }

        if event.type_tag().starts_with(POOL_EVENT_PREFIX) {
            self.process_pool_event(event);
            return false;
        }

        // Only vdev-scoped events from here on
        let Some(key) = event.case_key() else {
            return false;
        };

        if let Some(case) = self.ctx.cases.find(key.pool_guid, key.vdev_guid) {
            info!(event = %event, case = %key, "Evaluating existing case file");
            case.re_evaluate(event);
            return false;
        }

        // A pool with no replicas left is not manageable
        if event.class_tag().starts_with(NO_REPLICAS) {
            info!(
                event = %event,
                pool_guid = %key.pool_guid,
                "No replicas available for pool {}, ignoring",
                key.pool_guid
            );
            return false;
        }

        let Some(pool) = self.ctx.topology.pool(key.pool_guid) else {
            info!(
                event = %event,
                pool_guid = %key.pool_guid,
                "Event for unknown pool {} queued",
                key.pool_guid
            );
            return true;
        };

        let Some(vdev) = pool.vdev(key.vdev_guid) else {
            info!(
                event = %event,
                vdev_guid = %key.vdev_guid,
                "Event for unknown vdev {} queued",
                key.vdev_guid
            );
            return true;
        };

        let case = self.ctx.cases.create(&vdev);
        self.ctx.metrics.cases_created.inc();
        if !case.re_evaluate(event) {
            info!(
                event = %event,
                pool = %pool.name,
                vdev_guid = %vdev.guid,
                "Unconsumed event for vdev({},{}) queued",
                pool.name,
                vdev.guid
            );
            return true;
        }
        false
    }

    /// Configuration changes, resilver completion, removals and the like
    fn process_pool_event(&self, event: &Event) {
        let type_tag = event.type_tag();
        let pool_guid = event.pool_guid();

        // The pool is gone; its cases close themselves on re-evaluation
        if type_tag == POOL_DESTROY {
            info!(event = %event, "Pool destroyed");
            if let Some(pool_guid) = pool_guid {
                self.ctx.cases.re_evaluate_by_guid(pool_guid, event);
            }
            return;
        }

        let mut degraded_device = false;
        let case = event
            .case_key()
            .and_then(|key| self.ctx.cases.find(key.pool_guid, key.vdev_guid));

        if let Some(case) = case {
            degraded_device = case.vdev_state().is_impaired();
            info!(event = %event, "Evaluating existing case file");
            case.re_evaluate(event);
        } else if type_tag == RESILVER_FINISH {
            // A resilver can finish with no case open, e.g. when a damaged
            // pool was exported, repaired and reimported.
            info!(event = %event, "Resilver finished without a case, cleaning up spares");
            if let Some(pool_guid) = pool_guid {
                self.reclaimer.cleanup_spares(pool_guid);
            }
        }

        if type_tag == VDEV_REMOVE && !degraded_device {
            // The freed device may be usable by another case
            info!(event = %event, "Vdev removed, requesting system rescan");
            self.ctx.control.request_system_rescan();
        }
    }
}
