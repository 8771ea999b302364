//! Router Metrics
//!
//! Prometheus counters for routing decisions, deferral and spare reclaim.
//! Each daemon owns its own registry so tests never collide on the global one.

use crate::error::Result;
use crate::event::EventKind;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Counters for the event router and daemon loop
#[derive(Clone)]
pub struct RouterMetrics {
    registry: Registry,
    /// Events routed, by kind and outcome (consumed/retained)
    pub events_routed: IntCounterVec,
    /// Events placed on the deferred queue
    pub events_deferred: IntCounter,
    /// Events re-routed from the deferred queue
    pub events_replayed: IntCounter,
    /// Deferred events dropped after a discarding replay
    pub replay_discarded: IntCounter,
    /// Spares detached by the reclaimer
    pub spares_detached: IntCounter,
    /// Cases opened by the router
    pub cases_created: IntCounter,
    /// System rescans performed
    pub rescans: IntCounter,
    /// Events dropped as unparsable
    pub malformed_events: IntCounter,
    /// Current deferred queue depth
    pub deferred_depth: IntGauge,
}

impl std::fmt::Debug for RouterMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterMetrics")
            .field("deferred_depth", &self.deferred_depth.get())
            .finish()
    }
}

impl RouterMetrics {
    /// Create and register all metrics in a fresh registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let events_routed = IntCounterVec::new(
            Opts::new("vdevd_events_routed_total", "Events routed by kind and outcome"),
            &["kind", "outcome"],
        )?;
        let events_deferred =
            IntCounter::new("vdevd_events_deferred_total", "Events retained for replay")?;
        let events_replayed =
            IntCounter::new("vdevd_events_replayed_total", "Deferred events replayed")?;
        let replay_discarded = IntCounter::new(
            "vdevd_replay_discarded_total",
            "Deferred events dropped after a discarding replay",
        )?;
        let spares_detached = IntCounter::new("vdevd_spares_detached_total", "Spares detached")?;
        let cases_created =
            IntCounter::new("vdevd_cases_created_total", "Cases opened by the router")?;
        let rescans = IntCounter::new("vdevd_system_rescans_total", "System rescans performed")?;
        let malformed_events =
            IntCounter::new("vdevd_malformed_events_total", "Unparsable events dropped")?;
        let deferred_depth =
            IntGauge::new("vdevd_deferred_queue_depth", "Events waiting for replay")?;

        registry.register(Box::new(events_routed.clone()))?;
        registry.register(Box::new(events_deferred.clone()))?;
        registry.register(Box::new(events_replayed.clone()))?;
        registry.register(Box::new(replay_discarded.clone()))?;
        registry.register(Box::new(spares_detached.clone()))?;
        registry.register(Box::new(cases_created.clone()))?;
        registry.register(Box::new(rescans.clone()))?;
        registry.register(Box::new(malformed_events.clone()))?;
        registry.register(Box::new(deferred_depth.clone()))?;

        Ok(Self {
            registry,
            events_routed,
            events_deferred,
            events_replayed,
            replay_discarded,
            spares_detached,
            cases_created,
            rescans,
            malformed_events,
            deferred_depth,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record the outcome of one routing call
    pub fn observe_route(&self, kind: EventKind, retained: bool) {
        let outcome = if retained { "retained" } else { "consumed" };
        self.events_routed
            .with_label_values(&[&kind.to_string(), outcome])
            .inc();
    }

    /// Render the registry in the text exposition format
    pub fn encode(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_route() {
        let metrics = RouterMetrics::new().unwrap();
        metrics.observe_route(EventKind::Zfs, true);
        metrics.observe_route(EventKind::Zfs, true);
        metrics.observe_route(EventKind::Devfs, false);

        assert_eq!(
            metrics.events_routed.with_label_values(&["zfs", "retained"]).get(),
            2
        );
        assert_eq!(
            metrics.events_routed.with_label_values(&["devfs", "consumed"]).get(),
            1
        );
    }

    #[test]
    fn test_encode() {
        let metrics = RouterMetrics::new().unwrap();
        metrics.spares_detached.inc();
        let text = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(text.contains("vdevd_spares_detached_total 1"));
    }

    #[test]
    fn test_independent_registries() {
        let a = RouterMetrics::new().unwrap();
        let b = RouterMetrics::new().unwrap();
        a.rescans.inc();
        assert_eq!(b.rescans.get(), 0);
    }
}
