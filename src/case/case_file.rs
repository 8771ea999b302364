//! Vdev Case
//!
//! A case tracks one impaired vdev until it is repaired, replaced or removed
//! from the pool. It accumulates fault reports as evidence and issues
//! online/replace commands when a suitable device shows up.

use crate::case::events::{CaseEvent, CloseReason};
use crate::domain::guid::{CaseKey, PoolGuid, VdevGuid};
use crate::domain::ports::{CaseFile, StorageLayerRef, TopologyReaderRef};
use crate::event::classes::{
    CONFIG_SYNC, EREPORT_CHECKSUM, EREPORT_IO, EREPORT_PROBE_FAILURE, POOL_DESTROY,
    RESOURCE_REMOVED, RESOURCE_STATECHANGE, VDEV_REMOVE,
};
use crate::event::Event;
use crate::vdev::{Vdev, VdevState};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Maximum number of fault reports kept per case
pub const MAX_EVIDENCE: usize = 64;

/// Mutable part of a case
#[derive(Debug)]
struct CaseState {
    vdev_state: VdevState,
    dev_path: Option<String>,
    phys_path: Option<String>,
    evidence: VecDeque<Event>,
    closed: Option<CloseReason>,
}

/// Case file for a single vdev
pub struct VdevCase {
    key: CaseKey,
    opened_at: DateTime<Utc>,
    state: Mutex<CaseState>,
    topology: TopologyReaderRef,
    storage: StorageLayerRef,
    event_sender: broadcast::Sender<CaseEvent>,
}

impl std::fmt::Debug for VdevCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("VdevCase")
            .field("key", &self.key)
            .field("vdev_state", &state.vdev_state)
            .field("evidence", &state.evidence.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl VdevCase {
    /// Open a case for `vdev` with its currently known state
    pub fn new(
        vdev: &Vdev,
        topology: TopologyReaderRef,
        storage: StorageLayerRef,
        event_sender: broadcast::Sender<CaseEvent>,
    ) -> Self {
        Self {
            key: CaseKey::new(vdev.pool_guid, vdev.guid),
            opened_at: Utc::now(),
            state: Mutex::new(CaseState {
                vdev_state: vdev.state,
                dev_path: vdev.path.clone(),
                phys_path: vdev.phys_path.clone(),
                evidence: VecDeque::new(),
                closed: None,
            }),
            topology,
            storage,
            event_sender,
        }
    }

    pub fn key(&self) -> CaseKey {
        self.key
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed.is_some()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.state.lock().closed
    }

    /// Number of fault reports recorded against the vdev
    pub fn evidence_count(&self) -> usize {
        self.state.lock().evidence.len()
    }

    /// Last known device node of the vdev
    pub fn dev_path(&self) -> Option<String> {
        self.state.lock().dev_path.clone()
    }

    /// Close the case. Closing twice keeps the first reason.
    pub fn close(&self, reason: CloseReason) {
        {
            let mut state = self.state.lock();
            if state.closed.is_some() {
                return;
            }
            state.closed = Some(reason);
            state.evidence.clear();
        }
        info!(case = %self.key, %reason, "Closing case");
        let _ = self.event_sender.send(CaseEvent::Closed {
            key: self.key,
            reason,
        });
    }

    /// Pull the vdev's state from live topology. A healthy vdev drops its
    /// pending evidence. Returns false when the vdev is no longer visible.
    fn refresh(&self) -> bool {
        let Some(vdev) = self.topology.vdev(self.key.pool_guid, self.key.vdev_guid) else {
            debug!(case = %self.key, "Vdev not visible, keeping last known state");
            return false;
        };
        let mut state = self.state.lock();
        state.vdev_state = vdev.state;
        if vdev.state.is_healthy() && !state.evidence.is_empty() {
            debug!(
                case = %self.key,
                evidence = state.evidence.len(),
                "Vdev recovered, dropping evidence"
            );
            state.evidence.clear();
        }
        if vdev.path.is_some() {
            state.dev_path = vdev.path;
        }
        if vdev.phys_path.is_some() {
            state.phys_path = vdev.phys_path;
        }
        true
    }

    fn set_state(&self, vdev_state: VdevState) {
        self.state.lock().vdev_state = vdev_state;
    }

    fn record_evidence(&self, event: &Event) {
        {
            let mut state = self.state.lock();
            if state.evidence.len() >= MAX_EVIDENCE {
                state.evidence.pop_front();
            }
            state.evidence.push_back(event.clone());
        }
        let _ = self.event_sender.send(CaseEvent::EvidenceRecorded {
            key: self.key,
            class: event.class_tag().to_string(),
        });
    }

    /// Ask for a hot spare to stand in for the impaired vdev
    fn request_spare(&self) -> bool {
        let vdev_state = self.vdev_state();
        info!(case = %self.key, state = %vdev_state, "Requesting spare activation");
        let _ = self.event_sender.send(CaseEvent::SpareRequested {
            key: self.key,
            state: vdev_state,
        });
        true
    }

    /// Close when the vdev is healthy and nothing is pending. Returns
    /// whether the case is now closed.
    fn close_if_solved(&self) -> bool {
        let solved = {
            let state = self.state.lock();
            if state.closed.is_some() {
                return true;
            }
            state.evidence.is_empty() && state.vdev_state.is_healthy()
        };
        if solved {
            self.close(CloseReason::Solved);
        }
        solved
    }

    fn remediation_failed(&self, operation: &str, reason: String) {
        let _ = self.event_sender.send(CaseEvent::RemediationFailed {
            key: self.key,
            operation: operation.to_string(),
            reason,
        });
    }

    fn online(&self, dev_path: &str) -> bool {
        match self.storage.online(self.key.pool_guid, self.key.vdev_guid, dev_path) {
            Ok(()) => {
                info!(case = %self.key, dev_path, "Onlined vdev({}) at {}", self.key, dev_path);
                {
                    let mut state = self.state.lock();
                    state.dev_path = Some(dev_path.to_string());
                    state.evidence.clear();
                }
                if !self.refresh() {
                    self.set_state(VdevState::Healthy);
                }
                let _ = self.event_sender.send(CaseEvent::DeviceOnlined {
                    key: self.key,
                    dev_path: dev_path.to_string(),
                });
                self.close_if_solved();
                true
            }
            Err(e) => {
                error!(case = %self.key, dev_path, error = %e, "Online failed");
                self.remediation_failed("online", e.to_string());
                false
            }
        }
    }

    fn replace(&self, dev_path: &str) -> bool {
        match self.storage.replace(self.key.pool_guid, self.key.vdev_guid, dev_path) {
            Ok(()) => {
                info!(case = %self.key, dev_path, "Replacing vdev({}) with {}", self.key, dev_path);
                {
                    let mut state = self.state.lock();
                    state.dev_path = Some(dev_path.to_string());
                    state.evidence.clear();
                }
                self.refresh();
                let _ = self.event_sender.send(CaseEvent::DeviceReplaced {
                    key: self.key,
                    dev_path: dev_path.to_string(),
                });
                self.close_if_solved();
                true
            }
            Err(e) => {
                error!(case = %self.key, dev_path, error = %e, "Replace failed");
                self.remediation_failed("replace", e.to_string());
                false
            }
        }
    }
}

impl CaseFile for VdevCase {
    fn pool_guid(&self) -> PoolGuid {
        self.key.pool_guid
    }

    fn vdev_guid(&self) -> VdevGuid {
        self.key.vdev_guid
    }

    fn vdev_state(&self) -> VdevState {
        self.state.lock().vdev_state
    }

    fn physical_path(&self) -> Option<String> {
        self.state.lock().phys_path.clone()
    }

    fn re_evaluate(&self, event: &Event) -> bool {
        if self.is_closed() {
            return false;
        }

        let type_tag = event.type_tag();
        let class_tag = event.class_tag();

        if type_tag == VDEV_REMOVE {
            self.close(CloseReason::VdevRemoved);
            return true;
        }
        if type_tag == POOL_DESTROY {
            self.close(CloseReason::PoolDestroyed);
            return true;
        }

        let mut consumed = false;
        if type_tag.starts_with(CONFIG_SYNC) {
            self.refresh();
            if !self.vdev_state().is_healthy() {
                consumed = self.request_spare();
            }
        }

        if class_tag == RESOURCE_REMOVED {
            info!(case = %self.key, "Vdev removed from the system");
            self.set_state(VdevState::Removed);
            self.request_spare();
            consumed = true;
        } else if class_tag == EREPORT_IO
            || class_tag == EREPORT_CHECKSUM
            || class_tag == EREPORT_PROBE_FAILURE
        {
            self.record_evidence(event);
            consumed = true;
        } else if class_tag == RESOURCE_STATECHANGE {
            self.refresh();
            consumed = true;
        }

        let closed = self.close_if_solved();
        consumed || closed
    }

    fn re_evaluate_device(&self, dev_path: &str, phys_path: &str, vdev: Option<&Vdev>) -> bool {
        if self.is_closed() {
            return false;
        }

        match vdev {
            Some(vdev)
                if vdev.pool_guid == self.key.pool_guid && vdev.guid == self.key.vdev_guid =>
            {
                self.online(dev_path)
            }
            Some(vdev) => {
                info!(
                    case = %self.key,
                    dev_path,
                    "Device labeled for vdev({}:{}), not a candidate",
                    vdev.pool_guid,
                    vdev.guid
                );
                false
            }
            None => {
                let (vdev_state, known_phys_path) = {
                    let state = self.state.lock();
                    (state.vdev_state, state.phys_path.clone())
                };
                if known_phys_path.as_deref() != Some(phys_path) {
                    return false;
                }
                // A vdev that can still be opened is not missing
                if vdev_state > VdevState::CantOpen {
                    debug!(
                        case = %self.key,
                        state = %vdev_state,
                        "Vdev not missing, ignoring replacement candidate"
                    );
                    return false;
                }
                self.replace(dev_path)
            }
        }
    }
}
