//! Deferred Event Queue
//!
//! FIFO of events whose pool or vdev was not yet visible. Replay drains the
//! queue before routing so the router can enqueue again without holding the
//! lock.

use crate::domain::ports::DeferredQueue;
use crate::event::Event;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// In-process deferred queue
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<VecDeque<Event>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the queued events, oldest first
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().iter().cloned().collect()
    }
}

impl DeferredQueue for EventQueue {
    fn enqueue(&self, event: Event) {
        self.events.lock().push_back(event);
    }

    fn replay_all(&self, discard: bool, process: &mut dyn FnMut(&Event) -> bool) {
        let pending: Vec<Event> = self.events.lock().drain(..).collect();

        let mut retained = VecDeque::new();
        for event in pending {
            if process(&event) && !discard {
                retained.push_back(event);
            }
        }

        // Survivors keep their place ahead of anything queued during replay
        let mut events = self.events.lock();
        retained.extend(events.drain(..));
        *events = retained;
    }

    fn len(&self) -> usize {
        self.events.lock().len()
    }

    fn clear(&self) {
        self.events.lock().clear();
    }
}
