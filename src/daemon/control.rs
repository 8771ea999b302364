//! Daemon control flags raised by the router

use crate::domain::ports::DaemonControl;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Pending system rescan request.
///
/// The router only sets the flag; the daemon loop performs the rescan once
/// the event being routed has completed.
#[derive(Debug, Default)]
pub struct RescanFlag {
    pending: AtomicBool,
    requests: AtomicU64,
}

impl RescanFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Clear the flag, returning whether a rescan was pending
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    /// Requests received since startup, coalesced or not
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

impl DaemonControl for RescanFlag {
    fn request_system_rescan(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.pending.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_coalesce() {
        let flag = RescanFlag::new();
        assert!(!flag.take());

        flag.request_system_rescan();
        flag.request_system_rescan();
        assert!(flag.is_pending());
        assert_eq!(flag.request_count(), 2);

        assert!(flag.take());
        assert!(!flag.take());
    }
}
