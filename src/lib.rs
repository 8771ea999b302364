//! vdevd - Vdev Fault Management Daemon
//!
//! Consumes kernel device and storage-pool notifications, correlates each one
//! to a per-vdev remediation case, and drives spare cleanup, device onlining
//! and replacement in response.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              Daemon                                   │
//! │   devd socket / replay file ──► EventFactory ──► EventRouter          │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                           Event Router                                │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐  │
//! │  │ Device arrival │  │  Pool / vdev   │  │   Deferred queue       │  │
//! │  │ (label, slot)  │  │  notifications │  │   (replay on sync)     │  │
//! │  └───────┬────────┘  └───────┬────────┘  └────────────────────────┘  │
//! │          └────────────┬──────┘                                        │
//! │                ┌──────┴───────┐   ┌──────────────────┐               │
//! │                │ Case registry │   │ Spare reclaimer  │               │
//! │                └──────┬───────┘   └────────┬─────────┘               │
//! ├───────────────────────┴────────────────────┴─────────────────────────┤
//! │               Topology reader / storage layer (ports)                 │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`router`]: Event classification, correlation and deferral
//! - [`case`]: Per-vdev cases and the registry holding them
//! - [`event`]: Event records and devd line parsing
//! - [`vdev`]: Vdev trees, states and labels
//! - [`backend`]: Topology snapshot backend
//! - [`daemon`]: Event sources and the main loop
//! - [`domain`]: Identity types and collaborator traits
//! - [`error`]: Error types and handling

pub mod backend;
pub mod case;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod error;
pub mod event;
pub mod metrics;
pub mod router;
pub mod vdev;

// Re-export commonly used types
pub use backend::{DeviceSpec, SnapshotBackend, StorageCommand};

pub use case::{CaseEvent, CloseReason, InMemoryCaseRegistry, VdevCase};

pub use config::{DaemonConfig, ReconnectConfig};

pub use daemon::{Daemon, DevdSocketSource, EventSource, ExitReason, ReaderSource, RescanFlag};

pub use domain::guid::{CaseKey, PoolGuid, VdevGuid};

pub use domain::ports::{
    CaseFile, CaseRef, CaseRegistry, DaemonControl, DeferredQueue, DeviceHandle, StorageLayer,
    TopologyReader,
};

pub use error::{Error, ErrorAction, Result};

pub use event::{Event, EventFactory, EventKind, EventType};

pub use metrics::RouterMetrics;

pub use router::{EventQueue, EventRouter, RouterContext};

pub use vdev::{Label, PoolTopology, Vdev, VdevState, VdevTree};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
