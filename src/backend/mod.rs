//! Storage backends implementing the topology and storage ports

pub mod snapshot;

pub use snapshot::{DeviceSpec, SnapshotBackend, SnapshotSpec, StorageCommand};
