//! Well-known event `type` and `class` values

/// Topology is authoritative; replay deferred events
pub const CONFIG_SYNC: &str = "misc.fs.zfs.config_sync";

/// Namespace of pool-scoped notifications
pub const POOL_EVENT_PREFIX: &str = "misc.fs.zfs.";

pub const POOL_DESTROY: &str = "misc.fs.zfs.pool_destroy";

pub const RESILVER_FINISH: &str = "misc.fs.zfs.resilver_finish";

pub const VDEV_REMOVE: &str = "misc.fs.zfs.vdev_remove";

/// Pool has no redundancy left
pub const NO_REPLICAS: &str = "fs.zfs.vdev.no_replicas";

pub const RESOURCE_REMOVED: &str = "resource.fs.zfs.removed";

pub const RESOURCE_STATECHANGE: &str = "resource.fs.zfs.statechange";

pub const EREPORT_IO: &str = "ereport.fs.zfs.io";

pub const EREPORT_CHECKSUM: &str = "ereport.fs.zfs.checksum";

pub const EREPORT_PROBE_FAILURE: &str = "ereport.fs.zfs.probe_failure";

/// Device node appeared
pub const DEVFS_CREATE: &str = "CREATE";
