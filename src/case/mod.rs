//! Case Management
//!
//! Open cases for impaired vdevs, and the registry that locates them.

pub mod case_file;
pub mod events;
pub mod registry;

pub use case_file::VdevCase;
pub use events::{CaseEvent, CloseReason};
pub use registry::{InMemoryCaseRegistry, RegistryStatsSnapshot};
