//! Domain layer - Identity types and port definitions
//!
//! This module defines the collaborator traits (ports) the router consumes,
//! following hexagonal architecture principles.

pub mod guid;
pub mod ports;

pub use guid::*;
pub use ports::*;
