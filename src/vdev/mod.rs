//! Vdev Module
//!
//! Device-tree nodes, health states and on-disk labels.

pub mod label;
pub mod state;
pub mod tree;

pub use label::*;
pub use state::*;
pub use tree::*;
