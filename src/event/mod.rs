//! Event Module
//!
//! Kernel event records and the factory that builds them from devd text.

pub mod classes;
pub mod factory;
pub mod record;

pub use factory::*;
pub use record::*;
