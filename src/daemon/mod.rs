//! Daemon runtime: event sources, the main loop and the control flags the
//! router raises.

pub mod control;
pub mod service;
pub mod source;

pub use control::RescanFlag;
pub use service::{Daemon, ExitReason};
pub use source::{DevdSocketSource, EventSource, ReaderSource};
