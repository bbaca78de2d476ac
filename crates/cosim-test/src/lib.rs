//! cosim Test Harness - end-to-end protocol validation
//!
//! This crate provides:
//! - Canned topologies and schedules
//! - A scenario harness that runs a whole co-simulation in-process
//! - Protocol property checks over complete runs

pub mod fixtures;
pub mod protocol;
pub mod scenario;

pub use fixtures::*;
pub use protocol::*;
pub use scenario::*;
