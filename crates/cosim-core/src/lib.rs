//! cosim Core - Fundamental types and primitives
//!
//! This crate defines the core types used throughout the co-simulation:
//! - Identifiers (NodeId)
//! - Schedule primitives (Block, Schedule, StepSequence, SimulationClock)
//! - Per-node attribute rename tables (AttributeLinks)
//! - Topology and schedule configuration records
//! - The error taxonomy shared by every crate

pub mod config;
pub mod error;
pub mod id;
pub mod link;
pub mod schedule;

pub use config::*;
pub use error::*;
pub use id::*;
pub use link::*;
pub use schedule::*;
