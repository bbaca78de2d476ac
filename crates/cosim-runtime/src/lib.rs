//! cosim Runtime - lockstep coordination of co-simulation participants
//!
//! This crate implements the two sides of the step protocol:
//! 1. Node runtime: gates the participant's step function on permission
//!    from the scheduler and on a complete set of inputs
//! 2. Scheduler: waits for every node to announce itself, then releases
//!    blocks one at a time and advances the simulation clock once per
//!    full pass over the schedule
//!
//! plus the queue/exchange naming convention and the topology builder
//! that wires both sides together on a broker.

pub mod naming;
pub mod node;
pub mod scheduler;
pub mod topology;

pub use naming::*;
pub use node::*;
pub use scheduler::*;
pub use topology::*;
