//! cosim Broker Layer - publish/subscribe transport
//!
//! This crate provides:
//! - The `Broker` adapter contract the runtime is written against
//! - `MemoryBroker`, an in-process implementation with AMQP-style
//!   direct exchanges, named queues and reply addresses

pub mod broker;
pub mod memory;

pub use broker::*;
pub use memory::{BrokerStats, MemoryBroker};
