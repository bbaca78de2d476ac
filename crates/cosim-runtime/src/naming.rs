//! Queue, exchange and routing-key naming convention
//!
//! Every participant owns two queue/exchange pairs named after its id:
//! - simulation: step releases and link tables in, announce and acks out
//! - data: attribute updates from peers in, own attribute updates out
//!
//! The scheduler owns a simulation pair too. Its exchange routes releases
//! by block position, its queue receives announces and acknowledgements.

use cosim_core::NodeId;

pub const SIMULATION_PREFIX: &str = "cosim.simulation.node.";
pub const DATA_PREFIX: &str = "cosim.data.node.";
pub const ATTRIBUTE_ROUTING_PREFIX: &str = "cosim.data.attr.";
pub const BLOCK_ROUTING_PREFIX: &str = "cosim.update.block.";

pub fn simulation_queue(node: &NodeId) -> String {
    format!("{}{}", SIMULATION_PREFIX, node)
}

pub fn simulation_exchange(node: &NodeId) -> String {
    format!("{}{}", SIMULATION_PREFIX, node)
}

pub fn data_queue(node: &NodeId) -> String {
    format!("{}{}", DATA_PREFIX, node)
}

pub fn data_exchange(node: &NodeId) -> String {
    format!("{}{}", DATA_PREFIX, node)
}

/// Routing key of one output attribute on its producer's data exchange
pub fn attribute_key(attribute: &str) -> String {
    format!("{}{}", ATTRIBUTE_ROUTING_PREFIX, attribute)
}

/// Routing key of a block on the scheduler's simulation exchange
pub fn block_key(position: usize) -> String {
    format!("{}{}", BLOCK_ROUTING_PREFIX, position)
}

/// Routing key nodes use on their own simulation exchange to reach the
/// scheduler
pub fn scheduler_key(scheduler: &NodeId) -> String {
    format!("{}{}", SIMULATION_PREFIX, scheduler)
}

/// All names owned by one participant
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Routes {
    pub simulation_queue: String,
    pub simulation_exchange: String,
    pub data_queue: String,
    pub data_exchange: String,
}

impl Routes {
    pub fn for_node(node: &NodeId) -> Self {
        Routes {
            simulation_queue: simulation_queue(node),
            simulation_exchange: simulation_exchange(node),
            data_queue: data_queue(node),
            data_exchange: data_exchange(node),
        }
    }
}
