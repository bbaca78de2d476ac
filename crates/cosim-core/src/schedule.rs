//! Schedule primitives
//!
//! A run is described by two ordered sequences:
//! - the Schedule: blocks of nodes, replayed once per time step
//! - the StepSequence: the duration of every step, consumed front to back
//!
//! INVARIANT: blocks partition the node set, every node appears exactly once.

use std::collections::HashSet;

use crate::{CosimError, CosimResult, NodeId};

/// Group of nodes released together within one step
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    members: Vec<NodeId>,
}

impl Block {
    pub fn new(members: Vec<NodeId>) -> Self {
        Block { members }
    }

    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.members.contains(node)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl<S: Into<NodeId>> FromIterator<S> for Block {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Block::new(iter.into_iter().map(Into::into).collect())
    }
}

/// Ordered sequence of blocks, validated to partition the node set
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schedule {
    blocks: Vec<Block>,
}

impl Schedule {
    /// Validate and build a schedule.
    ///
    /// Rejects an empty schedule, empty blocks and nodes that appear twice.
    pub fn new(blocks: Vec<Block>) -> CosimResult<Self> {
        if blocks.is_empty() {
            return Err(CosimError::InvalidSchedule("schedule has no blocks".into()));
        }

        let mut seen = HashSet::new();
        for (position, block) in blocks.iter().enumerate() {
            if block.is_empty() {
                return Err(CosimError::InvalidSchedule(format!(
                    "block {} is empty",
                    position
                )));
            }
            for node in block.members() {
                if !seen.insert(node.clone()) {
                    return Err(CosimError::InvalidSchedule(format!(
                        "node {} appears in more than one block",
                        node
                    )));
                }
            }
        }

        Ok(Schedule { blocks })
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, position: usize) -> Option<&Block> {
        self.blocks.get(position)
    }

    /// Number of blocks
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Total number of nodes across all blocks
    pub fn node_count(&self) -> usize {
        self.blocks.iter().map(Block::len).sum()
    }

    /// Position of the block containing `node`
    pub fn position_of(&self, node: &NodeId) -> Option<usize> {
        self.blocks.iter().position(|b| b.contains(node))
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.position_of(node).is_some()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.blocks.iter().flat_map(|b| b.members().iter())
    }
}

/// Finite sequence of step durations
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepSequence {
    durations: Vec<f64>,
}

impl StepSequence {
    /// Validate and build a step sequence.
    ///
    /// Durations must be finite and non-negative so the clock never runs
    /// backwards.
    pub fn new(durations: Vec<f64>) -> CosimResult<Self> {
        if let Some((index, d)) = durations
            .iter()
            .enumerate()
            .find(|(_, d)| !d.is_finite() || **d < 0.0)
        {
            return Err(CosimError::InvalidSchedule(format!(
                "step {} has invalid duration {}",
                index, d
            )));
        }
        Ok(StepSequence { durations })
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.durations.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.durations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.durations.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.durations
    }

    /// Simulation time reached at the end of the whole sequence
    pub fn total(&self) -> f64 {
        self.durations.iter().sum()
    }
}

/// Global simulation clock, owned by the scheduler
/// INVARIANT: monotonically non-decreasing
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SimulationClock {
    current: f64,
}

impl SimulationClock {
    pub fn new() -> Self {
        SimulationClock::default()
    }

    #[inline]
    pub fn now(&self) -> f64 {
        self.current
    }

    /// Advance by one step duration. Negative durations are clamped to zero.
    pub fn advance(&mut self, duration: f64) -> f64 {
        self.current += duration.max(0.0);
        self.current
    }
}
