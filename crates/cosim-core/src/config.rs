//! Topology and schedule configuration
//!
//! Two JSON documents describe a run. The topology:
//!
//! ```json
//! {
//!   "nodes": {
//!     "A": { "inputs": ["set"], "outputs": ["ta"], "first": true },
//!     "C": { "inputs": ["ta"], "outputs": ["set"] }
//!   },
//!   "links": {
//!     "a_to_c": { "out": { "node": "A", "attr": "ta" },
//!                 "in":  { "node": "C", "attr": "ta" } }
//!   }
//! }
//! ```
//!
//! and the schedule:
//!
//! ```json
//! { "steps": [1.0, 1.0], "schedule": [["A"], ["C"]] }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Block, CosimError, CosimResult, NodeId, Schedule, StepSequence};

/// Declared interface of one participant
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Schedule-first nodes step without waiting for their inputs
    #[serde(default)]
    pub first: bool,
}

/// One side of a link
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEndpoint {
    pub node: NodeId,
    pub attr: String,
}

/// Point-to-point attribute link from a producer output to a consumer input
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSpec {
    pub out: LinkEndpoint,
    #[serde(rename = "in")]
    pub input: LinkEndpoint,
}

/// Participants and the links between them
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyConfig {
    pub nodes: BTreeMap<NodeId, NodeSpec>,
    #[serde(default)]
    pub links: BTreeMap<String, LinkSpec>,
}

impl TopologyConfig {
    pub fn from_json_str(json: &str) -> CosimResult<Self> {
        serde_json::from_str(json).map_err(|e| CosimError::ConfigParse(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> CosimResult<Self> {
        Self::from_json_str(&read_config(path.as_ref())?)
    }

    /// Check that every link names declared nodes and attributes
    pub fn validate(&self) -> CosimResult<()> {
        for (name, link) in &self.links {
            let producer = self.nodes.get(&link.out.node).ok_or_else(|| {
                CosimError::InvalidTopology(format!(
                    "link {} references unknown producer {}",
                    name, link.out.node
                ))
            })?;
            let consumer = self.nodes.get(&link.input.node).ok_or_else(|| {
                CosimError::InvalidTopology(format!(
                    "link {} references unknown consumer {}",
                    name, link.input.node
                ))
            })?;

            if !producer.outputs.contains(&link.out.attr) {
                return Err(CosimError::InvalidTopology(format!(
                    "link {}: {} does not declare output {}",
                    name, link.out.node, link.out.attr
                )));
            }
            if !consumer.inputs.contains(&link.input.attr) {
                return Err(CosimError::InvalidTopology(format!(
                    "link {}: {} does not declare input {}",
                    name, link.input.node, link.input.attr
                )));
            }
        }
        Ok(())
    }

    /// Links whose consumer is `node`
    pub fn links_into<'a>(&'a self, node: &'a NodeId) -> impl Iterator<Item = &'a LinkSpec> {
        self.links.values().filter(move |l| &l.input.node == node)
    }
}

/// Step durations and block layout
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub steps: Vec<f64>,
    pub schedule: Vec<Vec<NodeId>>,
}

impl ScheduleConfig {
    pub fn from_json_str(json: &str) -> CosimResult<Self> {
        serde_json::from_str(json).map_err(|e| CosimError::ConfigParse(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> CosimResult<Self> {
        Self::from_json_str(&read_config(path.as_ref())?)
    }

    /// Validate into the resolved in-memory schedule
    pub fn resolve(&self) -> CosimResult<(Schedule, StepSequence)> {
        let blocks = self
            .schedule
            .iter()
            .map(|members| Block::new(members.clone()))
            .collect();
        Ok((Schedule::new(blocks)?, StepSequence::new(self.steps.clone())?))
    }
}

fn read_config(path: &Path) -> CosimResult<String> {
    fs::read_to_string(path).map_err(|e| CosimError::ConfigIo(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPOLOGY: &str = r#"{
        "nodes": {
            "A": { "inputs": ["set"], "outputs": ["ta"], "first": true },
            "B": { "outputs": ["tb"] },
            "C": { "inputs": ["ta", "tb"], "outputs": ["set"] }
        },
        "links": {
            "a_c": { "out": { "node": "A", "attr": "ta" }, "in": { "node": "C", "attr": "ta" } },
            "b_c": { "out": { "node": "B", "attr": "tb" }, "in": { "node": "C", "attr": "tb" } },
            "c_a": { "out": { "node": "C", "attr": "set" }, "in": { "node": "A", "attr": "set" } }
        }
    }"#;

    #[test]
    fn test_topology_parse() {
        let topology = TopologyConfig::from_json_str(TOPOLOGY).unwrap();

        assert_eq!(topology.nodes.len(), 3);
        assert!(topology.nodes[&NodeId::new("A")].first);
        assert!(topology.nodes[&NodeId::new("B")].inputs.is_empty());
        assert_eq!(topology.links.len(), 3);
        assert!(topology.validate().is_ok());
        assert_eq!(topology.links_into(&NodeId::new("C")).count(), 2);
    }

    #[test]
    fn test_topology_rejects_undeclared_output() {
        let mut topology = TopologyConfig::from_json_str(TOPOLOGY).unwrap();
        topology.links.get_mut("a_c").unwrap().out.attr = "nope".into();

        assert!(matches!(
            topology.validate(),
            Err(CosimError::InvalidTopology(_))
        ));
    }

    #[test]
    fn test_topology_rejects_unknown_consumer() {
        let mut topology = TopologyConfig::from_json_str(TOPOLOGY).unwrap();
        topology.links.get_mut("b_c").unwrap().input.node = NodeId::new("Z");

        assert!(topology.validate().is_err());
    }

    #[test]
    fn test_schedule_resolve() {
        let config =
            ScheduleConfig::from_json_str(r#"{ "steps": [2, 3, 5], "schedule": [["A", "B"], ["C"]] }"#)
                .unwrap();
        let (schedule, steps) = config.resolve().unwrap();

        assert_eq!(schedule.len(), 2);
        assert_eq!(schedule.node_count(), 3);
        assert_eq!(steps.as_slice(), &[2.0, 3.0, 5.0]);
    }

    #[test]
    fn test_parse_error_is_distinguishable() {
        let result = ScheduleConfig::from_json_str("{ not json");
        assert!(matches!(result, Err(CosimError::ConfigParse(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = TopologyConfig::load("/definitely/not/here.json");
        assert!(matches!(result, Err(CosimError::ConfigIo(_))));
    }
}
