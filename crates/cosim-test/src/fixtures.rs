//! Canned topologies and schedules

use cosim_core::{CosimResult, ScheduleConfig, TopologyConfig};
use cosim_runtime::Topology;

/// A (first) and B feed C, C feeds A back
pub const THREE_PARTICIPANT_TOPOLOGY: &str = r#"{
    "nodes": {
        "A": { "inputs": ["set"], "outputs": ["ta"], "first": true },
        "B": { "outputs": ["tb"] },
        "C": { "inputs": ["ta", "tb"], "outputs": ["set"] }
    },
    "links": {
        "a_to_c": { "out": { "node": "A", "attr": "ta" }, "in": { "node": "C", "attr": "ta" } },
        "b_to_c": { "out": { "node": "B", "attr": "tb" }, "in": { "node": "C", "attr": "tb" } },
        "c_to_a": { "out": { "node": "C", "attr": "set" }, "in": { "node": "A", "attr": "set" } }
    }
}"#;

/// A and B in one block, C after them
pub const THREE_PARTICIPANT_SCHEDULE: &str =
    r#"{ "steps": [1.0, 1.0], "schedule": [["A", "B"], ["C"]] }"#;

/// Producer P publishes `out`, consumer N reads it as `in`
pub const RENAME_TOPOLOGY: &str = r#"{
    "nodes": {
        "P": { "outputs": ["out"] },
        "N": { "inputs": ["in"] }
    },
    "links": {
        "p_to_n": { "out": { "node": "P", "attr": "out" }, "in": { "node": "N", "attr": "in" } }
    }
}"#;

pub const RENAME_SCHEDULE: &str = r#"{ "steps": [1.0], "schedule": [["P"], ["N"]] }"#;

/// Two independent nodes with no links
pub const PAIR_TOPOLOGY: &str = r#"{
    "nodes": {
        "A": { "outputs": ["x"] },
        "B": {}
    }
}"#;

/// Three independent nodes with no links
pub const TRIO_TOPOLOGY: &str = r#"{
    "nodes": {
        "A": {},
        "B": {},
        "C": {}
    }
}"#;

pub fn topology(topology: &str, schedule: &str) -> CosimResult<Topology> {
    Topology::new(
        TopologyConfig::from_json_str(topology)?,
        &ScheduleConfig::from_json_str(schedule)?,
    )
}

pub fn three_participant() -> CosimResult<Topology> {
    topology(THREE_PARTICIPANT_TOPOLOGY, THREE_PARTICIPANT_SCHEDULE)
}

/// Independent single-node blocks over the given step sequence
pub fn pair_with_steps(steps: &[f64]) -> CosimResult<Topology> {
    let schedule = ScheduleConfig {
        steps: steps.to_vec(),
        schedule: vec![vec!["A".into()], vec!["B".into()]],
    };
    Topology::new(TopologyConfig::from_json_str(PAIR_TOPOLOGY)?, &schedule)
}
