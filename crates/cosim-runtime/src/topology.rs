//! Topology builder
//!
//! Resolves the topology and schedule documents into per-node and
//! scheduler configuration, and declares the routing on a broker:
//! - scheduler exchange, block key -> every member's simulation queue
//! - node simulation exchange, scheduler key -> scheduler queue
//! - producer data exchange, attribute key -> every consumer's data queue
//!
//! Each node is also sent its link table before the run starts.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use cosim_broker::{Broker, DEFAULT_EXCHANGE};
use cosim_core::{
    AttributeLinks, CosimError, CosimResult, NodeId, Schedule, ScheduleConfig, StepSequence,
    TopologyConfig,
};
use cosim_wire::{Envelope, LinkTable};

use crate::naming::{attribute_key, block_key, scheduler_key, Routes};
use crate::node::NodeConfig;
use crate::scheduler::SchedulerConfig;

/// Validated description of one run
#[derive(Clone, Debug)]
pub struct Topology {
    config: TopologyConfig,
    schedule: Schedule,
    steps: StepSequence,
    scheduler: NodeId,
    link_tables: BTreeMap<NodeId, AttributeLinks>,
}

impl Topology {
    pub fn new(config: TopologyConfig, schedule: &ScheduleConfig) -> CosimResult<Self> {
        config.validate()?;
        let (schedule, steps) = schedule.resolve()?;

        let declared: BTreeSet<&NodeId> = config.nodes.keys().collect();
        let scheduled: BTreeSet<&NodeId> = schedule.nodes().collect();
        if declared != scheduled {
            let missing: Vec<String> = declared
                .symmetric_difference(&scheduled)
                .map(|n| n.to_string())
                .collect();
            return Err(CosimError::InvalidTopology(format!(
                "topology and schedule disagree on nodes: {}",
                missing.join(", ")
            )));
        }

        let link_tables = build_link_tables(&config)?;
        let topology = Topology {
            config,
            schedule,
            steps,
            scheduler: NodeId::scheduler(),
            link_tables,
        };
        topology.check_scheduler_id()?;
        Ok(topology)
    }

    /// Load both documents from JSON files
    pub fn load(topology: impl AsRef<Path>, schedule: impl AsRef<Path>) -> CosimResult<Self> {
        Self::new(
            TopologyConfig::load(topology)?,
            &ScheduleConfig::load(schedule)?,
        )
    }

    /// Use a scheduler id other than the default
    pub fn with_scheduler(mut self, id: impl Into<NodeId>) -> CosimResult<Self> {
        self.scheduler = id.into();
        self.check_scheduler_id()?;
        Ok(self)
    }

    fn check_scheduler_id(&self) -> CosimResult<()> {
        if self.config.nodes.contains_key(&self.scheduler) {
            return Err(CosimError::InvalidTopology(format!(
                "node {} collides with the scheduler id",
                self.scheduler
            )));
        }
        Ok(())
    }

    pub fn scheduler_id(&self) -> &NodeId {
        &self.scheduler
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn steps(&self) -> &StepSequence {
        &self.steps
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.config.nodes.keys()
    }

    /// Runtime configuration of one node
    pub fn node_config(&self, node: &NodeId) -> Option<NodeConfig> {
        let spec = self.config.nodes.get(node)?;
        let mut config = NodeConfig::new(node.clone())
            .with_inputs(spec.inputs.iter().cloned())
            .with_outputs(spec.outputs.iter().cloned())
            .first(spec.first);
        config.scheduler = self.scheduler.clone();
        Some(config)
    }

    pub fn node_configs(&self) -> Vec<NodeConfig> {
        self.nodes().filter_map(|n| self.node_config(n)).collect()
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::new(self.schedule.clone(), self.steps.clone())
            .with_id(self.scheduler.clone())
    }

    /// Produced name -> local input name, for links into `node`
    pub fn link_table(&self, node: &NodeId) -> AttributeLinks {
        self.link_tables.get(node).cloned().unwrap_or_default()
    }

    /// Declare queues and exchanges, bind them, and send every node its
    /// link table
    pub fn apply(&self, broker: &dyn Broker) -> CosimResult<()> {
        let scheduler = Routes::for_node(&self.scheduler);
        broker.declare_queue(&scheduler.simulation_queue)?;
        broker.declare_exchange(&scheduler.simulation_exchange)?;

        for node in self.nodes() {
            let routes = Routes::for_node(node);
            broker.declare_queue(&routes.simulation_queue)?;
            broker.declare_queue(&routes.data_queue)?;
            broker.declare_exchange(&routes.simulation_exchange)?;
            broker.declare_exchange(&routes.data_exchange)?;
            broker.bind(
                &routes.simulation_exchange,
                &scheduler_key(&self.scheduler),
                &scheduler.simulation_queue,
            )?;
        }

        for (position, block) in self.schedule.blocks().iter().enumerate() {
            for member in block.members() {
                broker.bind(
                    &scheduler.simulation_exchange,
                    &block_key(position),
                    &Routes::for_node(member).simulation_queue,
                )?;
            }
        }

        for link in self.config.links.values() {
            broker.bind(
                &Routes::for_node(&link.out.node).data_exchange,
                &attribute_key(&link.out.attr),
                &Routes::for_node(&link.input.node).data_queue,
            )?;
        }

        for node in self.nodes() {
            let table = LinkTable {
                links: self.link_table(node),
            };
            let envelope = Envelope::link_table(self.scheduler.clone(), table);
            broker.publish(
                DEFAULT_EXCHANGE,
                &Routes::for_node(node).simulation_queue,
                envelope.encode()?,
                None,
            )?;
        }

        tracing::info!(
            nodes = self.config.nodes.len(),
            links = self.config.links.len(),
            blocks = self.schedule.len(),
            "topology applied"
        );
        Ok(())
    }
}

fn build_link_tables(config: &TopologyConfig) -> CosimResult<BTreeMap<NodeId, AttributeLinks>> {
    let mut tables: BTreeMap<NodeId, AttributeLinks> = BTreeMap::new();

    for (name, link) in &config.links {
        let table = tables.entry(link.input.node.clone()).or_default();
        if let Some(existing) = table.get(&link.out.attr) {
            if existing != link.input.attr {
                return Err(CosimError::InvalidTopology(format!(
                    "link {}: {} already maps {} to {}",
                    name, link.input.node, link.out.attr, existing
                )));
            }
        }
        table.insert(link.out.attr.clone(), link.input.attr.clone());
    }

    Ok(tables)
}
