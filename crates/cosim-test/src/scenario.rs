//! Scenario harness
//!
//! Runs a complete co-simulation in-process: one `MemoryBroker`, the
//! scheduler and every node on their own tokio task. Each participant
//! records what it saw at every step and, unless given a custom step
//! function, publishes a fixed value on each of its outputs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;

use cosim_broker::{Broker, BrokerStats, MemoryBroker};
use cosim_core::{CosimError, CosimResult, NodeId};
use cosim_runtime::{
    NodeReport, NodeRuntime, Participant, Scheduler, SchedulerReport, StepContext, Topology,
};

/// Value published on every output by default
pub const DEFAULT_OUTPUT_VALUE: f64 = 4.2;

/// Upper bound on a whole run before it is treated as stalled
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error(transparent)]
    Cosim(#[from] CosimError),

    #[error("{0} did not finish within {1:?}")]
    Timeout(String, Duration),

    #[error("{0} task failed: {1}")]
    TaskFailed(String, String),
}

pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

/// Custom step function for one node
pub type StepFn = Box<dyn FnMut(&mut StepContext<'_>) + Send>;

/// What one node saw at one step
#[derive(Clone, Debug, PartialEq)]
pub struct StepRecord {
    pub node: NodeId,
    pub current_time: f64,
    pub step_duration: f64,
    pub inputs: BTreeMap<String, f64>,
}

struct ScenarioParticipant {
    node: NodeId,
    outputs: Vec<String>,
    value: f64,
    step_fn: Option<StepFn>,
    timeline: Arc<Mutex<Vec<StepRecord>>>,
}

impl Participant for ScenarioParticipant {
    fn step(&mut self, ctx: &mut StepContext<'_>) {
        self.timeline.lock().push(StepRecord {
            node: self.node.clone(),
            current_time: ctx.current_time(),
            step_duration: ctx.step_duration(),
            inputs: ctx.inputs().iter().map(|(k, v)| (k.clone(), *v)).collect(),
        });

        match self.step_fn.as_mut() {
            Some(step_fn) => step_fn(ctx),
            None => {
                for output in &self.outputs {
                    ctx.update_attribute(output, self.value);
                }
            }
        }
    }
}

/// Everything observed during one run
#[derive(Debug)]
pub struct ScenarioResult {
    /// Every step of every node, in execution order
    pub timeline: Vec<StepRecord>,
    pub nodes: BTreeMap<NodeId, NodeReport>,
    pub scheduler: SchedulerReport,
    pub broker: BrokerStats,
}

impl ScenarioResult {
    /// Steps executed by one node, in order
    pub fn trace(&self, node: &str) -> Vec<&StepRecord> {
        self.timeline.iter().filter(|r| r.node.as_str() == node).collect()
    }

    /// Times at which every step began, in execution order
    pub fn times(&self) -> Vec<f64> {
        self.timeline.iter().map(|r| r.current_time).collect()
    }

    pub fn total_steps(&self) -> usize {
        self.timeline.len()
    }
}

/// Runs one topology to completion
pub struct ScenarioHarness {
    topology: Topology,
    broker: Arc<MemoryBroker>,
    value: f64,
    step_fns: HashMap<NodeId, StepFn>,
    timeout: Duration,
}

impl ScenarioHarness {
    pub fn new(topology: Topology) -> Self {
        ScenarioHarness {
            topology,
            broker: Arc::new(MemoryBroker::new()),
            value: DEFAULT_OUTPUT_VALUE,
            step_fns: HashMap::new(),
            timeout: DEFAULT_RUN_TIMEOUT,
        }
    }

    /// Publish `value` on every output instead of the default
    pub fn with_value(mut self, value: f64) -> Self {
        self.value = value;
        self
    }

    /// Replace the default publishing behaviour of one node
    pub fn with_step_fn<F>(mut self, node: impl Into<NodeId>, step_fn: F) -> Self
    where
        F: FnMut(&mut StepContext<'_>) + Send + 'static,
    {
        self.step_fns.insert(node.into(), Box::new(step_fn));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn broker(&self) -> Arc<MemoryBroker> {
        Arc::clone(&self.broker)
    }

    pub async fn run(mut self) -> HarnessResult<ScenarioResult> {
        self.topology.apply(&*self.broker)?;
        let broker: Arc<dyn Broker> = self.broker.clone();

        let scheduler = Scheduler::new(self.topology.scheduler_config(), Arc::clone(&broker));
        let scheduler_task = tokio::spawn(scheduler.run());

        let timeline = Arc::new(Mutex::new(Vec::new()));
        let mut node_tasks = Vec::new();
        for config in self.topology.node_configs() {
            let participant = ScenarioParticipant {
                node: config.id.clone(),
                outputs: config.outputs.clone(),
                value: self.value,
                step_fn: self.step_fns.remove(&config.id),
                timeline: Arc::clone(&timeline),
            };
            let id = config.id.clone();
            let runtime = NodeRuntime::new(config, Arc::clone(&broker), participant);
            node_tasks.push((id, tokio::spawn(runtime.run())));
        }

        let scheduler = join("scheduler", scheduler_task, self.timeout).await?;
        let mut nodes = BTreeMap::new();
        for (id, task) in node_tasks {
            let report = join(id.as_str(), task, self.timeout).await?;
            nodes.insert(id, report);
        }

        let timeline = std::mem::take(&mut *timeline.lock());
        Ok(ScenarioResult {
            timeline,
            nodes,
            scheduler,
            broker: self.broker.stats(),
        })
    }
}

async fn join<T>(
    name: &str,
    task: JoinHandle<CosimResult<T>>,
    timeout: Duration,
) -> HarnessResult<T> {
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => Ok(result?),
        Ok(Err(e)) => Err(HarnessError::TaskFailed(name.to_string(), e.to_string())),
        Err(_) => Err(HarnessError::Timeout(name.to_string(), timeout)),
    }
}
