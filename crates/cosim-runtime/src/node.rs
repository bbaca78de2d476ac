//! Node runtime - per-participant step gating

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use cosim_broker::{Broker, Delivery, DEFAULT_EXCHANGE};
use cosim_core::{AttributeLinks, CosimError, CosimResult, NodeId};
use cosim_wire::{Envelope, ParticipantKind, Payload, StepRelease};
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::naming::{attribute_key, scheduler_key, Routes};

/// Node configuration
#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub id: NodeId,
    /// Local input names that must all be collected before stepping
    pub inputs: Vec<String>,
    /// Attribute names this node may publish
    pub outputs: Vec<String>,
    /// Schedule-first nodes step as soon as they are released
    pub is_first: bool,
    /// Only releases from this sender are honoured
    pub scheduler: NodeId,
    pub participant_kind: ParticipantKind,
}

impl NodeConfig {
    pub fn new(id: impl Into<NodeId>) -> Self {
        NodeConfig {
            id: id.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            is_first: false,
            scheduler: NodeId::scheduler(),
            participant_kind: ParticipantKind::default(),
        }
    }

    pub fn with_inputs<S: Into<String>>(mut self, inputs: impl IntoIterator<Item = S>) -> Self {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_outputs<S: Into<String>>(mut self, outputs: impl IntoIterator<Item = S>) -> Self {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn first(mut self, is_first: bool) -> Self {
        self.is_first = is_first;
        self
    }
}

/// User step function, invoked once per granted step
pub trait Participant: Send {
    fn step(&mut self, ctx: &mut StepContext<'_>);
}

impl<F> Participant for F
where
    F: FnMut(&mut StepContext<'_>) + Send,
{
    fn step(&mut self, ctx: &mut StepContext<'_>) {
        self(ctx)
    }
}

/// Publishes a node's declared output attributes
pub struct AttributeOutlet {
    node: NodeId,
    exchange: String,
    outputs: HashSet<String>,
    broker: Arc<dyn Broker>,
}

impl AttributeOutlet {
    fn new(node: NodeId, exchange: String, outputs: &[String], broker: Arc<dyn Broker>) -> Self {
        AttributeOutlet {
            node,
            exchange,
            outputs: outputs.iter().cloned().collect(),
            broker,
        }
    }

    pub fn declares(&self, name: &str) -> bool {
        self.outputs.contains(name)
    }

    /// Publish `name` if it is a declared output. Undeclared names are a
    /// no-op and return `Ok(false)`.
    pub fn publish(&self, simulation_time: f64, name: &str, value: f64) -> CosimResult<bool> {
        if !self.declares(name) {
            tracing::debug!(node = %self.node, attribute = name, "undeclared output, not published");
            return Ok(false);
        }

        let envelope = Envelope::attribute_update(self.node.clone(), simulation_time, name, value);
        self.broker
            .publish(&self.exchange, &attribute_key(name), envelope.encode()?, None)?;
        tracing::debug!(node = %self.node, attribute = name, value, time = simulation_time, "attribute published");
        Ok(true)
    }
}

/// What the step function sees while it runs
pub struct StepContext<'a> {
    release: StepRelease,
    inputs: &'a HashMap<String, f64>,
    outlet: &'a AttributeOutlet,
    published: u64,
    error: Option<CosimError>,
}

impl<'a> StepContext<'a> {
    fn new(release: StepRelease, inputs: &'a HashMap<String, f64>, outlet: &'a AttributeOutlet) -> Self {
        StepContext {
            release,
            inputs,
            outlet,
            published: 0,
            error: None,
        }
    }

    pub fn current_time(&self) -> f64 {
        self.release.current_time
    }

    pub fn step_duration(&self) -> f64 {
        self.release.step_duration
    }

    /// Inputs collected for this step, keyed by local name
    pub fn inputs(&self) -> &HashMap<String, f64> {
        self.inputs
    }

    pub fn input(&self, name: &str) -> Option<f64> {
        self.inputs.get(name).copied()
    }

    /// Publish an output attribute. Returns `false` when `name` is not a
    /// declared output or publishing failed; a failure is reported by the
    /// runtime once the step function returns.
    pub fn update_attribute(&mut self, name: &str, value: f64) -> bool {
        match self.outlet.publish(self.release.current_time, name, value) {
            Ok(true) => {
                self.published += 1;
                true
            }
            Ok(false) => false,
            Err(e) => {
                self.error.get_or_insert(e);
                false
            }
        }
    }
}

/// Observable gating phase of a node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodePhase {
    /// No permission to step
    Idle,
    /// Permission granted, inputs incomplete
    AwaitingInputs,
    /// Permission granted and inputs complete
    Steppable,
    /// Step function running
    Stepping,
}

/// Granted but not yet executed step
#[derive(Clone, Debug, PartialEq)]
pub struct PendingStep {
    pub release: StepRelease,
    pub reply_to: Option<String>,
}

/// Gating state machine, free of any I/O
#[derive(Clone, Debug)]
pub struct NodeState {
    expected_inputs: BTreeSet<String>,
    collected_inputs: HashMap<String, f64>,
    links: AttributeLinks,
    is_first: bool,
    permission: Option<PendingStep>,
    current: StepRelease,
    last_executed: Option<StepRelease>,
    stepping: bool,
    steps_executed: u64,
}

impl NodeState {
    pub fn new<S: Into<String>>(expected_inputs: impl IntoIterator<Item = S>, is_first: bool) -> Self {
        NodeState {
            expected_inputs: expected_inputs.into_iter().map(Into::into).collect(),
            collected_inputs: HashMap::new(),
            links: AttributeLinks::new(),
            is_first,
            permission: None,
            current: StepRelease::new(0.0, 0.0),
            last_executed: None,
            stepping: false,
            steps_executed: 0,
        }
    }

    /// Record permission to step. Returns `false` if the release repeats
    /// the step that was just executed and was ignored.
    pub fn grant(&mut self, release: StepRelease, reply_to: Option<String>) -> bool {
        if self.permission.is_none() && self.is_replay(&release) {
            return false;
        }
        self.current = release;
        self.permission = Some(PendingStep { release, reply_to });
        true
    }

    // A zero-length step legitimately repeats its time and duration, so
    // only non-empty steps can be recognised as replays.
    fn is_replay(&self, release: &StepRelease) -> bool {
        match self.last_executed {
            Some(last) => last == *release && release.step_duration != 0.0,
            None => false,
        }
    }

    /// Store a received attribute under its local name
    pub fn collect(&mut self, produced_name: &str, value: f64) -> String {
        let local = self.links.resolve(produced_name).to_string();
        self.collected_inputs.insert(local.clone(), value);
        local
    }

    /// Replace the rename table wholesale
    pub fn install_links(&mut self, links: AttributeLinks) {
        self.links = links;
    }

    pub fn links(&self) -> &AttributeLinks {
        &self.links
    }

    pub fn inputs_complete(&self) -> bool {
        self.is_first
            || self.expected_inputs.is_empty()
            || self
                .expected_inputs
                .iter()
                .all(|name| self.collected_inputs.contains_key(name))
    }

    /// The gating condition
    pub fn is_steppable(&self) -> bool {
        self.permission.is_some() && self.inputs_complete()
    }

    pub fn phase(&self) -> NodePhase {
        if self.stepping {
            NodePhase::Stepping
        } else if self.permission.is_none() {
            NodePhase::Idle
        } else if self.inputs_complete() {
            NodePhase::Steppable
        } else {
            NodePhase::AwaitingInputs
        }
    }

    /// Consume the permission if the gating condition holds
    pub fn begin_step(&mut self) -> Option<PendingStep> {
        if !self.is_steppable() {
            return None;
        }
        self.stepping = true;
        self.permission.take()
    }

    /// Clear the inputs of the executed step
    pub fn finish_step(&mut self, release: StepRelease) {
        self.collected_inputs.clear();
        self.last_executed = Some(release);
        self.stepping = false;
        self.steps_executed += 1;
    }

    pub fn collected_inputs(&self) -> &HashMap<String, f64> {
        &self.collected_inputs
    }

    pub fn expected_inputs(&self) -> &BTreeSet<String> {
        &self.expected_inputs
    }

    pub fn current_time(&self) -> f64 {
        self.current.current_time
    }

    pub fn steps_executed(&self) -> u64 {
        self.steps_executed
    }
}

#[derive(Clone, Debug, Default)]
pub struct NodeStats {
    pub releases: u64,
    pub duplicate_releases: u64,
    pub attributes_received: u64,
    pub attributes_published: u64,
    pub steps: u64,
    pub malformed: u64,
    pub anomalies: u64,
}

/// Outcome of handling one delivery
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NodeFlow {
    Continue,
    Finished { final_time: f64 },
}

/// Summary returned when a node stops
#[derive(Clone, Debug)]
pub struct NodeReport {
    pub node: NodeId,
    pub steps_executed: u64,
    pub final_time: Option<f64>,
    pub stats: NodeStats,
}

/// Runtime of one participant
pub struct NodeRuntime<P> {
    config: NodeConfig,
    routes: Routes,
    state: NodeState,
    participant: P,
    outlet: AttributeOutlet,
    broker: Arc<dyn Broker>,
    stats: NodeStats,
    final_time: Option<f64>,
}

impl<P: Participant> NodeRuntime<P> {
    pub fn new(config: NodeConfig, broker: Arc<dyn Broker>, participant: P) -> Self {
        let routes = Routes::for_node(&config.id);
        let outlet = AttributeOutlet::new(
            config.id.clone(),
            routes.data_exchange.clone(),
            &config.outputs,
            Arc::clone(&broker),
        );
        let state = NodeState::new(config.inputs.iter().cloned(), config.is_first);

        NodeRuntime {
            config,
            routes,
            state,
            participant,
            outlet,
            broker,
            stats: NodeStats::default(),
            final_time: None,
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.config.id
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn phase(&self) -> NodePhase {
        self.state.phase()
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    /// Publish an output attribute stamped with the current time.
    /// Undeclared names are a no-op returning `Ok(false)`.
    pub fn update_attribute(&mut self, name: &str, value: f64) -> CosimResult<bool> {
        let published = self.outlet.publish(self.state.current_time(), name, value)?;
        if published {
            self.stats.attributes_published += 1;
        }
        Ok(published)
    }

    /// Subscribe, announce to the scheduler, then handle deliveries until
    /// the run completes
    pub async fn run(mut self) -> CosimResult<NodeReport> {
        self.declare()?;
        let mut simulation = self.broker.consume(&self.routes.simulation_queue)?;
        let mut data = self.broker.consume(&self.routes.data_queue)?;
        self.announce()?;

        loop {
            let delivery = tokio::select! {
                biased;
                Some(d) = simulation.recv() => d,
                Some(d) = data.recv() => d,
                else => {
                    return Err(CosimError::ChannelClosed(self.routes.simulation_queue.clone()));
                }
            };

            if let NodeFlow::Finished { final_time } = self.handle_delivery(delivery)? {
                tracing::info!(node = %self.config.id, time = final_time, steps = self.state.steps_executed(), "run complete");
                break;
            }
        }

        Ok(self.report())
    }

    pub fn report(&self) -> NodeReport {
        NodeReport {
            node: self.config.id.clone(),
            steps_executed: self.state.steps_executed(),
            final_time: self.final_time,
            stats: self.stats.clone(),
        }
    }

    fn declare(&self) -> CosimResult<()> {
        self.broker.declare_queue(&self.routes.simulation_queue)?;
        self.broker.declare_queue(&self.routes.data_queue)?;
        self.broker.declare_exchange(&self.routes.simulation_exchange)?;
        self.broker.declare_exchange(&self.routes.data_exchange)?;
        Ok(())
    }

    /// Register with the scheduler; acks come back on our simulation queue
    pub fn announce(&self) -> CosimResult<()> {
        let envelope = Envelope::announce(self.config.id.clone(), self.config.participant_kind);
        self.broker.publish(
            &self.routes.simulation_exchange,
            &scheduler_key(&self.config.scheduler),
            envelope.encode()?,
            Some(&self.routes.simulation_queue),
        )?;
        tracing::debug!(node = %self.config.id, "announced");
        Ok(())
    }

    /// Apply one delivery and re-evaluate the gating condition
    pub fn handle_delivery(&mut self, delivery: Delivery) -> CosimResult<NodeFlow> {
        let envelope = match Envelope::decode(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(node = %self.config.id, error = %e, "dropping malformed envelope");
                self.stats.malformed += 1;
                return Ok(NodeFlow::Continue);
            }
        };
        let (sender, payload) = envelope.into_parts();

        match payload {
            Payload::StepRelease(release) => {
                if sender != self.config.scheduler {
                    tracing::warn!(node = %self.config.id, %sender, "step release from non-scheduler ignored");
                    self.stats.anomalies += 1;
                    return Ok(NodeFlow::Continue);
                }
                self.stats.releases += 1;
                if !self.state.grant(release, delivery.reply_to) {
                    tracing::warn!(node = %self.config.id, time = release.current_time, "duplicate step release ignored");
                    self.stats.duplicate_releases += 1;
                    return Ok(NodeFlow::Continue);
                }
                self.try_step()?;
            }
            Payload::AttributeUpdate(update) => {
                self.stats.attributes_received += 1;
                let local = self.state.collect(&update.attribute_name, update.attribute_value);
                tracing::trace!(node = %self.config.id, %sender, attribute = %local, "input collected");
                self.try_step()?;
            }
            Payload::LinkTable(table) => {
                tracing::debug!(node = %self.config.id, links = table.links.len(), "link table installed");
                self.state.install_links(table.links);
            }
            Payload::RunComplete(done) => {
                self.final_time = Some(done.final_time);
                return Ok(NodeFlow::Finished {
                    final_time: done.final_time,
                });
            }
            Payload::ConnectionAnnounce(_) | Payload::StepAck(_) => {
                tracing::warn!(node = %self.config.id, %sender, kind = payload.kind().name(), "unexpected message kind for a node");
                self.stats.anomalies += 1;
            }
        }

        Ok(NodeFlow::Continue)
    }

    /// Run the step function if the gating condition holds. Returns
    /// whether a step executed.
    pub fn try_step(&mut self) -> CosimResult<bool> {
        let Some(pending) = self.state.begin_step() else {
            return Ok(false);
        };

        tracing::debug!(
            node = %self.config.id,
            time = pending.release.current_time,
            duration = pending.release.step_duration,
            "step"
        );

        let mut ctx = StepContext::new(pending.release, self.state.collected_inputs(), &self.outlet);
        let participant = &mut self.participant;
        run_blocking(|| participant.step(&mut ctx));
        let published = ctx.published;
        let publish_error = ctx.error;

        self.state.finish_step(pending.release);
        self.stats.steps += 1;
        self.stats.attributes_published += published;

        if let Some(e) = publish_error {
            return Err(e);
        }

        self.acknowledge(pending)?;
        Ok(true)
    }

    fn acknowledge(&self, pending: PendingStep) -> CosimResult<()> {
        let ack = Envelope::step_ack(self.config.id.clone(), pending.release).encode()?;
        match pending.reply_to {
            Some(reply_to) => self.broker.publish(DEFAULT_EXCHANGE, &reply_to, ack, None),
            None => {
                tracing::warn!(node = %self.config.id, "release without reply address, acking via scheduler route");
                self.broker.publish(
                    &self.routes.simulation_exchange,
                    &scheduler_key(&self.config.scheduler),
                    ack,
                    None,
                )
            }
        }
    }
}

/// Step functions are synchronous and may be slow. On a multi-threaded
/// runtime the worker hands its other tasks off while `f` runs, so nodes of
/// one block step concurrently. The current-thread runtime cannot do that
/// and runs `f` inline.
fn run_blocking<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosim_broker::{DeliveryReceiver, MemoryBroker};
    use cosim_wire::LinkTable;

    const REPLY: &str = "reply.scheduler";

    fn release(time: f64, duration: f64) -> Delivery {
        from_scheduler(Envelope::step_release(NodeId::scheduler(), time, duration))
    }

    fn from_scheduler(envelope: Envelope) -> Delivery {
        Delivery {
            payload: envelope.encode().unwrap(),
            reply_to: Some(REPLY.to_string()),
            exchange: String::new(),
            routing_key: String::new(),
        }
    }

    fn attribute(sender: &str, name: &str, value: f64) -> Delivery {
        Delivery {
            payload: Envelope::attribute_update(NodeId::new(sender), 0.0, name, value)
                .encode()
                .unwrap(),
            reply_to: None,
            exchange: String::new(),
            routing_key: String::new(),
        }
    }

    type Recorded = Arc<std::sync::Mutex<Vec<(f64, f64, HashMap<String, f64>)>>>;

    fn recording() -> (Recorded, impl FnMut(&mut StepContext<'_>) + Send) {
        let log: Recorded = Arc::default();
        let sink = Arc::clone(&log);
        let participant = move |ctx: &mut StepContext<'_>| {
            sink.lock()
                .unwrap()
                .push((ctx.current_time(), ctx.step_duration(), ctx.inputs().clone()));
        };
        (log, participant)
    }

    fn acks(broker: &MemoryBroker) -> DeliveryReceiver {
        broker.declare_queue(REPLY).unwrap();
        broker.consume(REPLY).unwrap()
    }

    fn drain_acks(rx: &mut DeliveryReceiver) -> Vec<StepRelease> {
        let mut out = Vec::new();
        while let Ok(d) = rx.try_recv() {
            match Envelope::decode(&d.payload).unwrap().payload() {
                Payload::StepAck(r) => out.push(*r),
                other => panic!("expected ack, got {:?}", other),
            }
        }
        out
    }

    #[test]
    fn test_state_phases() {
        let mut state = NodeState::new(["a", "b"], false);
        assert_eq!(state.phase(), NodePhase::Idle);
        assert_eq!(
            state.expected_inputs().iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["a", "b"]
        );

        state.collect("a", 1.0);
        assert_eq!(state.phase(), NodePhase::Idle);

        assert!(state.grant(StepRelease::new(1.0, 1.0), None));
        assert_eq!(state.phase(), NodePhase::AwaitingInputs);

        state.collect("b", 2.0);
        assert_eq!(state.phase(), NodePhase::Steppable);

        let pending = state.begin_step().unwrap();
        assert_eq!(state.phase(), NodePhase::Stepping);
        state.finish_step(pending.release);
        assert_eq!(state.phase(), NodePhase::Idle);
        assert!(state.collected_inputs().is_empty());
    }

    #[test]
    fn test_first_node_ignores_inputs() {
        let mut state = NodeState::new(["set"], true);
        state.grant(StepRelease::new(1.0, 1.0), None);
        assert!(state.is_steppable());
    }

    #[test]
    fn test_stray_input_does_not_satisfy_gate() {
        let mut state = NodeState::new(["a", "b"], false);
        state.grant(StepRelease::new(1.0, 1.0), None);
        state.collect("a", 1.0);
        state.collect("zzz", 1.0);
        assert!(!state.is_steppable());
    }

    #[test]
    fn test_rename_stores_under_local_key() {
        let (log, participant) = recording();
        let broker = Arc::new(MemoryBroker::new());
        let mut acks = acks(&broker);
        let mut node = NodeRuntime::new(NodeConfig::new("N").with_inputs(["in"]), broker, participant);

        let links: AttributeLinks = [("out", "in")].into_iter().collect();
        node.handle_delivery(from_scheduler(Envelope::link_table(
            NodeId::scheduler(),
            LinkTable { links },
        )))
        .unwrap();
        assert_eq!(node.state().links().resolve("out"), "in");
        node.handle_delivery(attribute("P", "out", 7.5)).unwrap();

        assert_eq!(node.state().collected_inputs().get("in"), Some(&7.5));
        assert!(node.state().collected_inputs().get("out").is_none());

        node.handle_delivery(release(1.0, 1.0)).unwrap();
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].2.get("in"), Some(&7.5));
        assert_eq!(drain_acks(&mut acks), vec![StepRelease::new(1.0, 1.0)]);
    }

    #[test]
    fn test_step_reads_inputs_by_local_name() {
        let seen: Arc<std::sync::Mutex<Vec<Option<f64>>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let broker = Arc::new(MemoryBroker::new());
        let _acks = acks(&broker);
        let mut node = NodeRuntime::new(
            NodeConfig::new("N").with_inputs(["a"]),
            broker,
            move |ctx: &mut StepContext<'_>| {
                let mut seen = sink.lock().unwrap();
                seen.push(ctx.input("a"));
                seen.push(ctx.input("b"));
            },
        );

        node.handle_delivery(attribute("P", "a", 3.5)).unwrap();
        node.handle_delivery(release(1.0, 1.0)).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![Some(3.5), None]);
    }

    #[test]
    fn test_duplicate_release_steps_once() {
        let (log, participant) = recording();
        let broker = Arc::new(MemoryBroker::new());
        let mut acks = acks(&broker);
        let mut node = NodeRuntime::new(NodeConfig::new("N"), broker, participant);

        node.handle_delivery(release(2.0, 2.0)).unwrap();
        node.handle_delivery(release(2.0, 2.0)).unwrap();

        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(node.stats().duplicate_releases, 1);
        assert_eq!(drain_acks(&mut acks).len(), 1);

        // The next step is a new release and runs normally
        node.handle_delivery(release(5.0, 3.0)).unwrap();
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_repeated_release_while_waiting_steps_once() {
        let (log, participant) = recording();
        let broker = Arc::new(MemoryBroker::new());
        let _acks = acks(&broker);
        let mut node =
            NodeRuntime::new(NodeConfig::new("N").with_inputs(["a"]), broker, participant);

        node.handle_delivery(release(1.0, 1.0)).unwrap();
        node.handle_delivery(release(1.0, 1.0)).unwrap();
        node.handle_delivery(attribute("P", "a", 1.0)).unwrap();
        node.handle_delivery(attribute("P", "a", 1.0)).unwrap();

        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(node.phase(), NodePhase::Idle);
    }

    #[test]
    fn test_release_from_peer_is_ignored() {
        let (log, participant) = recording();
        let broker = Arc::new(MemoryBroker::new());
        let mut node = NodeRuntime::new(NodeConfig::new("N"), broker, participant);

        node.handle_delivery(from_scheduler(Envelope::step_release(NodeId::new("rogue"), 1.0, 1.0)))
            .unwrap();

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(node.stats().anomalies, 1);
    }

    #[test]
    fn test_malformed_envelope_is_dropped() {
        let (_, participant) = recording();
        let broker = Arc::new(MemoryBroker::new());
        let mut node = NodeRuntime::new(NodeConfig::new("N"), broker, participant);

        let mut bytes = Envelope::step_release(NodeId::scheduler(), 1.0, 1.0)
            .encode()
            .unwrap()
            .to_vec();
        bytes[1] = cosim_wire::MessageKind::AttributeUpdate.to_byte();
        let delivery = Delivery {
            payload: bytes.into(),
            reply_to: None,
            exchange: String::new(),
            routing_key: String::new(),
        };

        assert_eq!(node.handle_delivery(delivery).unwrap(), NodeFlow::Continue);
        assert_eq!(node.stats().malformed, 1);
        assert_eq!(node.phase(), NodePhase::Idle);
    }

    #[test]
    fn test_undeclared_output_publishes_nothing() {
        let broker = Arc::new(MemoryBroker::new());
        let config = NodeConfig::new("P").with_outputs(["out"]);
        let routes = Routes::for_node(&config.id);
        broker.declare_exchange(&routes.data_exchange).unwrap();
        let mut node = NodeRuntime::new(config, Arc::clone(&broker) as Arc<dyn Broker>, |_: &mut StepContext<'_>| {});

        assert!(!node.update_attribute("undeclared", 1.0).unwrap());
        assert_eq!(broker.stats().published, 0);

        assert!(node.update_attribute("out", 1.0).unwrap());
        assert_eq!(broker.stats().published, 1);
    }

    #[test]
    fn test_step_publishes_declared_outputs_before_ack() {
        let broker = Arc::new(MemoryBroker::new());
        let mut acks = acks(&broker);
        let config = NodeConfig::new("P").with_outputs(["out"]);
        let routes = Routes::for_node(&config.id);
        broker.declare_exchange(&routes.data_exchange).unwrap();
        broker.declare_queue("peer").unwrap();
        broker.bind(&routes.data_exchange, &attribute_key("out"), "peer").unwrap();
        let mut peer = broker.consume("peer").unwrap();

        let mut node = NodeRuntime::new(config, Arc::clone(&broker) as Arc<dyn Broker>, |ctx: &mut StepContext<'_>| {
            assert!(ctx.update_attribute("out", 4.2));
            assert!(!ctx.update_attribute("nope", 1.0));
        });
        node.handle_delivery(release(3.0, 1.0)).unwrap();

        let delivered = Envelope::decode(&peer.try_recv().unwrap().payload).unwrap();
        match delivered.payload() {
            Payload::AttributeUpdate(a) => {
                assert_eq!(a.attribute_name, "out");
                assert_eq!(a.attribute_value, 4.2);
                assert_eq!(a.simulation_time, 3.0);
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(drain_acks(&mut acks).len(), 1);
        assert_eq!(node.stats().attributes_published, 1);
    }

    #[test]
    fn test_run_complete_finishes() {
        let (_, participant) = recording();
        let broker = Arc::new(MemoryBroker::new());
        let mut node = NodeRuntime::new(NodeConfig::new("N"), broker, participant);

        let flow = node
            .handle_delivery(from_scheduler(Envelope::run_complete(NodeId::scheduler(), 10.0)))
            .unwrap();
        assert_eq!(flow, NodeFlow::Finished { final_time: 10.0 });
        assert_eq!(node.report().final_time, Some(10.0));
    }

    #[test]
    fn test_gating_order_independence() {
        // Release and both inputs in every order: exactly one step, after the last
        const ORDERS: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];

        for order in ORDERS {
            let (log, participant) = recording();
            let broker = Arc::new(MemoryBroker::new());
            let mut acks = acks(&broker);
            let mut node = NodeRuntime::new(
                NodeConfig::new("N").with_inputs(["a", "b"]),
                broker,
                participant,
            );

            for (i, event) in order.iter().enumerate() {
                let delivery = match event {
                    0 => release(1.0, 1.0),
                    1 => attribute("P", "a", 1.0),
                    _ => attribute("Q", "b", 2.0),
                };
                node.handle_delivery(delivery).unwrap();
                let stepped = log.lock().unwrap().len();
                assert_eq!(stepped, if i == 2 { 1 } else { 0 }, "order {:?}", order);
            }

            let log = log.lock().unwrap();
            assert_eq!(log[0].2.get("a"), Some(&1.0), "order {:?}", order);
            assert_eq!(log[0].2.get("b"), Some(&2.0), "order {:?}", order);
            assert_eq!(drain_acks(&mut acks).len(), 1, "order {:?}", order);
        }
    }
}
