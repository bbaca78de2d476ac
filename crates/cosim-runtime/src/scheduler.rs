//! Scheduler - block/step barrier and global clock
//!
//! `SchedulerState` is the pure state machine: it consumes announces and
//! acknowledgements and returns the transition to perform. `Scheduler`
//! owns a state and a broker handle and turns transitions into messages.

use std::collections::HashSet;
use std::sync::Arc;

use cosim_broker::{Broker, Delivery};
use cosim_core::{CosimError, CosimResult, NodeId, Schedule, SimulationClock, StepSequence};
use cosim_wire::{Envelope, MessageKind, Payload, StepRelease};

use crate::naming::{block_key, Routes};

/// Scheduler configuration
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Sender id stamped on releases; nodes only honour releases from it
    pub id: NodeId,
    pub schedule: Schedule,
    pub steps: StepSequence,
}

impl SchedulerConfig {
    pub fn new(schedule: Schedule, steps: StepSequence) -> Self {
        SchedulerConfig {
            id: NodeId::scheduler(),
            schedule,
            steps,
        }
    }

    pub fn with_id(mut self, id: impl Into<NodeId>) -> Self {
        self.id = id.into();
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerPhase {
    AwaitingConnections,
    Running,
    Finished,
}

/// One release of one block
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlockRelease {
    /// Position of the block in the schedule
    pub block: usize,
    /// Index into the step sequence
    pub step: usize,
    pub release: StepRelease,
}

/// Message that was tolerated but did not advance the run
#[derive(Clone, Debug, PartialEq)]
pub enum Anomaly {
    /// Announce or ack from a node that is not in the schedule
    UnknownNode(NodeId),
    /// Ack from a node outside the currently released block
    OutsideBlock { node: NodeId, block: usize },
    /// Ack whose release does not match the one in flight
    StaleAck { node: NodeId, release: StepRelease },
    /// Ack received before every node announced
    AckBeforeRun(NodeId),
    /// Any message after the run finished
    AfterFinish(NodeId),
    /// A message kind only nodes consume
    UnexpectedKind { node: NodeId, kind: MessageKind },
}

/// What the scheduler must do after an event
#[derive(Clone, Debug, PartialEq)]
pub enum Transition {
    /// Nothing to send
    Idle,
    /// Release one block
    Release(BlockRelease),
    /// The run is over
    Finished { final_time: f64 },
    Anomaly(Anomaly),
}

/// Global progress of a run
/// INVARIANT: once `Finished`, no further release is produced
#[derive(Clone, Debug)]
pub struct SchedulerState {
    schedule: Schedule,
    steps: StepSequence,
    connected: HashSet<NodeId>,
    block_index: usize,
    step_index: usize,
    acknowledged: HashSet<NodeId>,
    clock: SimulationClock,
    phase: SchedulerPhase,
    completed_blocks: u64,
    releases: Vec<BlockRelease>,
}

impl SchedulerState {
    pub fn new(schedule: Schedule, steps: StepSequence) -> Self {
        SchedulerState {
            schedule,
            steps,
            connected: HashSet::new(),
            block_index: 0,
            step_index: 0,
            acknowledged: HashSet::new(),
            clock: SimulationClock::new(),
            phase: SchedulerPhase::AwaitingConnections,
            completed_blocks: 0,
            releases: Vec::new(),
        }
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.phase
    }

    pub fn is_done(&self) -> bool {
        self.phase == SchedulerPhase::Finished
    }

    pub fn current_time(&self) -> f64 {
        self.clock.now()
    }

    pub fn block_index(&self) -> usize {
        self.block_index
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    pub fn completed_blocks(&self) -> u64 {
        self.completed_blocks
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Every release produced so far, in order
    pub fn releases(&self) -> &[BlockRelease] {
        &self.releases
    }

    /// Handle a connection announce from `node`
    pub fn on_connect(&mut self, node: &NodeId) -> Transition {
        if self.phase == SchedulerPhase::Finished {
            return Transition::Anomaly(Anomaly::AfterFinish(node.clone()));
        }
        if !self.schedule.contains(node) {
            return Transition::Anomaly(Anomaly::UnknownNode(node.clone()));
        }

        self.connected.insert(node.clone());
        if self.phase == SchedulerPhase::AwaitingConnections
            && self.connected.len() == self.schedule.node_count()
        {
            return self.start();
        }
        Transition::Idle
    }

    fn start(&mut self) -> Transition {
        match self.steps.get(0) {
            Some(duration) => {
                self.clock.advance(duration);
                self.phase = SchedulerPhase::Running;
                Transition::Release(self.release_current())
            }
            None => self.finish(),
        }
    }

    /// Handle a step acknowledgement from `node`
    pub fn on_ack(&mut self, node: &NodeId, release: StepRelease) -> Transition {
        match self.phase {
            SchedulerPhase::AwaitingConnections => {
                return Transition::Anomaly(Anomaly::AckBeforeRun(node.clone()));
            }
            SchedulerPhase::Finished => {
                return Transition::Anomaly(Anomaly::AfterFinish(node.clone()));
            }
            SchedulerPhase::Running => {}
        }

        let Some(block) = self.schedule.block(self.block_index) else {
            return Transition::Idle;
        };
        if !block.contains(node) {
            let anomaly = if self.schedule.contains(node) {
                Anomaly::OutsideBlock {
                    node: node.clone(),
                    block: self.block_index,
                }
            } else {
                Anomaly::UnknownNode(node.clone())
            };
            return Transition::Anomaly(anomaly);
        }
        if release != self.in_flight() {
            return Transition::Anomaly(Anomaly::StaleAck {
                node: node.clone(),
                release,
            });
        }

        self.acknowledged.insert(node.clone());
        if self.acknowledged.len() < block.len() {
            return Transition::Idle;
        }

        self.completed_blocks += 1;
        self.acknowledged.clear();
        self.block_index = (self.block_index + 1) % self.schedule.len();

        if self.block_index == 0 {
            self.step_index += 1;
            match self.steps.get(self.step_index) {
                Some(duration) => {
                    self.clock.advance(duration);
                }
                None => return self.finish(),
            }
        }

        Transition::Release(self.release_current())
    }

    fn in_flight(&self) -> StepRelease {
        StepRelease::new(
            self.clock.now(),
            self.steps.get(self.step_index).unwrap_or_default(),
        )
    }

    fn release_current(&mut self) -> BlockRelease {
        let release = BlockRelease {
            block: self.block_index,
            step: self.step_index,
            release: self.in_flight(),
        };
        self.releases.push(release);
        release
    }

    fn finish(&mut self) -> Transition {
        self.phase = SchedulerPhase::Finished;
        Transition::Finished {
            final_time: self.clock.now(),
        }
    }
}

/// Outcome of handling one delivery
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SchedulerFlow {
    Continue,
    Finished { final_time: f64 },
}

/// Summary returned when the scheduler stops
#[derive(Clone, Debug)]
pub struct SchedulerReport {
    pub final_time: f64,
    pub completed_blocks: u64,
    pub releases: Vec<BlockRelease>,
    pub anomalies: Vec<Anomaly>,
    pub malformed: u64,
}

/// Scheduler process: drives a `SchedulerState` from its queue
pub struct Scheduler {
    id: NodeId,
    routes: Routes,
    state: SchedulerState,
    broker: Arc<dyn Broker>,
    anomalies: Vec<Anomaly>,
    malformed: u64,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, broker: Arc<dyn Broker>) -> Self {
        Scheduler {
            routes: Routes::for_node(&config.id),
            state: SchedulerState::new(config.schedule, config.steps),
            id: config.id,
            broker,
            anomalies: Vec::new(),
            malformed: 0,
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    /// Consume announces and acks until the run completes
    pub async fn run(mut self) -> CosimResult<SchedulerReport> {
        self.broker.declare_queue(&self.routes.simulation_queue)?;
        self.broker.declare_exchange(&self.routes.simulation_exchange)?;
        let mut inbox = self.broker.consume(&self.routes.simulation_queue)?;

        tracing::info!(
            scheduler = %self.id,
            nodes = self.state.schedule().node_count(),
            blocks = self.state.schedule().len(),
            "waiting for connections"
        );

        loop {
            let Some(delivery) = inbox.recv().await else {
                return Err(CosimError::ChannelClosed(self.routes.simulation_queue.clone()));
            };
            if let SchedulerFlow::Finished { final_time } = self.handle_delivery(delivery)? {
                tracing::info!(
                    scheduler = %self.id,
                    time = final_time,
                    blocks = self.state.completed_blocks(),
                    "run complete"
                );
                break;
            }
        }

        Ok(self.report())
    }

    pub fn report(&self) -> SchedulerReport {
        SchedulerReport {
            final_time: self.state.current_time(),
            completed_blocks: self.state.completed_blocks(),
            releases: self.state.releases().to_vec(),
            anomalies: self.anomalies.clone(),
            malformed: self.malformed,
        }
    }

    /// Apply one delivery and publish whatever it triggers
    pub fn handle_delivery(&mut self, delivery: Delivery) -> CosimResult<SchedulerFlow> {
        let envelope = match Envelope::decode(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(scheduler = %self.id, error = %e, "dropping malformed envelope");
                self.malformed += 1;
                return Ok(SchedulerFlow::Continue);
            }
        };

        let transition = match envelope.payload() {
            Payload::ConnectionAnnounce(announce) => {
                tracing::debug!(
                    scheduler = %self.id,
                    node = %envelope.sender(),
                    kind = ?announce.participant_kind,
                    "node connected"
                );
                self.state.on_connect(envelope.sender())
            }
            Payload::StepAck(release) => self.state.on_ack(envelope.sender(), *release),
            other => Transition::Anomaly(Anomaly::UnexpectedKind {
                node: envelope.sender().clone(),
                kind: other.kind(),
            }),
        };

        self.apply(transition)
    }

    fn apply(&mut self, transition: Transition) -> CosimResult<SchedulerFlow> {
        match transition {
            Transition::Idle => {}
            Transition::Release(release) => self.publish_release(&release)?,
            Transition::Finished { final_time } => {
                self.broadcast_complete(final_time)?;
                return Ok(SchedulerFlow::Finished { final_time });
            }
            Transition::Anomaly(anomaly) => {
                tracing::warn!(scheduler = %self.id, ?anomaly, "protocol anomaly ignored");
                self.anomalies.push(anomaly);
            }
        }
        Ok(SchedulerFlow::Continue)
    }

    fn publish_release(&self, release: &BlockRelease) -> CosimResult<()> {
        tracing::info!(
            scheduler = %self.id,
            block = release.block,
            step = release.step,
            time = release.release.current_time,
            duration = release.release.step_duration,
            "releasing block"
        );
        let envelope = Envelope::step_release(
            self.id.clone(),
            release.release.current_time,
            release.release.step_duration,
        );
        self.broker.publish(
            &self.routes.simulation_exchange,
            &block_key(release.block),
            envelope.encode()?,
            Some(&self.routes.simulation_queue),
        )
    }

    fn broadcast_complete(&self, final_time: f64) -> CosimResult<()> {
        let payload = Envelope::run_complete(self.id.clone(), final_time).encode()?;
        for position in 0..self.state.schedule().len() {
            self.broker.publish(
                &self.routes.simulation_exchange,
                &block_key(position),
                payload.clone(),
                None,
            )?;
        }
        Ok(())
    }
}
