//! Tick-driven simulator for meshcast networks.

use std::collections::BinaryHeap;

use meshcast::{BroadcastConfig, DefaultConfig, Face, FaceIo};

use crate::event::{Event, ScenarioAction, ScheduledEvent, SequenceNumber};
use crate::metrics::{FloodResult, ProtocolError, SimMetrics, SimulationResult};
use crate::node::{SimMessage, SimNode};
use crate::topology::{NodeId, Topology};

/// Faces per simulated node.
const FACE_COUNT: Face = DefaultConfig::FACE_COUNT as Face;

/// Tick-driven simulator.
///
/// Each tick:
/// 1. Refresh neighbor presence from the topology
/// 2. Fire events scheduled for this tick (originations, link changes)
/// 3. Process every node once, in ascending id order
/// 4. Move outbound datagrams whose link delay elapsed into the peer's
///    inbound slot, if it is free
pub struct Simulator {
    /// All nodes in the simulation, indexed by id.
    nodes: Vec<SimNode>,
    /// Face wiring.
    topology: Topology,
    /// Current tick.
    tick: u64,
    /// Priority queue of scheduled events.
    event_queue: BinaryHeap<ScheduledEvent>,
    /// Collected metrics.
    metrics: SimMetrics,
    /// Next sequence number for event ordering.
    next_seq: u64,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            topology: Topology::new(),
            tick: 0,
            event_queue: BinaryHeap::new(),
            metrics: SimMetrics::new(),
            next_seq: 0,
        }
    }

    /// Set the network topology.
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Add a node; ids are assigned in order starting at 0.
    pub fn add_node(&mut self, seed: u64) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(SimNode::new(id, seed));
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&SimNode> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SimNode> {
        self.nodes.get_mut(id)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        (0..self.nodes.len()).collect()
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn topology_mut(&mut self) -> &mut Topology {
        &mut self.topology
    }

    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    /// Schedule an event.
    pub fn schedule(&mut self, tick: u64, event: Event) {
        let seq = SequenceNumber::new(self.next_seq);
        self.next_seq += 1;
        self.event_queue.push(ScheduledEvent::new(tick, seq, event));
    }

    /// Schedule a scenario action.
    pub fn schedule_action(&mut self, tick: u64, action: ScenarioAction) {
        self.schedule(tick, Event::ScenarioAction(action));
    }

    /// Schedule an origination.
    pub fn originate_at(&mut self, tick: u64, node: NodeId, message: SimMessage) {
        self.schedule(tick, Event::Originate { node, message });
    }

    /// Run a single tick.
    pub fn step(&mut self) {
        let tick = self.tick;

        self.refresh_presence();

        while self.event_queue.peek().is_some_and(|e| e.tick <= tick) {
            let Some(scheduled) = self.event_queue.pop() else {
                break;
            };
            self.process_event(scheduled.event);
        }
        self.refresh_presence();

        for id in 0..self.nodes.len() {
            if let Err(error) = self.nodes[id].process(tick) {
                self.metrics.protocol_errors.push(ProtocolError {
                    tick,
                    node: id,
                    error,
                });
            }
            self.collect_result(id);
        }

        self.deliver();
        self.tick += 1;
    }

    /// Run for a number of ticks.
    pub fn run_for(&mut self, ticks: u64) -> SimulationResult {
        let end = self.tick + ticks;
        while self.tick < end {
            self.step();
        }
        self.result()
    }

    /// Run until nothing is left to do, or `max_ticks` have passed.
    pub fn run_until_quiescent(&mut self, max_ticks: u64) -> SimulationResult {
        let end = self.tick + max_ticks;
        while self.tick < end && !self.is_quiescent() {
            self.step();
        }
        self.result()
    }

    /// No scheduled events, no flood in flight, no datagram in any slot.
    pub fn is_quiescent(&self) -> bool {
        self.event_queue.is_empty()
            && self.nodes.iter().all(|node| {
                !node.processing()
                    && (0..FACE_COUNT).all(|face| {
                        !node.faces().has_inbound(face) && !node.faces().pending_send(face)
                    })
            })
    }

    fn result(&self) -> SimulationResult {
        SimulationResult {
            end_tick: self.tick,
            metrics: self.metrics.clone(),
            quiescent: self.is_quiescent(),
        }
    }

    /// A face reports expired unless it has an active link.
    fn refresh_presence(&self) {
        for node in &self.nodes {
            for face in 0..FACE_COUNT {
                let live = self.topology.is_live((node.id(), face));
                node.faces().set_expired(face, !live);
            }
        }
    }

    fn process_event(&mut self, event: Event) {
        match event {
            Event::Originate { node, message } => self.originate(node, message),
            Event::ScenarioAction(action) => self.execute_action(action),
        }
    }

    fn originate(&mut self, id: NodeId, message: SimMessage) {
        let tick = self.tick;
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        match node.originate(tick, message) {
            Ok(()) => self.metrics.originations += 1,
            Err(_) => self.metrics.send_rejected += 1,
        }
        // An isolated node resolves on the spot.
        self.collect_result(id);
    }

    fn collect_result(&mut self, id: NodeId) {
        if let Some(message) = self.nodes[id].receive() {
            self.metrics.add_result(FloodResult {
                tick: self.tick,
                node: id,
                message,
            });
        }
    }

    /// Execute a scenario action.
    fn execute_action(&mut self, action: ScenarioAction) {
        match action {
            ScenarioAction::DisableLink { endpoint } => {
                self.topology.update_link(endpoint, |link| link.active = false);
            }
            ScenarioAction::EnableLink { endpoint } => {
                self.topology.update_link(endpoint, |link| link.active = true);
            }
            ScenarioAction::SetDelay { endpoint, delay } => {
                self.topology.update_link(endpoint, |link| link.delay = delay);
            }
        }
    }

    /// Move ready outbound datagrams across their links.
    fn deliver(&mut self) {
        let tick = self.tick;

        for id in 0..self.nodes.len() {
            for face in 0..FACE_COUNT {
                let Some(outbound) = self.nodes[id].faces().peek_outbound(face) else {
                    continue;
                };

                let port = match self.topology.port((id, face)) {
                    Some(port) if port.link.active => *port,
                    _ => {
                        // Nobody listening on this face.
                        self.nodes[id].faces().take_outbound(face);
                        self.metrics.frames_dropped += 1;
                        continue;
                    }
                };

                if tick < outbound.queued_at + port.link.delay {
                    continue;
                }

                let (peer, peer_face) = port.peer;
                let Some(peer_node) = self.nodes.get(peer) else {
                    self.nodes[id].faces().take_outbound(face);
                    self.metrics.frames_dropped += 1;
                    continue;
                };
                if peer_node.faces().inject_rx(peer_face, outbound.datagram) {
                    self.nodes[id].faces().take_outbound(face);
                    self.metrics.frames_delivered += 1;
                }
            }
        }
    }
}
