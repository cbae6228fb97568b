//! Metrics collection for simulation analysis.

use meshcast::Error;

use crate::node::SimMessage;
use crate::topology::NodeId;

/// An aggregate surfaced at an originating node.
#[derive(Debug, Clone)]
pub struct FloodResult {
    /// Tick in which the node surfaced the result.
    pub tick: u64,
    pub node: NodeId,
    pub message: SimMessage,
}

impl FloodResult {
    /// Number of nodes the flood reached, as counted by the simulation handlers.
    pub fn count(&self) -> u8 {
        self.message.payload()[0]
    }
}

/// A protocol error returned by a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    pub tick: u64,
    pub node: NodeId,
    pub error: Error,
}

/// Simulation metrics collected over time.
#[derive(Debug, Clone, Default)]
pub struct SimMetrics {
    /// Datagrams moved into a peer's inbound slot.
    pub frames_delivered: u64,
    /// Datagrams sent on a face without an active link.
    pub frames_dropped: u64,
    /// Originations accepted by a node.
    pub originations: u64,
    /// Originations refused by a node (busy flood or busy face).
    pub send_rejected: u64,
    /// Errors returned by `process`.
    pub protocol_errors: Vec<ProtocolError>,
    /// Aggregates surfaced at originators, in order.
    pub results: Vec<FloodResult>,
}

impl SimMetrics {
    /// Create new empty metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a surfaced aggregate.
    pub fn add_result(&mut self, result: FloodResult) {
        self.results.push(result);
    }

    /// Results surfaced at a node.
    pub fn results_for(&self, node: NodeId) -> Vec<&FloodResult> {
        self.results.iter().filter(|r| r.node == node).collect()
    }

    /// Get the latest result.
    pub fn latest_result(&self) -> Option<&FloodResult> {
        self.results.last()
    }
}

/// Result of running a simulation.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    /// Tick the simulation stopped at.
    pub end_tick: u64,
    /// Collected metrics.
    pub metrics: SimMetrics,
    /// Whether the network had nothing left to do when the run ended.
    pub quiescent: bool,
}

impl SimulationResult {
    /// Count carried by the latest surfaced aggregate.
    pub fn final_count(&self) -> Option<u8> {
        self.metrics.latest_result().map(|r| r.count())
    }

    /// Whether the run finished without protocol errors.
    pub fn clean(&self) -> bool {
        self.metrics.protocol_errors.is_empty()
    }
}
