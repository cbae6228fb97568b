//! Event types and priority queue ordering for the simulation.

use std::cmp::Ordering;

use crate::node::SimMessage;
use crate::topology::{Endpoint, NodeId};

/// Unique sequence number for deterministic event ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Scenario actions that can be scheduled during simulation.
#[derive(Debug, Clone)]
pub enum ScenarioAction {
    /// Disable the link on a face (both directions).
    DisableLink { endpoint: Endpoint },
    /// Re-enable the link on a face.
    EnableLink { endpoint: Endpoint },
    /// Change the delay of the link on a face.
    SetDelay { endpoint: Endpoint, delay: u64 },
}

/// Events in the simulation.
#[derive(Debug, Clone)]
pub enum Event {
    /// Local code on a node originates a flood.
    Originate { node: NodeId, message: SimMessage },
    /// Execute a scenario action.
    ScenarioAction(ScenarioAction),
}

/// A scheduled event with tick and sequence number for ordering.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    /// Tick at which the event fires, before nodes are processed.
    pub tick: u64,
    /// Sequence number for deterministic ordering of same-tick events.
    pub seq: SequenceNumber,
    /// The event to process.
    pub event: Event,
}

impl ScheduledEvent {
    pub fn new(tick: u64, seq: SequenceNumber, event: Event) -> Self {
        Self { tick, seq, event }
    }
}

// Implement ordering for min-heap (BinaryHeap is max-heap, so we reverse).
impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.tick == other.tick && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        match other.tick.cmp(&self.tick) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}
