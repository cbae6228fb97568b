//! meshsim - Tick-driven network simulator for meshcast protocol testing.
//!
//! This crate provides a deterministic simulator for testing the meshcast
//! flooding protocol across many face-linked nodes in a single process.
//!
//! # Features
//!
//! - **Tick-driven simulation**: every node's `process()` runs once per tick,
//!   in a fixed order, so runs are reproducible
//! - **Face-level wiring**: each link joins one face of one node to one face
//!   of another; unwired faces report their neighbor as expired
//! - **Link properties**: delay and active flag per link
//! - **Scenario builder**: chain, ring, star, and parallel-link topologies
//!   with scheduled originations and link failures
//! - **Counting handlers**: replies aggregate the number of nodes reached,
//!   so a finished flood reports the size of its spanning tree
//!
//! # Example
//!
//! ```
//! use meshsim::{ScenarioBuilder, SimMessage};
//!
//! // Flood a 4-node chain from one end.
//! let result = ScenarioBuilder::new(4)
//!     .chain_topology()
//!     .originate_at(0, 0, SimMessage::new(1, false))
//!     .run_until_quiescent(100);
//!
//! assert!(result.quiescent);
//! assert_eq!(result.final_count(), Some(4));
//! ```
//!
//! # Architecture
//!
//! Each tick:
//! 1. Refresh every face's neighbor presence from the topology
//! 2. Fire scheduled events (originations, link changes)
//! 3. Call `process()` on each node and collect surfaced results
//! 4. Move outbound datagrams across links into free inbound slots
//!
//! A datagram stays in the sender's outbound slot until the peer's inbound
//! slot is free, which gives the same backpressure a real transceiver would.

pub mod event;
pub mod metrics;
pub mod node;
pub mod scenario;
pub mod sim;
pub mod topology;

// Re-export main types
pub use event::{Event, ScenarioAction, ScheduledEvent};
pub use metrics::{FloodResult, ProtocolError, SimMetrics, SimulationResult};
pub use node::{CountingHandlers, Delivery, SimFaces, SimMessage, SimNode};
pub use scenario::{chain_scenario, ScenarioBuilder};
pub use sim::Simulator;
pub use topology::{Endpoint, Link, NodeId, Topology};
