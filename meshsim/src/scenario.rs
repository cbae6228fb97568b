//! Scenario builder for setting up and running simulations.

use crate::event::ScenarioAction;
use crate::metrics::SimulationResult;
use crate::node::SimMessage;
use crate::sim::Simulator;
use crate::topology::{Endpoint, NodeId, Topology};

/// Type of topology to generate.
#[derive(Debug, Clone)]
enum TopologyType {
    /// Nodes in a line.
    Chain,
    /// A chain closed into a loop.
    Ring,
    /// Star topology (first node is hub).
    Star,
    /// Two nodes joined by two links.
    Parallel,
    /// Custom topology provided by user.
    Custom(Topology),
}

/// Builder for simulation scenarios.
pub struct ScenarioBuilder {
    /// Number of nodes to create.
    num_nodes: usize,
    /// Seed for the nodes' sequence counters.
    seed: u64,
    /// Topology type to generate (must be explicitly specified).
    topology_type: Option<TopologyType>,
    /// Delay applied to every link.
    delay: Option<u64>,
    /// Scheduled actions.
    actions: Vec<(u64, ScenarioAction)>,
    /// Scheduled originations.
    originations: Vec<(u64, NodeId, SimMessage)>,
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ScenarioBuilder {
    /// Create a new scenario with the specified number of nodes.
    ///
    /// Note: You MUST specify a topology before calling build().
    pub fn new(num_nodes: usize) -> Self {
        Self {
            num_nodes,
            seed: 42,
            topology_type: None,
            delay: None,
            actions: Vec::new(),
            originations: Vec::new(),
        }
    }

    /// Set the seed for deterministic simulation.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set a custom network topology.
    pub fn topology(mut self, topo: Topology) -> Self {
        self.topology_type = Some(TopologyType::Custom(topo));
        self
    }

    pub fn chain_topology(mut self) -> Self {
        self.topology_type = Some(TopologyType::Chain);
        self
    }

    pub fn ring_topology(mut self) -> Self {
        self.topology_type = Some(TopologyType::Ring);
        self
    }

    /// Use star topology (first node is hub).
    pub fn star_topology(mut self) -> Self {
        self.topology_type = Some(TopologyType::Star);
        self
    }

    /// Two nodes joined on two face pairs.
    pub fn parallel_links(mut self) -> Self {
        self.topology_type = Some(TopologyType::Parallel);
        self
    }

    /// Set the delay of every link.
    pub fn with_delay(mut self, delay: u64) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Have a node originate a message at the given tick.
    pub fn originate_at(mut self, tick: u64, node: NodeId, message: SimMessage) -> Self {
        self.originations.push((tick, node, message));
        self
    }

    /// Take the link on a face down at the given tick.
    pub fn disable_link_at(mut self, tick: u64, endpoint: Endpoint) -> Self {
        self.actions
            .push((tick, ScenarioAction::DisableLink { endpoint }));
        self
    }

    /// Bring the link on a face back up at the given tick.
    pub fn enable_link_at(mut self, tick: u64, endpoint: Endpoint) -> Self {
        self.actions
            .push((tick, ScenarioAction::EnableLink { endpoint }));
        self
    }

    /// Change the delay of the link on a face at the given tick.
    pub fn set_delay_at(mut self, tick: u64, endpoint: Endpoint, delay: u64) -> Self {
        self.actions
            .push((tick, ScenarioAction::SetDelay { endpoint, delay }));
        self
    }

    /// Build the simulator with all nodes and topology.
    pub fn build(self) -> (Simulator, Vec<NodeId>) {
        let mut topo = match self.topology_type {
            Some(TopologyType::Chain) => Topology::chain(self.num_nodes),
            Some(TopologyType::Ring) => Topology::ring(self.num_nodes),
            Some(TopologyType::Star) => Topology::star(self.num_nodes),
            Some(TopologyType::Parallel) => Topology::parallel(),
            Some(TopologyType::Custom(t)) => t,
            None => panic!(
                "Topology must be explicitly specified. \
                Use .chain_topology(), .ring_topology(), .star_topology(), \
                .parallel_links(), or .topology()"
            ),
        };

        if let Some(delay) = self.delay {
            topo.set_global_delay(delay);
        }

        let mut sim = Simulator::new().with_topology(topo);

        let mut node_ids = Vec::with_capacity(self.num_nodes);
        for i in 0..self.num_nodes {
            let node_seed = self.seed.wrapping_add(i as u64 * 1000);
            node_ids.push(sim.add_node(node_seed));
        }

        // Actions go first so that a link change and an origination scheduled
        // for the same tick see the new link.
        for (tick, action) in self.actions {
            sim.schedule_action(tick, action);
        }
        for (tick, node, message) in self.originations {
            sim.originate_at(tick, node, message);
        }

        (sim, node_ids)
    }

    /// Build and run the simulation for the specified number of ticks.
    pub fn run_for(self, ticks: u64) -> SimulationResult {
        let (mut sim, _) = self.build();
        sim.run_for(ticks)
    }

    /// Build and run until the network settles, or `max_ticks` have passed.
    pub fn run_until_quiescent(self, max_ticks: u64) -> SimulationResult {
        let (mut sim, _) = self.build();
        sim.run_until_quiescent(max_ticks)
    }
}

/// Convenience function to create an N-node chain scenario.
pub fn chain_scenario(num_nodes: usize) -> ScenarioBuilder {
    ScenarioBuilder::new(num_nodes).chain_topology()
}
