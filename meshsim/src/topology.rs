//! Network topology: which face of which node is wired to which.
//!
//! Unlike a radio network, every link joins exactly two faces. A face with
//! no link (or an inactive one) reports its neighbor as expired.

use hashbrown::HashMap;
use meshcast::{BroadcastConfig, DefaultConfig, Face};

/// Index of a node in the simulation.
pub type NodeId = usize;

/// One side of a link.
pub type Endpoint = (NodeId, Face);

/// Face used toward the next node in chains and rings.
pub const CHAIN_OUT_FACE: Face = 3;
/// Face used toward the previous node in chains and rings.
pub const CHAIN_IN_FACE: Face = 0;

/// Properties of a face-to-face link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    /// Ticks a datagram waits in the sender's outbound slot before delivery.
    pub delay: u64,
    /// Whether the link is currently active.
    pub active: bool,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            delay: 0,
            active: true,
        }
    }
}

impl Link {
    /// Create a new link with default properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the delay.
    pub fn with_delay(mut self, delay: u64) -> Self {
        self.delay = delay;
        self
    }

    /// Set whether the link is active.
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// The far side of a wired face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Port {
    pub peer: Endpoint,
    pub link: Link,
}

/// Face-level wiring between nodes. Links are symmetric.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    ports: HashMap<Endpoint, Port>,
}

impl Topology {
    /// Create an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes in a line: node `i` face 3 to node `i + 1` face 0.
    pub fn chain(nodes: usize) -> Self {
        let mut topo = Self::new();
        for i in 1..nodes {
            topo.add_link((i - 1, CHAIN_OUT_FACE), (i, CHAIN_IN_FACE), Link::default());
        }
        topo
    }

    /// A chain whose last node is wired back to the first.
    pub fn ring(nodes: usize) -> Self {
        let mut topo = Self::chain(nodes);
        if nodes >= 2 {
            topo.add_link((nodes - 1, CHAIN_OUT_FACE), (0, CHAIN_IN_FACE), Link::default());
        }
        topo
    }

    /// Node 0 is the hub; spoke `k` is wired from hub face `k - 1` to its face 0.
    ///
    /// Spokes beyond the hub's face count are left unconnected.
    pub fn star(nodes: usize) -> Self {
        let mut topo = Self::new();
        for spoke in 1..nodes.min(DefaultConfig::FACE_COUNT + 1) {
            topo.add_link((0, (spoke - 1) as Face), (spoke, 0), Link::default());
        }
        topo
    }

    /// Two nodes joined by two links: node 0 faces 1 and 2 to node 1 faces 4 and 3.
    pub fn parallel() -> Self {
        let mut topo = Self::new();
        topo.add_link((0, 1), (1, 4), Link::default());
        topo.add_link((0, 2), (1, 3), Link::default());
        topo
    }

    /// Wire two faces together, replacing whatever either was wired to.
    pub fn add_link(&mut self, a: Endpoint, b: Endpoint, link: Link) {
        self.remove_link(a);
        self.remove_link(b);
        self.ports.insert(a, Port { peer: b, link });
        self.ports.insert(b, Port { peer: a, link });
    }

    /// Unwire a face (and its peer). Returns true if it was wired.
    pub fn remove_link(&mut self, endpoint: Endpoint) -> bool {
        match self.ports.remove(&endpoint) {
            Some(port) => {
                self.ports.remove(&port.peer);
                true
            }
            None => false,
        }
    }

    /// The far side of a face.
    pub fn port(&self, endpoint: Endpoint) -> Option<&Port> {
        self.ports.get(&endpoint)
    }

    /// The endpoint a face is wired to, whether the link is active or not.
    pub fn peer(&self, endpoint: Endpoint) -> Option<Endpoint> {
        self.port(endpoint).map(|p| p.peer)
    }

    /// Whether a face has an active link.
    pub fn is_live(&self, endpoint: Endpoint) -> bool {
        self.port(endpoint).is_some_and(|p| p.link.active)
    }

    /// Update the link on a face; both directions change together.
    pub fn update_link(&mut self, endpoint: Endpoint, f: impl Fn(&mut Link)) -> bool {
        let Some(peer) = self.peer(endpoint) else {
            return false;
        };
        for side in [endpoint, peer] {
            if let Some(port) = self.ports.get_mut(&side) {
                f(&mut port.link);
            }
        }
        true
    }

    /// Set the delay on every link.
    pub fn set_global_delay(&mut self, delay: u64) {
        for port in self.ports.values_mut() {
            port.link.delay = delay;
        }
    }

    /// Whether two nodes share at least one active link.
    pub fn is_connected(&self, a: NodeId, b: NodeId) -> bool {
        self.ports
            .iter()
            .any(|(&(node, _), port)| node == a && port.peer.0 == b && port.link.active)
    }

    /// Wired faces of a node, ascending.
    pub fn faces_of(&self, node: NodeId) -> Vec<Face> {
        let mut faces: Vec<Face> = self
            .ports
            .keys()
            .filter(|(n, _)| *n == node)
            .map(|&(_, face)| face)
            .collect();
        faces.sort_unstable();
        faces
    }

    /// Distinct nodes wired to a node, ascending.
    pub fn neighbors(&self, node: NodeId) -> Vec<NodeId> {
        let mut neighbors: Vec<NodeId> = self
            .ports
            .iter()
            .filter(|(&(n, _), _)| n == node)
            .map(|(_, port)| port.peer.0)
            .collect();
        neighbors.sort_unstable();
        neighbors.dedup();
        neighbors
    }

    /// Number of links.
    pub fn link_count(&self) -> usize {
        self.ports.len() / 2
    }
}
