//! SimNode wrapper for simulated meshcast nodes.

use std::cell::{Cell, RefCell};

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use meshcast::{
    Datagram, DefaultConfig, Error, Face, FaceIo, FaceSet, Handlers, Manager, Message, Parent,
    Random, ReplyLayout, MAX_FACES,
};

use crate::topology::NodeId;

/// Message type used throughout the simulation.
pub type SimMessage = Message<ReplyLayout>;

/// Message ids available in the reply layout.
const ID_COUNT: usize = 8;

/// A datagram waiting in a face's outbound slot.
#[derive(Debug, Clone, Copy)]
pub struct Outbound {
    pub datagram: Datagram,
    /// Tick at which the node queued it.
    pub queued_at: u64,
}

#[derive(Clone, Copy, Default)]
struct FaceSlot {
    inbox: Option<Datagram>,
    outbox: Option<Outbound>,
    expired: bool,
}

/// Simulated face transceivers.
///
/// The simulator moves datagrams between outbound and inbound slots; the
/// outbound slot stays occupied (and the face busy) until it does.
pub struct SimFaces {
    slots: Mutex<NoopRawMutex, RefCell<[FaceSlot; MAX_FACES]>>,
    now: Cell<u64>,
}

impl SimFaces {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(RefCell::new([FaceSlot::default(); MAX_FACES])),
            now: Cell::new(0),
        }
    }

    /// Set the tick stamped on datagrams sent from now on.
    pub fn set_now(&self, tick: u64) {
        self.now.set(tick);
    }

    pub fn set_expired(&self, face: Face, expired: bool) {
        self.slots
            .lock(|cell| cell.borrow_mut()[face as usize].expired = expired);
    }

    /// Place a datagram in a face's inbound slot. Returns false if occupied.
    pub fn inject_rx(&self, face: Face, datagram: Datagram) -> bool {
        self.slots.lock(|cell| {
            let mut slots = cell.borrow_mut();
            let slot = &mut slots[face as usize];
            if slot.inbox.is_some() {
                return false;
            }
            slot.inbox = Some(datagram);
            true
        })
    }

    pub fn has_inbound(&self, face: Face) -> bool {
        self.slots
            .lock(|cell| cell.borrow()[face as usize].inbox.is_some())
    }

    /// Look at a face's outbound slot without draining it.
    pub fn peek_outbound(&self, face: Face) -> Option<Outbound> {
        self.slots.lock(|cell| cell.borrow()[face as usize].outbox)
    }

    /// Drain a face's outbound slot.
    pub fn take_outbound(&self, face: Face) -> Option<Outbound> {
        self.slots
            .lock(|cell| cell.borrow_mut()[face as usize].outbox.take())
    }
}

impl Default for SimFaces {
    fn default() -> Self {
        Self::new()
    }
}

impl FaceIo for SimFaces {
    fn pending_send(&self, face: Face) -> bool {
        self.slots
            .lock(|cell| cell.borrow()[face as usize].outbox.is_some())
    }

    fn available(&self, face: Face) -> Option<Datagram> {
        self.slots.lock(|cell| cell.borrow()[face as usize].inbox)
    }

    fn mark_consumed(&self, face: Face) {
        self.slots
            .lock(|cell| cell.borrow_mut()[face as usize].inbox = None);
    }

    fn send(&self, face: Face, data: &[u8]) -> bool {
        let queued_at = self.now.get();
        self.slots.lock(|cell| {
            let mut slots = cell.borrow_mut();
            let slot = &mut slots[face as usize];
            if slot.outbox.is_some() {
                return false;
            }
            match Datagram::from_slice(data) {
                Some(datagram) => {
                    slot.outbox = Some(Outbound {
                        datagram,
                        queued_at,
                    });
                    true
                }
                None => false,
            }
        })
    }

    fn is_expired(&self, face: Face) -> bool {
        self.slots.lock(|cell| cell.borrow()[face as usize].expired)
    }
}

/// A message delivery observed by a node's handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub id: u8,
    pub src: Face,
    pub is_loop: bool,
    /// Hop count carried in payload byte 1; `None` for loop notifications.
    pub hops: Option<u8>,
}

/// Handlers that count the nodes a flood reached.
///
/// Payload byte 0 of a reply carries the size of the replying subtree;
/// payload byte 1 of a message counts the hops it took.
#[derive(Debug, Default)]
pub struct CountingHandlers {
    counts: [u8; ID_COUNT],
    pub deliveries: Vec<Delivery>,
}

impl CountingHandlers {
    /// Nodes counted so far for a message id (this node included).
    pub fn count(&self, id: u8) -> u8 {
        self.counts[id as usize % ID_COUNT]
    }

    /// Start a count at this node.
    pub fn start(&mut self, id: u8) {
        self.counts[id as usize % ID_COUNT] = 1;
    }

    /// Loop notifications received.
    pub fn loops(&self) -> usize {
        self.deliveries.iter().filter(|d| d.is_loop).count()
    }

    /// First-time deliveries received.
    pub fn received(&self) -> usize {
        self.deliveries.iter().filter(|d| !d.is_loop).count()
    }
}

impl Handlers for CountingHandlers {
    fn receive_message(
        &mut self,
        id: u8,
        src: Face,
        payload: Option<&mut [u8]>,
        is_loop: bool,
    ) {
        if !is_loop {
            self.start(id);
        }
        self.deliveries.push(Delivery {
            id,
            src,
            is_loop,
            hops: payload.and_then(|p| p.get(1).copied()),
        });
    }

    fn forward_message(
        &mut self,
        _id: u8,
        _src: Option<Face>,
        _dst: Face,
        payload: &mut [u8],
    ) -> usize {
        if let Some(hops) = payload.get_mut(1) {
            *hops = hops.saturating_add(1);
        }
        payload.len()
    }

    fn receive_reply(&mut self, id: u8, _src: Face, payload: &[u8]) {
        let slot = &mut self.counts[id as usize % ID_COUNT];
        *slot = slot.saturating_add(payload[0]);
    }

    fn forward_reply(&mut self, id: u8, _dst: Option<Face>, payload: &mut [u8]) -> Option<usize> {
        payload[0] = self.count(id);
        Some(1)
    }
}

/// Mock random for simulation (deterministic LCG).
pub struct SimRandom {
    state: u64,
}

impl SimRandom {
    pub fn new() -> Self {
        Self { state: 12345 }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self { state: seed }
    }
}

impl Default for SimRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl Random for SimRandom {
    fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let range = max - min;
        if range == 0 {
            return min;
        }
        min + (self.state % range)
    }
}

/// Type alias for simulated nodes.
pub type SimNodeInner = Manager<SimFaces, CountingHandlers, DefaultConfig>;

/// Wrapper around a meshcast Manager for simulation.
pub struct SimNode {
    id: NodeId,
    inner: SimNodeInner,
}

impl SimNode {
    /// Create a node; `seed` drives its sequence counter.
    pub fn new(id: NodeId, seed: u64) -> Self {
        let inner = Manager::new(SimFaces::new(), &mut SimRandom::with_seed(seed));
        Self { id, inner }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get a reference to the inner manager.
    pub fn inner(&self) -> &SimNodeInner {
        &self.inner
    }

    /// Get a mutable reference to the inner manager.
    pub fn inner_mut(&mut self) -> &mut SimNodeInner {
        &mut self.inner
    }

    pub fn faces(&self) -> &SimFaces {
        self.inner.faces()
    }

    pub fn handlers(&self) -> &CountingHandlers {
        self.inner.handlers()
    }

    pub fn parent(&self) -> Parent {
        self.inner.parent()
    }

    pub fn sent_faces(&self) -> FaceSet {
        self.inner.sent_faces()
    }

    pub fn processing(&self) -> bool {
        self.inner.processing()
    }

    /// Originate a flood from this node.
    ///
    /// The count for a reply-bearing message starts at one (this node); it
    /// is left untouched if the send is refused.
    pub fn originate(&mut self, now: u64, message: SimMessage) -> Result<(), Error> {
        self.faces().set_now(now);
        let id = message.id();
        let fire_and_forget = message.header().is_fire_and_forget();

        let previous = self.inner.handlers().count(id);
        if !fire_and_forget {
            self.inner.handlers_mut().start(id);
        }
        let outcome = self.inner.send(message);
        if outcome.is_err() {
            self.inner.handlers_mut().counts[id as usize % ID_COUNT] = previous;
        }
        outcome
    }

    /// Run one protocol tick.
    pub fn process(&mut self, now: u64) -> Result<(), Error> {
        self.faces().set_now(now);
        self.inner.process()
    }

    /// Take the result surfaced by the last tick or origination.
    pub fn receive(&mut self) -> Option<SimMessage> {
        self.inner.receive()
    }
}
