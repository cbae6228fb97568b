//! Manager - the per-node broadcast state and the node-facing API.
//!
//! The manager owns everything a node knows about the flood it is part of:
//! the face the message came from (`parent`), the faces it is still
//! awaiting replies from (`sent_faces`), and the ring of recently seen
//! headers. It is driven by calling [`Manager::process`] once per control
//! loop iteration; there is no blocking anywhere.
//!
//! # Usage
//!
//! ```ignore
//! let mut manager = Manager::<_, MyHandlers>::new(faces, &mut rng);
//!
//! loop {
//!     manager.process()?;
//!
//!     if let Some(result) = manager.receive() {
//!         // Aggregate for a flood this node originated.
//!     }
//!
//!     if !manager.processing() && button_pressed() {
//!         manager.send(Message::new(COUNT_ID, false))?;
//!     }
//! }
//! ```

use core::marker::PhantomData;

#[cfg(any(test, feature = "debug"))]
use alloc::boxed::Box;

use crate::config::{self, BroadcastConfig, DefaultConfig};
#[cfg(any(test, feature = "debug"))]
use crate::debug::{DebugEmitter, DebugEvent};
use crate::tracker::Tracker;
use crate::traits::{FaceIo, Handlers, NoHandlers, Random, TrackKey};
use crate::types::{Error, Face, FaceSet, Metrics, Parent, RESET_MESSAGE_ID};
use crate::wire::{Header, HeaderLayout, Message};

/// The broadcast protocol state of one node.
///
/// Generic over:
/// - `F`: link layer for the node's faces
/// - `H`: application handlers
/// - `Cfg`: compile-time deployment configuration
pub struct Manager<F, H = NoHandlers, Cfg: BroadcastConfig = DefaultConfig> {
    // Dependencies (injected)
    pub(crate) faces: F,
    pub(crate) handlers: H,

    // Flood state
    pub(crate) tracker: Tracker<Cfg::Layout>,
    pub(crate) parent: Parent,
    /// Header of the reply-bearing flood this node is part of.
    pub(crate) flood: Option<Header<Cfg::Layout>>,
    pub(crate) sent_faces: FaceSet,
    pub(crate) result: Option<Message<Cfg::Layout>>,

    pub(crate) metrics: Metrics,

    #[cfg(any(test, feature = "debug"))]
    debug_emitter: Option<Box<dyn DebugEmitter>>,

    _config: PhantomData<Cfg>,
}

impl<F, H, Cfg> Manager<F, H, Cfg>
where
    F: FaceIo,
    H: Handlers,
    Cfg: BroadcastConfig,
{
    const CONFIG_CHECK: () = assert!(
        config::is_valid::<Cfg>(),
        "BroadcastConfig out of bounds"
    );

    /// Create a manager with default handlers.
    ///
    /// `random` seeds the origination sequence counter.
    pub fn new(faces: F, random: &mut impl Random) -> Self
    where
        H: Default,
    {
        Self::with_handlers(faces, H::default(), random)
    }

    /// Create a manager with the given handlers.
    pub fn with_handlers(faces: F, handlers: H, random: &mut impl Random) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CONFIG_CHECK;

        let max_sequence = Header::<Cfg::Layout>::MAX_SEQUENCE as u64;
        let seed = random.gen_range(0, max_sequence + 1) as u8;

        Self {
            faces,
            handlers,
            tracker: Tracker::new(Cfg::TRACKER_CAPACITY, seed),
            parent: Parent::Idle,
            flood: None,
            sent_faces: FaceSet::EMPTY,
            result: None,
            metrics: Metrics::default(),
            #[cfg(any(test, feature = "debug"))]
            debug_emitter: None,
            _config: PhantomData,
        }
    }

    /// Register the application handlers, replacing the previous ones.
    pub fn setup(&mut self, handlers: H) {
        self.handlers = handlers;
    }

    /// Originate a new flood.
    ///
    /// Stamps a fresh sequence number, tracks the header and forwards the
    /// message on every live face. Fails without side effects if a
    /// reply-bearing flood is still in flight ([`Error::Busy`]) or any face
    /// has an outbound datagram pending ([`Error::LinkBusy`]).
    ///
    /// A reply-bearing message sent from a node with no live neighbors
    /// resolves immediately; its result is available from [`receive`](Self::receive)
    /// right away.
    pub fn send(&mut self, mut message: Message<Cfg::Layout>) -> Result<(), Error> {
        let fire_and_forget = message.header().is_fire_and_forget();
        if !fire_and_forget && self.busy() {
            return Err(Error::Busy);
        }
        if (0..Cfg::FACE_COUNT as Face).any(|face| self.faces.pending_send(face)) {
            return Err(Error::LinkBusy);
        }

        let sequence = self.tracker.next_sequence();
        let header = message.header_mut();
        header.set_sequence(sequence);
        header.set_reply(false);
        let header = *message.header();
        self.track(header);

        if fire_and_forget {
            if header.id() == RESET_MESSAGE_ID {
                self.reset_state(None);
            }
        } else {
            self.parent = Parent::Origin;
            self.flood = Some(header);
        }

        let targets = self.broadcast_targets(None);
        emit_debug!(
            self,
            DebugEvent::Originated {
                id: header.id(),
                sequence,
                targets: targets.bits(),
            }
        );

        self.broadcast(&message, None, targets)?;
        self.handlers.propagated(header.id(), targets);

        if !fire_and_forget && targets.is_empty() {
            self.resolve(message, false)?;
        }
        Ok(())
    }

    /// Take the aggregate surfaced by the last tick, if any.
    ///
    /// Only the originator of a reply-bearing flood ever gets a result. It
    /// is valid until the next [`process`](Self::process) call.
    pub fn receive(&mut self) -> Option<Message<Cfg::Layout>> {
        self.result.take()
    }

    /// Whether this node is still awaiting replies.
    ///
    /// Local code should not originate a reply-bearing flood while this is true.
    pub fn processing(&self) -> bool {
        !self.sent_faces.is_empty()
    }

    /// True while a reply-bearing flood has not resolved at this node.
    pub(crate) fn busy(&self) -> bool {
        !self.sent_faces.is_empty() || self.parent != Parent::Idle
    }

    /// Where the reply for the current flood goes.
    pub fn parent(&self) -> Parent {
        self.parent
    }

    /// Faces still owing a reply for the current flood.
    pub fn sent_faces(&self) -> FaceSet {
        self.sent_faces
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn tracker(&self) -> &Tracker<Cfg::Layout> {
        &self.tracker
    }

    pub fn handlers(&self) -> &H {
        &self.handlers
    }

    pub fn handlers_mut(&mut self) -> &mut H {
        &mut self.handlers
    }

    /// Get the link layer reference.
    pub fn faces(&self) -> &F {
        &self.faces
    }

    /// Route protocol trace events to `emitter`.
    #[cfg(any(test, feature = "debug"))]
    pub fn set_debug_emitter(&mut self, emitter: Box<dyn DebugEmitter>) {
        self.debug_emitter = Some(emitter);
    }

    #[cfg(any(test, feature = "debug"))]
    pub(crate) fn emit(&mut self, event: DebugEvent) {
        if let Some(emitter) = self.debug_emitter.as_mut() {
            emitter.emit(event);
        }
    }

    /// Record a header in the ring, or with the handlers if they track its id.
    pub(crate) fn track(&mut self, header: Header<Cfg::Layout>) {
        if self.handlers.tracks(header.id()) {
            self.handlers.track(track_key(header));
            self.tracker.observe(header.sequence());
        } else {
            self.tracker.track(header);
        }
    }

    /// Whether a header was seen before, asking the handlers for ids they track.
    pub(crate) fn is_tracked(&self, header: Header<Cfg::Layout>) -> bool {
        if self.handlers.tracks(header.id()) {
            self.handlers.tracked(track_key(header))
        } else {
            self.tracker.tracked(&header)
        }
    }

    /// Forget the in-flight flood.
    #[cfg_attr(not(any(test, feature = "debug")), allow(unused_variables))]
    pub(crate) fn reset_state(&mut self, face: Option<Face>) {
        self.parent = Parent::Idle;
        self.flood = None;
        self.sent_faces = FaceSet::EMPTY;
        emit_debug!(self, DebugEvent::StateReset { face });
    }
}

fn track_key<L: HeaderLayout>(header: Header<L>) -> TrackKey {
    TrackKey {
        id: header.id(),
        sequence: header.sequence(),
        fire_and_forget: header.is_fire_and_forget(),
    }
}
