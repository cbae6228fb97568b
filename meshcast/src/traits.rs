//! Core traits for link-layer, application handler and randomness abstraction.
//!
//! These traits allow the protocol to be used with different:
//! - Link layers (IR face transceivers, serial links, simulation)
//! - Application logic observing and transforming payloads as they flood
//! - Random number sources

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::types::{Face, FaceSet};
use crate::wire::Datagram;

/// Mutex type used for channels and the mock link layer.
pub(crate) type ChannelMutex = CriticalSectionRawMutex;

/// Per-face datagram link layer.
///
/// Each face has one inbound slot and one outbound slot. The contract the
/// whole protocol rests on: at most one outbound datagram may be pending on
/// a face at a time, and `send` refuses (returns false) while one is.
///
/// Methods take `&self`; implementations use interior mutability so a radio
/// interrupt or a simulator can fill inbound slots concurrently.
///
/// # Usage Pattern
///
/// ```
/// use meshcast::traits::FaceIo;
/// use meshcast::wire::Datagram;
/// use core::cell::RefCell;
///
/// // Loopback face 0: whatever is sent comes straight back in.
/// struct Loopback(RefCell<Option<Datagram>>);
///
/// impl FaceIo for Loopback {
///     fn pending_send(&self, _face: u8) -> bool { false }
///     fn available(&self, _face: u8) -> Option<Datagram> { *self.0.borrow() }
///     fn mark_consumed(&self, _face: u8) { self.0.borrow_mut().take(); }
///     fn send(&self, _face: u8, data: &[u8]) -> bool {
///         let mut slot = self.0.borrow_mut();
///         if slot.is_some() { return false; }
///         *slot = Datagram::from_slice(data);
///         slot.is_some()
///     }
/// }
///
/// let link = Loopback(RefCell::new(None));
/// assert!(link.send(0, &[0x05, 1, 2]));
/// assert!(!link.send(0, &[0x05]));
/// assert_eq!(link.available(0).unwrap().as_slice(), &[0x05, 1, 2]);
/// link.mark_consumed(0);
/// assert!(link.available(0).is_none());
/// ```
pub trait FaceIo {
    /// Whether a previously sent datagram on this face has not drained yet.
    fn pending_send(&self, face: Face) -> bool;

    /// Copy of the datagram waiting in this face's inbound slot, if any.
    ///
    /// The slot stays occupied until `mark_consumed` is called.
    fn available(&self, face: Face) -> Option<Datagram>;

    /// Release the inbound slot of this face.
    fn mark_consumed(&self, face: Face);

    /// Queue a datagram on this face.
    ///
    /// Returns false (and does nothing) if a send is still pending on the face.
    fn send(&self, face: Face, data: &[u8]) -> bool;

    /// Whether the neighbor presence on this face timed out.
    ///
    /// Only consulted when the configuration skips expired faces. The
    /// default reports every face as present.
    fn is_expired(&self, face: Face) -> bool {
        let _ = face;
        false
    }
}

/// Application callbacks invoked while a flood passes through this node.
///
/// Every method is optional; the defaults pass payloads through unchanged,
/// flood every new message and leave duplicate detection to the manager.
/// Callbacks run synchronously inside `Manager::process` or `Manager::send`
/// and must not retain the payload slices.
pub trait Handlers {
    /// A message arrived on `src`.
    ///
    /// For a new message `payload` is the mutable payload and `is_loop` is
    /// false; edits are seen by every forward. For a loop, a duplicate
    /// fire-and-forget delivery or a stale "stop waiting" frame `payload` is
    /// `None` and `is_loop` is true.
    fn receive_message(
        &mut self,
        id: u8,
        src: Face,
        payload: Option<&mut [u8]>,
        is_loop: bool,
    ) {
        let _ = (id, src, payload, is_loop);
    }

    /// A new message arrived on `src`; return true to take it here instead
    /// of flooding it on.
    ///
    /// A consumed message is not passed to `receive_message` and is not
    /// forwarded. A consumed reply-bearing message is answered right away,
    /// as if this node had no other neighbors.
    fn consume_message(&mut self, id: u8, src: Face, payload: &[u8]) -> bool {
        let _ = (id, src, payload);
        false
    }

    /// A message is about to be forwarded from `src` (`None` when this node
    /// originated it) to `dst`.
    ///
    /// `payload` is a per-destination copy. Returns the number of payload
    /// bytes to send.
    fn forward_message(
        &mut self,
        id: u8,
        src: Option<Face>,
        dst: Face,
        payload: &mut [u8],
    ) -> usize {
        let _ = (id, src, dst);
        payload.len()
    }

    /// A new message was handed to the link layer on every face in `targets`.
    fn propagated(&mut self, id: u8, targets: FaceSet) {
        let _ = (id, targets);
    }

    /// A reply arrived on `src`.
    fn receive_reply(&mut self, id: u8, src: Face, payload: &[u8]) {
        let _ = (id, src, payload);
    }

    /// All replies are in; synthesize the aggregate for `dst` (`None` when
    /// the aggregate is surfaced locally at the originator).
    ///
    /// `payload` arrives cleared. Returns the number of payload bytes to
    /// send, or `None` to keep the payload of the reply that completed the
    /// aggregation unchanged.
    fn forward_reply(&mut self, id: u8, dst: Option<Face>, payload: &mut [u8]) -> Option<usize> {
        let _ = (id, dst, payload);
        None
    }

    /// Whether duplicate detection for message `id` is done by
    /// [`track`](Self::track) and [`tracked`](Self::tracked) instead of the
    /// manager's ring.
    fn tracks(&self, id: u8) -> bool {
        let _ = id;
        false
    }

    /// Remember a message whose id this handler tracks.
    fn track(&mut self, key: TrackKey) {
        let _ = key;
    }

    /// Whether a message whose id this handler tracks was seen before.
    fn tracked(&self, key: TrackKey) -> bool {
        let _ = key;
        false
    }
}

/// Identity of a message as seen by handler-side tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackKey {
    pub id: u8,
    pub sequence: u8,
    pub fire_and_forget: bool,
}

/// Handler set with every callback absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHandlers;

impl Handlers for NoHandlers {}

/// Random number generator trait.
///
/// Used for:
/// - Seeding the origination sequence counter
pub trait Random {
    /// Generate a random u64 in the range [min, max).
    fn gen_range(&mut self, min: u64, max: u64) -> u64;

    /// Generate a random u32.
    fn gen_u32(&mut self) -> u32 {
        self.gen_range(0, u32::MAX as u64 + 1) as u32
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_impls {
    //! Mock implementations of traits for unit testing.
    //!
    //! Available when running tests or with the `test-support` feature enabled.

    use alloc::vec::Vec;
    use core::cell::RefCell;

    use embassy_sync::blocking_mutex::Mutex;

    use super::*;
    use crate::types::MAX_FACES;

    #[derive(Clone, Copy)]
    struct FaceSlot {
        inbox: Option<Datagram>,
        outbox: Option<Datagram>,
        expired: bool,
    }

    impl FaceSlot {
        const EMPTY: FaceSlot = FaceSlot {
            inbox: None,
            outbox: None,
            expired: false,
        };
    }

    /// Mock link layer: one inbound and one outbound slot per face.
    ///
    /// Tests inject inbound datagrams and drain outbound ones by hand.
    pub struct MockFaces {
        slots: Mutex<ChannelMutex, RefCell<[FaceSlot; MAX_FACES]>>,
    }

    impl Default for MockFaces {
        fn default() -> Self {
            Self {
                slots: Mutex::new(RefCell::new([FaceSlot::EMPTY; MAX_FACES])),
            }
        }
    }

    impl MockFaces {
        /// All faces present.
        pub fn new() -> Self {
            Self::default()
        }

        /// Only the listed faces have a neighbor; the rest report expired.
        pub fn with_neighbors(faces: &[Face]) -> Self {
            let mock = Self::new();
            for face in 0..MAX_FACES as Face {
                mock.set_expired(face, !faces.contains(&face));
            }
            mock
        }

        /// Deliver a datagram into a face's inbound slot.
        ///
        /// Returns false if the slot is still occupied.
        pub fn inject_rx(&self, face: Face, data: &[u8]) -> bool {
            self.slots.lock(|cell| {
                let mut slots = cell.borrow_mut();
                let slot = &mut slots[face as usize];
                if slot.inbox.is_some() {
                    return false;
                }
                slot.inbox = Datagram::from_slice(data);
                slot.inbox.is_some()
            })
        }

        /// Drain the outbound slot of a face (the datagram "went out").
        pub fn take_sent(&self, face: Face) -> Option<Datagram> {
            self.slots
                .lock(|cell| cell.borrow_mut()[face as usize].outbox.take())
        }

        /// Drain every outbound slot, returning `(face, datagram)` pairs.
        pub fn take_all_sent(&self) -> Vec<(Face, Datagram)> {
            (0..MAX_FACES as Face)
                .filter_map(|face| self.take_sent(face).map(|d| (face, d)))
                .collect()
        }

        /// Whether the inbound slot of a face is still occupied.
        pub fn has_inbound(&self, face: Face) -> bool {
            self.slots
                .lock(|cell| cell.borrow()[face as usize].inbox.is_some())
        }

        pub fn set_expired(&self, face: Face, expired: bool) {
            self.slots
                .lock(|cell| cell.borrow_mut()[face as usize].expired = expired);
        }
    }

    impl FaceIo for MockFaces {
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
            self.slots.lock(|cell| {
                let mut slots = cell.borrow_mut();
                let slot = &mut slots[face as usize];
                if slot.outbox.is_some() {
                    return false;
                }
                slot.outbox = Datagram::from_slice(data);
                slot.outbox.is_some()
            })
        }

        fn is_expired(&self, face: Face) -> bool {
            self.slots.lock(|cell| cell.borrow()[face as usize].expired)
        }
    }

    /// A recorded handler invocation.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum HandlerCall {
        ReceiveMessage {
            id: u8,
            src: Face,
            payload: Option<Vec<u8>>,
            is_loop: bool,
        },
        ForwardMessage {
            id: u8,
            src: Option<Face>,
            dst: Face,
        },
        ReceiveReply {
            id: u8,
            src: Face,
            payload: Vec<u8>,
        },
        ForwardReply {
            id: u8,
            dst: Option<Face>,
        },
        Propagated {
            id: u8,
            targets: FaceSet,
        },
    }

    /// Handlers that record every call.
    #[derive(Default)]
    pub struct RecordingHandlers {
        pub calls: Vec<HandlerCall>,
        /// Write the destination face into `payload[0]` of every forward.
        pub stamp_destination: bool,
        /// Aggregate written by `forward_reply`; `None` keeps the default.
        pub reply: Option<Vec<u8>>,
        /// Message ids taken locally instead of flooded.
        pub consume_ids: Vec<u8>,
        /// Payloads of consumed messages.
        pub consumed: Vec<(u8, Vec<u8>)>,
        /// Message ids whose duplicate detection happens here.
        pub external_ids: Vec<u8>,
        /// Keys of externally tracked messages, in arrival order.
        pub tracked_keys: Vec<TrackKey>,
    }

    impl RecordingHandlers {
        pub fn new() -> Self {
            Self::default()
        }

        /// Loop notifications received so far.
        pub fn loop_count(&self) -> usize {
            self.calls
                .iter()
                .filter(|c| matches!(c, HandlerCall::ReceiveMessage { is_loop: true, .. }))
                .count()
        }
    }

    impl Handlers for RecordingHandlers {
        fn receive_message(
            &mut self,
            id: u8,
            src: Face,
            payload: Option<&mut [u8]>,
            is_loop: bool,
        ) {
            self.calls.push(HandlerCall::ReceiveMessage {
                id,
                src,
                payload: payload.map(|p| p.to_vec()),
                is_loop,
            });
        }

        fn consume_message(&mut self, id: u8, _src: Face, payload: &[u8]) -> bool {
            if !self.consume_ids.contains(&id) {
                return false;
            }
            self.consumed.push((id, payload.to_vec()));
            true
        }

        fn forward_message(
            &mut self,
            id: u8,
            src: Option<Face>,
            dst: Face,
            payload: &mut [u8],
        ) -> usize {
            self.calls.push(HandlerCall::ForwardMessage { id, src, dst });
            if self.stamp_destination {
                payload[0] = dst;
            }
            payload.len()
        }

        fn propagated(&mut self, id: u8, targets: FaceSet) {
            self.calls.push(HandlerCall::Propagated { id, targets });
        }

        fn receive_reply(&mut self, id: u8, src: Face, payload: &[u8]) {
            self.calls.push(HandlerCall::ReceiveReply {
                id,
                src,
                payload: payload.to_vec(),
            });
        }

        fn forward_reply(
            &mut self,
            id: u8,
            dst: Option<Face>,
            payload: &mut [u8],
        ) -> Option<usize> {
            self.calls.push(HandlerCall::ForwardReply { id, dst });
            let reply = self.reply.as_ref()?;
            let len = reply.len().min(payload.len());
            payload[..len].copy_from_slice(&reply[..len]);
            Some(len)
        }

        fn tracks(&self, id: u8) -> bool {
            self.external_ids.contains(&id)
        }

        fn track(&mut self, key: TrackKey) {
            self.tracked_keys.push(key);
        }

        fn tracked(&self, key: TrackKey) -> bool {
            self.tracked_keys.contains(&key)
        }
    }

    /// Mock random for testing (deterministic).
    pub struct MockRandom {
        pub state: u64,
    }

    impl Default for MockRandom {
        fn default() -> Self {
            Self { state: 12345 }
        }
    }

    impl MockRandom {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_seed(seed: u64) -> Self {
            Self { state: seed }
        }
    }

    impl Random for MockRandom {
        fn gen_range(&mut self, min: u64, max: u64) -> u64 {
            // Simple LCG
            self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let range = max - min;
            if range == 0 {
                return min;
            }
            min + (self.state % range)
        }
    }
}
