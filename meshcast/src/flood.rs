//! Flood processing: one tick of the broadcast state machine.
//!
//! Every tick visits the faces in ascending order and disposes of at most
//! one inbound datagram per face. A datagram is either consumed (and acted
//! on) or left in place for a later tick when acting on it now would need a
//! send on a face that still has one pending. Leaving it in place is the
//! only retry mechanism; nothing here ever blocks.
//!
//! ## Classification
//!
//! ```text
//! reply?         yes -> awaited face?  no  -> UnexpectedReply
//!                                      yes -> receive_reply, clear bit, resolve when none left
//! awaited face?  yes (not fire-and-forget) -> loop signal, clear bit, resolve when none left
//! bare header?   yes -> stale "stop waiting", dropped
//! tracked?       yes -> fire-and-forget    -> duplicate, notify handler
//!                       otherwise          -> late propagation, answer with bare header
//! new            -> consumed by handlers?  -> answer at once (reply-bearing)
//!                   otherwise              -> record parent, track, receive_message,
//!                                             forward to every other live face
//!                                             (leaf: resolve at once)
//! ```
//!
//! A frame on a face we are awaiting settles that face whatever flood it
//! belongs to, so two floods started at once cut each other off instead of
//! waiting on each other. Forwarded messages always carry at least one
//! payload byte; a header-only frame is therefore always a "stop waiting"
//! answer and is never answered in turn.

#[cfg(any(test, feature = "debug"))]
use crate::debug::DebugEvent;
use crate::config::BroadcastConfig;
use crate::manager::Manager;
use crate::traits::{FaceIo, Handlers};
use crate::types::{Error, Face, FaceSet, Parent, HEADER_BYTES, RESET_MESSAGE_ID};
use crate::wire::{Datagram, Message};

impl<F, H, Cfg> Manager<F, H, Cfg>
where
    F: FaceIo,
    H: Handlers,
    Cfg: BroadcastConfig,
{
    /// Run one tick across all faces.
    ///
    /// Any result surfaced by the previous tick is discarded first. Every
    /// face is visited even if one fails; the first error is returned.
    pub fn process(&mut self) -> Result<(), Error> {
        self.result = None;

        let mut outcome = Ok(());
        for face in 0..Cfg::FACE_COUNT as Face {
            if let Err(e) = self.process_face(face) {
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }
        outcome
    }

    fn process_face(&mut self, face: Face) -> Result<(), Error> {
        let Some(datagram) = self.faces.available(face) else {
            return Ok(());
        };

        let message = match Message::decode(datagram.as_slice(), Cfg::PAYLOAD_BYTES) {
            Ok(message) => message,
            Err(_) => {
                self.consume(face);
                self.metrics.malformed = self.metrics.malformed.wrapping_add(1);
                emit_debug!(
                    self,
                    DebugEvent::FrameMalformed {
                        face,
                        len: datagram.len(),
                    }
                );
                return Ok(());
            }
        };

        if message.header().is_reply() {
            self.handle_reply(face, message)
        } else {
            let header_only = datagram.len() == HEADER_BYTES;
            self.handle_message(face, message, header_only)
        }
    }

    fn handle_reply(&mut self, face: Face, message: Message<Cfg::Layout>) -> Result<(), Error> {
        if !self.sent_faces.contains(face) {
            self.consume(face);
            emit_debug!(
                self,
                DebugEvent::UnexpectedReply {
                    face,
                    id: message.id(),
                }
            );
            return Err(Error::UnexpectedReply { face });
        }

        if !self.can_resolve_after(face) {
            self.defer(face, "parent link busy");
            return Ok(());
        }

        self.consume(face);
        self.handlers
            .receive_reply(message.id(), face, &message.payload()[..Cfg::PAYLOAD_BYTES]);
        self.sent_faces.remove(face);

        emit_debug!(
            self,
            DebugEvent::ReplyReceived {
                face,
                id: message.id(),
                awaiting: self.sent_faces.len() as u8,
            }
        );

        if self.sent_faces.is_empty() {
            self.resolve(message, true)?;
        }
        Ok(())
    }

    fn handle_message(
        &mut self,
        face: Face,
        mut message: Message<Cfg::Layout>,
        header_only: bool,
    ) -> Result<(), Error> {
        let header = *message.header();
        let id = header.id();
        let fire_and_forget = header.is_fire_and_forget();

        // Any reply-bearing frame on an awaited face settles that face: our
        // own flood coming back, a "stop waiting" answer, or another node's
        // flood that will in turn take ours as its loop signal.
        if !fire_and_forget && self.sent_faces.contains(face) {
            if !self.can_resolve_after(face) {
                self.defer(face, "parent link busy");
                return Ok(());
            }
            self.consume(face);
            self.sent_faces.remove(face);
            self.metrics.loops_detected = self.metrics.loops_detected.wrapping_add(1);
            emit_debug!(self, DebugEvent::LoopDetected { face, id });
            self.handlers.receive_message(id, face, None, true);

            if self.sent_faces.is_empty() {
                self.resolve(message, false)?;
            }
            return Ok(());
        }

        // Messages always carry at least one payload byte, so a bare header
        // is a "stop waiting" answer we no longer need. Never answer it.
        if header_only {
            self.consume(face);
            self.metrics.stale_signals = self.metrics.stale_signals.wrapping_add(1);
            emit_debug!(self, DebugEvent::StaleStopWaiting { face, id });
            self.handlers.receive_message(id, face, None, true);
            return Ok(());
        }

        if self.is_tracked(header) {
            if fire_and_forget {
                self.consume(face);
                emit_debug!(self, DebugEvent::DuplicateFireAndForget { face, id });
                self.handlers.receive_message(id, face, None, true);
                return Ok(());
            }

            // Already resolved here; tell the sender to stop waiting on us.
            if self.faces.pending_send(face) {
                self.defer(face, "late propagation link busy");
                return Ok(());
            }
            self.consume(face);
            self.metrics.late_propagations = self.metrics.late_propagations.wrapping_add(1);
            emit_debug!(self, DebugEvent::LatePropagation { face, id });
            let stop_waiting = Message::<Cfg::Layout>::from_header(header).encode(0);
            return self.transmit(face, &stop_waiting);
        }

        if !fire_and_forget && self.busy() {
            self.defer(face, "flood in progress");
            return Ok(());
        }

        // A reply-bearing message may end up answered right here (leaf or
        // consumed), so the arrival face must be free as well.
        let targets = self.broadcast_targets(Some(face));
        if targets.iter().any(|dst| self.faces.pending_send(dst))
            || (!fire_and_forget && self.faces.pending_send(face))
        {
            self.defer(face, "forward link busy");
            return Ok(());
        }

        self.consume(face);
        if fire_and_forget && id == RESET_MESSAGE_ID {
            self.reset_state(Some(face));
        }
        self.track(header);

        if self
            .handlers
            .consume_message(id, face, &message.payload()[..Cfg::PAYLOAD_BYTES])
        {
            emit_debug!(self, DebugEvent::MessageConsumed { face, id });
            if !fire_and_forget {
                self.parent = Parent::Face(face);
                self.flood = Some(header);
                self.resolve(message, false)?;
            }
            return Ok(());
        }

        if !fire_and_forget {
            self.parent = Parent::Face(face);
            self.flood = Some(header);
        }

        emit_debug!(
            self,
            DebugEvent::MessageAccepted {
                face,
                id,
                sequence: header.sequence(),
                fire_and_forget,
            }
        );

        self.handlers.receive_message(
            id,
            face,
            Some(&mut message.payload_mut()[..Cfg::PAYLOAD_BYTES]),
            false,
        );
        self.broadcast(&message, Some(face), targets)?;
        self.handlers.propagated(id, targets);

        if !fire_and_forget && targets.is_empty() {
            self.resolve(message, false)?;
        }
        Ok(())
    }

    /// Faces a flood is forwarded to: every face except the arrival face,
    /// minus expired faces when the configuration skips them.
    pub(crate) fn broadcast_targets(&self, arrival: Option<Face>) -> FaceSet {
        (0..Cfg::FACE_COUNT as Face)
            .filter(|&face| Some(face) != arrival)
            .filter(|&face| !(Cfg::SKIP_EXPIRED_FACES && self.faces.is_expired(face)))
            .collect()
    }

    /// Send a per-destination copy of `message` to every face in `targets`.
    ///
    /// Callers check beforehand that no target has a pending send.
    pub(crate) fn broadcast(
        &mut self,
        message: &Message<Cfg::Layout>,
        src: Option<Face>,
        targets: FaceSet,
    ) -> Result<(), Error> {
        let fire_and_forget = message.header().is_fire_and_forget();

        for dst in targets.iter() {
            let mut copy = *message;
            let len = self
                .handlers
                .forward_message(
                    copy.id(),
                    src,
                    dst,
                    &mut copy.payload_mut()[..Cfg::PAYLOAD_BYTES],
                )
                .clamp(1, Cfg::PAYLOAD_BYTES);

            emit_debug!(
                self,
                DebugEvent::Forwarded {
                    id: copy.id(),
                    dst,
                    len,
                }
            );
            self.transmit(dst, &copy.encode(len))?;

            if !fire_and_forget {
                self.sent_faces.insert(dst);
            }
        }
        Ok(())
    }

    /// Every awaited reply is in: send the aggregate to the parent, or
    /// surface it locally at the originator.
    ///
    /// `basis` is the frame that completed the aggregation. Its payload is
    /// kept only if it is a reply and no forward-reply handler supplies one.
    pub(crate) fn resolve(
        &mut self,
        basis: Message<Cfg::Layout>,
        from_reply: bool,
    ) -> Result<(), Error> {
        let parent = core::mem::take(&mut self.parent);

        let mut reply = basis;
        // The frame that settled the last face may belong to another flood.
        if let Some(header) = self.flood.take() {
            *reply.header_mut() = header;
        }
        reply.header_mut().set_reply(true);

        let mut aggregate = reply;
        aggregate.clear_payload();
        let len = match self.handlers.forward_reply(
            reply.id(),
            parent.face(),
            &mut aggregate.payload_mut()[..Cfg::PAYLOAD_BYTES],
        ) {
            Some(len) => {
                reply = aggregate;
                len.min(Cfg::PAYLOAD_BYTES)
            }
            None => {
                if !from_reply {
                    reply.clear_payload();
                }
                Cfg::PAYLOAD_BYTES
            }
        };

        emit_debug!(
            self,
            DebugEvent::Resolved {
                id: reply.id(),
                parent,
            }
        );

        match parent {
            Parent::Face(face) => self.transmit(face, &reply.encode(len)),
            Parent::Origin => {
                self.result = Some(reply);
                Ok(())
            }
            Parent::Idle => Ok(()),
        }
    }

    /// Whether acting on a frame from `face` can go ahead now: either other
    /// faces are still awaited, or the resulting reply can be sent to the
    /// parent without hitting a pending send.
    fn can_resolve_after(&self, face: Face) -> bool {
        let mut remaining = self.sent_faces;
        remaining.remove(face);
        if !remaining.is_empty() {
            return true;
        }
        match self.parent {
            Parent::Face(parent) => !self.faces.pending_send(parent),
            Parent::Origin | Parent::Idle => true,
        }
    }

    fn transmit(&mut self, face: Face, datagram: &Datagram) -> Result<(), Error> {
        if !self.faces.send(face, datagram.as_slice()) {
            return Err(Error::SendFailed { face });
        }
        self.metrics.frames_sent = self.metrics.frames_sent.wrapping_add(1);
        Ok(())
    }

    fn consume(&mut self, face: Face) {
        self.faces.mark_consumed(face);
        self.metrics.frames_received = self.metrics.frames_received.wrapping_add(1);
    }

    #[cfg_attr(not(any(test, feature = "debug")), allow(unused_variables))]
    fn defer(&mut self, face: Face, reason: &'static str) {
        self.metrics.deferred = self.metrics.deferred.wrapping_add(1);
        emit_debug!(self, DebugEvent::Deferred { face, reason });
    }
}

#[cfg(test)]
mod tests {
    use alloc::boxed::Box;
    use alloc::vec;
    use alloc::vec::Vec;

    use super::*;
    use crate::config::{DefaultConfig, FireAndForgetConfig};
    use crate::debug::{ChannelEmitter, DebugChannel};
    use crate::traits::test_impls::{HandlerCall, MockFaces, MockRandom, RecordingHandlers};
    use crate::traits::{NoHandlers, TrackKey};
    use crate::wire::{FireAndForgetLayout, Header, ReplyLayout};

    type TestManager = Manager<MockFaces, RecordingHandlers, DefaultConfig>;
    type TestMessage = Message<ReplyLayout>;

    fn manager_with(neighbors: &[Face]) -> TestManager {
        Manager::new(MockFaces::with_neighbors(neighbors), &mut MockRandom::new())
    }

    /// A message as it would arrive from a neighbor.
    fn incoming(id: u8, sequence: u8, fire_and_forget: bool, payload: &[u8]) -> TestMessage {
        let mut message = TestMessage::with_payload(id, fire_and_forget, payload);
        message.header_mut().set_sequence(sequence);
        message
    }

    fn as_reply(mut message: TestMessage) -> TestMessage {
        message.header_mut().set_reply(true);
        message
    }

    fn deliver(manager: &TestManager, face: Face, message: &TestMessage) {
        assert!(manager.faces().inject_rx(face, message.encode(15).as_slice()));
    }

    fn decode_sent(manager: &TestManager, face: Face) -> Option<TestMessage> {
        manager
            .faces()
            .take_sent(face)
            .map(|d| TestMessage::decode(d.as_slice(), 15).unwrap())
    }

    fn trace(manager: &mut TestManager) -> &'static DebugChannel {
        let channel: &'static DebugChannel = Box::leak(Box::new(DebugChannel::new()));
        manager.set_debug_emitter(Box::new(ChannelEmitter::new(channel)));
        channel
    }

    fn drain_events(channel: &DebugChannel) -> Vec<DebugEvent> {
        let mut events = Vec::new();
        while let Ok(event) = channel.try_receive() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_relay_forwards_and_records_parent() {
        let mut manager = manager_with(&[0, 3]);
        deliver(&manager, 0, &incoming(5, 2, false, &[9]));

        manager.process().unwrap();

        assert!(!manager.faces().has_inbound(0));
        assert_eq!(manager.parent(), Parent::Face(0));
        assert_eq!(manager.sent_faces(), FaceSet::from_bits(0b1000));

        let forwarded = decode_sent(&manager, 3).unwrap();
        assert_eq!(forwarded.id(), 5);
        assert_eq!(forwarded.header().sequence(), 2);
        assert_eq!(forwarded.payload()[0], 9);
        // Never echoed back to the parent.
        assert!(manager.faces().take_sent(0).is_none());

        assert_eq!(
            manager.handlers().calls[0],
            HandlerCall::ReceiveMessage {
                id: 5,
                src: 0,
                payload: Some({
                    let mut p = vec![0u8; 15];
                    p[0] = 9;
                    p
                }),
                is_loop: false,
            }
        );
    }

    #[test]
    fn test_leaf_replies_immediately() {
        let mut manager = manager_with(&[2]);
        deliver(&manager, 2, &incoming(5, 1, false, &[1, 2, 3]));

        manager.process().unwrap();

        let reply = decode_sent(&manager, 2).unwrap();
        assert!(reply.header().is_reply());
        assert_eq!(reply.id(), 5);
        assert_eq!(reply.header().sequence(), 1);
        // No forward-reply aggregate: a leaf answers with a cleared payload.
        assert_eq!(reply.payload(), &[0u8; 15]);
        assert_eq!(manager.parent(), Parent::Idle);
        assert!(!manager.processing());
    }

    #[test]
    fn test_reply_resolves_to_parent() {
        let mut manager = manager_with(&[0, 3]);
        let message = incoming(5, 2, false, &[]);
        deliver(&manager, 0, &message);
        manager.process().unwrap();
        manager.faces().take_sent(3);

        let mut reply = as_reply(message);
        reply.payload_mut()[0] = 4;
        deliver(&manager, 3, &reply);
        manager.process().unwrap();

        // Reply payload passes through unchanged without a handler aggregate.
        let upstream = decode_sent(&manager, 0).unwrap();
        assert!(upstream.header().is_reply());
        assert_eq!(upstream.payload()[0], 4);
        assert!(!manager.processing());
        assert_eq!(manager.parent(), Parent::Idle);
        assert!(manager.handlers().calls.contains(&HandlerCall::ReceiveReply {
            id: 5,
            src: 3,
            payload: {
                let mut p = vec![0u8; 15];
                p[0] = 4;
                p
            },
        }));
    }

    #[test]
    fn test_waits_for_every_reply() {
        let mut manager = manager_with(&[0, 1, 2]);
        let message = incoming(3, 4, false, &[]);
        deliver(&manager, 0, &message);
        manager.process().unwrap();
        manager.faces().take_all_sent();

        deliver(&manager, 1, &as_reply(message));
        manager.process().unwrap();
        assert_eq!(manager.sent_faces(), FaceSet::from_bits(0b100));
        assert!(manager.faces().take_sent(0).is_none());

        deliver(&manager, 2, &as_reply(message));
        manager.process().unwrap();
        assert!(manager.sent_faces().is_empty());
        assert!(decode_sent(&manager, 0).unwrap().header().is_reply());
    }

    #[test]
    fn test_forward_reply_handler_supplies_aggregate() {
        let mut manager = manager_with(&[0, 1]);
        manager.handlers_mut().reply = Some(vec![0xAA, 0xBB]);
        let message = incoming(2, 0, false, &[]);
        deliver(&manager, 0, &message);
        manager.process().unwrap();
        manager.faces().take_sent(1);

        let mut reply = as_reply(message);
        reply.payload_mut()[0] = 1;
        deliver(&manager, 1, &reply);
        manager.process().unwrap();

        let datagram = manager.faces().take_sent(0).unwrap();
        // Header plus the two aggregate bytes.
        assert_eq!(datagram.len(), 3);
        assert_eq!(&datagram.as_slice()[1..], &[0xAA, 0xBB]);
        assert!(manager
            .handlers()
            .calls
            .contains(&HandlerCall::ForwardReply { id: 2, dst: Some(0) }));
    }

    #[test]
    fn test_forward_handler_transforms_per_destination() {
        let mut manager = manager_with(&[0, 1, 2]);
        manager.handlers_mut().stamp_destination = true;
        deliver(&manager, 0, &incoming(1, 0, false, &[7]));
        manager.process().unwrap();

        assert_eq!(decode_sent(&manager, 1).unwrap().payload()[0], 1);
        assert_eq!(decode_sent(&manager, 2).unwrap().payload()[0], 2);
        let forwards: Vec<_> = manager
            .handlers()
            .calls
            .iter()
            .filter(|c| matches!(c, HandlerCall::ForwardMessage { src: Some(0), .. }))
            .collect();
        assert_eq!(forwards.len(), 2);
    }

    #[test]
    fn test_loop_clears_face_and_resolves() {
        let mut manager = manager_with(&[0, 1, 2]);
        let events = trace(&mut manager);
        let message = incoming(5, 3, false, &[]);
        deliver(&manager, 0, &message);
        manager.process().unwrap();
        manager.faces().take_all_sent();

        // The same flood comes back on a face we forwarded to.
        deliver(&manager, 1, &message);
        manager.process().unwrap();
        assert_eq!(manager.sent_faces(), FaceSet::from_bits(0b100));
        assert_eq!(manager.metrics().loops_detected, 1);
        assert_eq!(manager.handlers().loop_count(), 1);

        deliver(&manager, 2, &as_reply(message));
        manager.process().unwrap();
        assert!(decode_sent(&manager, 0).unwrap().header().is_reply());
        assert!(drain_events(events).contains(&DebugEvent::LoopDetected { face: 1, id: 5 }));
    }

    #[test]
    fn test_late_propagation_answers_with_bare_header() {
        let mut manager = manager_with(&[0]);
        let message = incoming(5, 6, false, &[1, 2]);
        deliver(&manager, 0, &message);
        manager.process().unwrap();
        manager.faces().take_sent(0);

        // Resolved already; a duplicate arrives on another face.
        deliver(&manager, 4, &message);
        manager.process().unwrap();

        let datagram = manager.faces().take_sent(4).unwrap();
        assert_eq!(datagram.as_slice(), &[message.header().as_byte()]);
        assert_eq!(manager.metrics().late_propagations, 1);
        assert!(!manager.processing());
        // Not re-delivered to the application.
        assert_eq!(manager.handlers().loop_count(), 0);
    }

    #[test]
    fn test_stop_waiting_signal_acts_as_loop() {
        let mut manager = manager_with(&[1]);
        manager.send(TestMessage::new(4, false)).unwrap();
        let sent = manager.faces().take_sent(1).unwrap();

        // The neighbor already resolved this flood and answers with the header only.
        assert!(manager.faces().inject_rx(1, &sent.as_slice()[..1]));
        manager.process().unwrap();

        assert!(!manager.processing());
        assert_eq!(manager.metrics().loops_detected, 1);
        let result = manager.receive().unwrap();
        assert!(result.header().is_reply());
        assert_eq!(result.id(), 4);
    }

    #[test]
    fn test_duplicate_fire_and_forget_notifies_handler() {
        let mut manager = manager_with(&[0, 1]);
        let events = trace(&mut manager);
        let message = incoming(6, 1, true, &[3]);
        deliver(&manager, 0, &message);
        manager.process().unwrap();
        assert_eq!(manager.faces().take_all_sent().len(), 1);
        assert!(!manager.processing());

        deliver(&manager, 1, &message);
        manager.process().unwrap();

        assert!(manager.faces().take_all_sent().is_empty());
        assert_eq!(manager.handlers().loop_count(), 1);
        assert!(drain_events(events)
            .contains(&DebugEvent::DuplicateFireAndForget { face: 1, id: 6 }));
    }

    #[test]
    fn test_reset_message_clears_flood_state() {
        let mut manager = manager_with(&[0, 1]);
        deliver(&manager, 0, &incoming(2, 1, false, &[]));
        manager.process().unwrap();
        manager.faces().take_all_sent();
        assert!(manager.processing());

        deliver(&manager, 1, &incoming(RESET_MESSAGE_ID, 2, true, &[]));
        manager.process().unwrap();

        assert!(!manager.processing());
        assert_eq!(manager.parent(), Parent::Idle);
        // The reset keeps propagating.
        assert!(decode_sent(&manager, 0).unwrap().header().is_fire_and_forget());
    }

    #[test]
    fn test_defers_when_forward_face_busy() {
        let mut manager = manager_with(&[0, 1]);
        // Outbound slot on face 1 still occupied.
        assert!(manager.faces().send(1, &[0xFF]));

        deliver(&manager, 0, &incoming(5, 1, false, &[]));
        manager.process().unwrap();

        assert!(manager.faces().has_inbound(0));
        assert_eq!(manager.parent(), Parent::Idle);
        assert_eq!(manager.metrics().deferred, 1);

        manager.faces().take_sent(1);
        manager.process().unwrap();
        assert!(!manager.faces().has_inbound(0));
        assert_eq!(manager.parent(), Parent::Face(0));
        assert!(decode_sent(&manager, 1).is_some());
    }

    #[test]
    fn test_leaf_defers_when_parent_face_busy() {
        let mut manager = manager_with(&[2]);
        assert!(manager.faces().send(2, &[0xFF]));
        deliver(&manager, 2, &incoming(5, 1, false, &[]));

        manager.process().unwrap();
        assert!(manager.faces().has_inbound(2));
        assert!(!manager.tracker().tracked(incoming(5, 1, false, &[]).header()));

        manager.faces().take_sent(2);
        manager.process().unwrap();
        assert!(decode_sent(&manager, 2).unwrap().header().is_reply());
    }

    #[test]
    fn test_reply_defers_when_parent_face_busy() {
        let mut manager = manager_with(&[0, 1]);
        let message = incoming(5, 1, false, &[]);
        deliver(&manager, 0, &message);
        manager.process().unwrap();
        manager.faces().take_sent(1);

        assert!(manager.faces().send(0, &[0xFF]));
        deliver(&manager, 1, &as_reply(message));
        manager.process().unwrap();
        assert!(manager.faces().has_inbound(1));
        assert!(manager.processing());

        manager.faces().take_sent(0);
        manager.process().unwrap();
        assert!(!manager.processing());
        assert!(decode_sent(&manager, 0).unwrap().header().is_reply());
    }

    #[test]
    fn test_new_flood_deferred_while_busy() {
        let mut manager = manager_with(&[0, 1, 2]);
        let events = trace(&mut manager);
        let first = incoming(1, 1, false, &[]);
        deliver(&manager, 0, &first);
        manager.process().unwrap();
        manager.faces().take_all_sent();

        // A second flood from the parent waits until the first resolves.
        deliver(&manager, 0, &incoming(2, 5, false, &[]));
        manager.process().unwrap();
        assert!(manager.faces().has_inbound(0));
        assert_eq!(manager.parent(), Parent::Face(0));

        // Fire-and-forget traffic still flows.
        deliver(&manager, 2, &incoming(3, 6, true, &[]));
        manager.process().unwrap();
        assert!(!manager.faces().has_inbound(2));

        assert!(drain_events(events).iter().any(|e| matches!(
            e,
            DebugEvent::Deferred {
                face: 0,
                reason: "flood in progress"
            }
        )));
    }

    #[test]
    fn test_unexpected_reply_is_consumed_and_reported() {
        let mut manager = manager_with(&[0, 1]);
        deliver(&manager, 1, &as_reply(incoming(5, 1, false, &[])));

        assert_eq!(manager.process(), Err(Error::UnexpectedReply { face: 1 }));
        assert!(!manager.faces().has_inbound(1));
    }

    #[test]
    fn test_process_visits_every_face_after_error() {
        let mut manager = manager_with(&[0, 1, 2]);
        deliver(&manager, 0, &as_reply(incoming(5, 1, false, &[])));
        deliver(&manager, 2, &incoming(6, 1, true, &[]));

        assert_eq!(manager.process(), Err(Error::UnexpectedReply { face: 0 }));
        assert!(!manager.faces().has_inbound(2));
        assert_eq!(manager.metrics().frames_received, 2);
    }

    #[test]
    fn test_malformed_frame_dropped() {
        let mut manager = manager_with(&[0]);
        let events = trace(&mut manager);
        assert!(manager.faces().inject_rx(0, &[]));
        manager.process().unwrap();

        assert!(!manager.faces().has_inbound(0));
        assert_eq!(manager.metrics().malformed, 1);
        assert!(drain_events(events).contains(&DebugEvent::FrameMalformed { face: 0, len: 0 }));
    }

    #[test]
    fn test_oversized_frame_for_config_dropped() {
        struct TinyPayload;
        impl BroadcastConfig for TinyPayload {
            type Layout = ReplyLayout;
            const FACE_COUNT: usize = 2;
            const PAYLOAD_BYTES: usize = 2;
            const TRACKER_CAPACITY: usize = 3;
            const SKIP_EXPIRED_FACES: bool = false;
        }

        let mut manager: Manager<MockFaces, NoHandlers, TinyPayload> =
            Manager::new(MockFaces::new(), &mut MockRandom::new());
        assert!(manager.faces().inject_rx(0, &[0x01, 1, 2, 3]));
        manager.process().unwrap();
        assert_eq!(manager.metrics().malformed, 1);

        // Fits: forwarded on face 1 with the configured payload size.
        assert!(manager.faces().inject_rx(0, &[0x01, 1, 2]));
        manager.process().unwrap();
        assert_eq!(manager.faces().take_sent(1).unwrap().as_slice(), &[0x01, 1, 2]);
    }

    #[test]
    fn test_result_valid_for_one_tick() {
        let mut manager = manager_with(&[1]);
        manager.send(TestMessage::new(3, false)).unwrap();
        let sent = manager.faces().take_sent(1).unwrap();
        let forwarded = TestMessage::decode(sent.as_slice(), 15).unwrap();

        deliver(&manager, 1, &as_reply(forwarded));
        manager.process().unwrap();
        assert_eq!(manager.parent(), Parent::Idle);

        manager.process().unwrap();
        assert!(manager.receive().is_none());
    }

    #[test]
    fn test_expired_faces_flooded_when_not_skipped() {
        struct KeepExpired;
        impl BroadcastConfig for KeepExpired {
            type Layout = ReplyLayout;
            const FACE_COUNT: usize = 3;
            const PAYLOAD_BYTES: usize = 15;
            const TRACKER_CAPACITY: usize = 4;
            const SKIP_EXPIRED_FACES: bool = false;
        }

        let mut manager: Manager<MockFaces, NoHandlers, KeepExpired> =
            Manager::new(MockFaces::with_neighbors(&[0]), &mut MockRandom::new());
        let message = incoming(1, 1, false, &[]);
        assert!(manager.faces().inject_rx(0, message.encode(15).as_slice()));
        manager.process().unwrap();

        assert_eq!(manager.sent_faces(), FaceSet::from_bits(0b110));
    }

    #[test]
    fn test_fire_and_forget_config_floods_without_state() {
        let mut manager: Manager<MockFaces, NoHandlers, FireAndForgetConfig> =
            Manager::new(MockFaces::with_neighbors(&[0, 1, 2]), &mut MockRandom::new());

        let mut header = Header::<FireAndForgetLayout>::default();
        header.set_id(9);
        header.set_sequence(12);
        assert!(manager.faces().inject_rx(0, &[header.as_byte(), 5]));
        manager.process().unwrap();

        assert!(!manager.processing());
        assert_eq!(manager.parent(), Parent::Idle);
        assert_eq!(manager.faces().take_sent(1).unwrap().as_slice()[0], header.as_byte());
        assert!(manager.faces().take_sent(2).is_some());
        assert_eq!(manager.tracker().next_sequence(), 13);

        // Seen before: dropped.
        assert!(manager.faces().inject_rx(1, &[header.as_byte(), 5]));
        manager.process().unwrap();
        assert!(manager.faces().take_all_sent().is_empty());
    }

    #[test]
    fn test_tracking_neighbor_advances_sequence() {
        let mut manager = manager_with(&[0]);
        deliver(&manager, 0, &incoming(1, 4, true, &[]));
        manager.process().unwrap();
        assert_eq!(manager.tracker().next_sequence(), 5);
    }
    #[test]
    fn test_other_flood_on_awaited_face_settles_it() {
        // Both ends of a link originate at once: each flood arrives on the
        // face the other end is awaiting.
        let mut manager = manager_with(&[1]);
        manager.send(TestMessage::new(1, false)).unwrap();
        manager.faces().take_sent(1);

        deliver(&manager, 1, &incoming(2, 5, false, &[8]));
        manager.process().unwrap();

        assert!(!manager.faces().has_inbound(1));
        assert!(!manager.processing());
        assert_eq!(manager.metrics().loops_detected, 1);
        // The result belongs to our own flood.
        let result = manager.receive().unwrap();
        assert_eq!(result.id(), 1);
        assert!(result.header().is_reply());
    }

    #[test]
    fn test_relay_reply_keeps_own_flood_header() {
        let mut manager = manager_with(&[0, 3]);
        let own = incoming(5, 2, false, &[]);
        deliver(&manager, 0, &own);
        manager.process().unwrap();
        manager.faces().take_sent(3);

        // Another flood cuts in on the awaited face.
        deliver(&manager, 3, &incoming(6, 4, false, &[]));
        manager.process().unwrap();

        let upstream = decode_sent(&manager, 0).unwrap();
        assert!(upstream.header().is_reply());
        assert_eq!(upstream.id(), 5);
        assert_eq!(upstream.header().sequence(), 2);
    }

    #[test]
    fn test_stale_stop_waiting_not_answered() {
        let mut manager = manager_with(&[0]);
        let events = trace(&mut manager);
        let message = incoming(5, 6, false, &[1]);
        deliver(&manager, 0, &message);
        manager.process().unwrap();
        manager.faces().take_sent(0);

        // Header-only frame for a flood that already resolved here.
        assert!(manager.faces().inject_rx(0, &[message.header().as_byte()]));
        manager.process().unwrap();

        assert!(!manager.faces().has_inbound(0));
        assert!(manager.faces().take_sent(0).is_none());
        assert_eq!(manager.metrics().late_propagations, 0);
        assert_eq!(manager.metrics().stale_signals, 1);
        assert_eq!(manager.handlers().loop_count(), 1);
        assert!(drain_events(events).contains(&DebugEvent::StaleStopWaiting { face: 0, id: 5 }));
    }

    #[test]
    fn test_empty_forward_still_carries_payload_byte() {
        struct Truncate;
        impl Handlers for Truncate {
            fn forward_message(
                &mut self,
                _id: u8,
                _src: Option<Face>,
                _dst: Face,
                _payload: &mut [u8],
            ) -> usize {
                0
            }
        }

        let mut manager: Manager<MockFaces, Truncate, DefaultConfig> = Manager::with_handlers(
            MockFaces::with_neighbors(&[2]),
            Truncate,
            &mut MockRandom::new(),
        );
        manager.send(TestMessage::new(3, true)).unwrap();
        assert_eq!(manager.faces().take_sent(2).unwrap().len(), 2);
    }

    #[test]
    fn test_consumed_message_not_flooded() {
        let mut manager = manager_with(&[0, 1, 2]);
        let events = trace(&mut manager);
        manager.handlers_mut().consume_ids.push(4);
        deliver(&manager, 0, &incoming(4, 1, false, &[7]));
        manager.process().unwrap();

        // Answered at once, nothing forwarded.
        let reply = decode_sent(&manager, 0).unwrap();
        assert!(reply.header().is_reply());
        assert!(manager.faces().take_sent(1).is_none());
        assert!(manager.faces().take_sent(2).is_none());
        assert!(!manager.processing());
        assert_eq!(manager.parent(), Parent::Idle);

        let handlers = manager.handlers();
        assert_eq!(handlers.consumed.len(), 1);
        assert_eq!(handlers.consumed[0].1[0], 7);
        assert!(!handlers
            .calls
            .iter()
            .any(|c| matches!(c, HandlerCall::ReceiveMessage { .. })));
        assert!(drain_events(events).contains(&DebugEvent::MessageConsumed { face: 0, id: 4 }));

        // Still tracked: a duplicate gets the late-propagation answer.
        deliver(&manager, 1, &incoming(4, 1, false, &[7]));
        manager.process().unwrap();
        assert_eq!(manager.faces().take_sent(1).unwrap().len(), 1);
    }

    #[test]
    fn test_consumed_fire_and_forget_stops_here() {
        let mut manager = manager_with(&[0, 1]);
        manager.handlers_mut().consume_ids.push(6);
        deliver(&manager, 0, &incoming(6, 2, true, &[]));
        manager.process().unwrap();

        assert!(manager.faces().take_all_sent().is_empty());
        assert_eq!(manager.handlers().consumed.len(), 1);
    }

    #[test]
    fn test_propagated_after_forwarding() {
        let mut manager = manager_with(&[0, 1, 2]);
        deliver(&manager, 0, &incoming(3, 1, false, &[]));
        manager.process().unwrap();

        let calls = &manager.handlers().calls;
        assert_eq!(
            calls.last(),
            Some(&HandlerCall::Propagated {
                id: 3,
                targets: FaceSet::from_bits(0b110),
            })
        );
    }

    #[test]
    fn test_handler_tracked_ids_bypass_ring() {
        let mut manager = manager_with(&[0, 1]);
        manager.handlers_mut().external_ids.push(2);
        let message = incoming(2, 3, true, &[]);
        deliver(&manager, 0, &message);
        manager.process().unwrap();
        manager.faces().take_all_sent();

        assert!(manager.tracker().is_empty());
        assert_eq!(manager.tracker().next_sequence(), 4);
        assert_eq!(
            manager.handlers().tracked_keys,
            vec![TrackKey {
                id: 2,
                sequence: 3,
                fire_and_forget: true,
            }]
        );

        // The handler recognizes the duplicate.
        deliver(&manager, 1, &message);
        manager.process().unwrap();
        assert!(manager.faces().take_all_sent().is_empty());
        assert_eq!(manager.handlers().loop_count(), 1);
    }

    #[test]
    fn test_counters_wrap_instead_of_overflowing() {
        let mut manager = manager_with(&[0]);
        manager.metrics.deferred = u32::MAX;
        assert!(manager.faces().send(0, &[0xFF]));
        deliver(&manager, 0, &incoming(5, 1, false, &[]));

        manager.process().unwrap();
        assert_eq!(manager.metrics().deferred, 0);
    }
}
