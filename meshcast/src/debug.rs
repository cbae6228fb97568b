//! Debug events for protocol tracing.
//!
//! Enabled in test builds and with the `debug` feature. The manager hands
//! events to an injected [`DebugEmitter`]; without one they are discarded.

use embassy_sync::channel::Channel;

use crate::traits::ChannelMutex;
use crate::types::{Face, Parent};

/// Trait for receiving debug events from a manager.
/// Implemented by test harnesses to collect/print events.
pub trait DebugEmitter: Send {
    /// Called when a debug event is emitted.
    fn emit(&mut self, event: DebugEvent);
}

/// Events buffered by a [`ChannelEmitter`] before new ones are dropped.
pub const DEBUG_QUEUE_SIZE: usize = 32;

/// Channel a [`ChannelEmitter`] publishes on.
pub type DebugChannel = Channel<ChannelMutex, DebugEvent, DEBUG_QUEUE_SIZE>;

/// Emitter that queues events on a static channel for a harness to drain.
pub struct ChannelEmitter {
    channel: &'static DebugChannel,
}

impl ChannelEmitter {
    pub fn new(channel: &'static DebugChannel) -> Self {
        Self { channel }
    }
}

impl DebugEmitter for ChannelEmitter {
    fn emit(&mut self, event: DebugEvent) {
        // Full channel: the event is dropped.
        let _ = self.channel.try_send(event);
    }
}

/// Emit a debug event through `$self.emit(..)`.
///
/// Compiles to nothing unless testing or the `debug` feature is on, so the
/// event expression is never evaluated in production builds.
macro_rules! emit_debug {
    ($self:expr, $event:expr) => {{
        #[cfg(any(test, feature = "debug"))]
        {
            $self.emit($event);
        }
    }};
}

/// Debug events emitted by the manager for protocol tracing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugEvent {
    /// Inbound datagram could not be decoded and was dropped.
    FrameMalformed { face: Face, len: usize },
    /// New message accepted and about to be flooded.
    MessageAccepted {
        face: Face,
        id: u8,
        sequence: u8,
        fire_and_forget: bool,
    },
    /// This node started a flood.
    Originated { id: u8, sequence: u8, targets: u8 },
    /// Message copy handed to the link layer.
    Forwarded { id: u8, dst: Face, len: usize },
    /// Flood came back on a face we were awaiting, or another flood's
    /// message arrived there.
    LoopDetected { face: Face, id: u8 },
    /// Header-only frame on a face nothing was awaited from; dropped.
    StaleStopWaiting { face: Face, id: u8 },
    /// New message taken by the handlers instead of flooded.
    MessageConsumed { face: Face, id: u8 },
    /// Fire-and-forget message seen again.
    DuplicateFireAndForget { face: Face, id: u8 },
    /// Duplicate of a resolved flood; answered with a bare header.
    LatePropagation { face: Face, id: u8 },
    /// Inbound datagram left in place for a later tick.
    Deferred { face: Face, reason: &'static str },
    /// Reply received; `awaiting` is the number of faces still outstanding.
    ReplyReceived { face: Face, id: u8, awaiting: u8 },
    /// Reply on a face that was not awaited.
    UnexpectedReply { face: Face, id: u8 },
    /// All replies in; aggregate sent toward the parent.
    Resolved { id: u8, parent: Parent },
    /// Reset message cleared the in-flight state.
    StateReset { face: Option<Face> },
}
