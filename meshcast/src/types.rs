//! Core types and constants for the meshcast protocol.

use core::fmt;

/// Maximum number of faces a node can have (one bit per face in [`FaceSet`]).
pub const MAX_FACES: usize = 8;

/// Largest datagram the link layer can carry, header included.
pub const MAX_DATAGRAM_LEN: usize = 16;

/// Header size in bytes. Fixed for every layout.
pub const HEADER_BYTES: usize = 1;

/// Largest payload that fits next to the header in one datagram.
pub const MAX_PAYLOAD_BYTES: usize = MAX_DATAGRAM_LEN - HEADER_BYTES;

/// Message id reserved for fire-and-forget reset messages.
pub const RESET_MESSAGE_ID: u8 = 0;

/// Index of a physical link endpoint on this node.
pub type Face = u8;

/// Set of faces, one bit per face.
///
/// Used for the set of faces a node forwarded the current message to and is
/// still awaiting a reply from.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FaceSet(u8);

impl FaceSet {
    /// The empty set.
    pub const EMPTY: FaceSet = FaceSet(0);

    /// Create a set from its raw bitmask.
    pub const fn from_bits(bits: u8) -> Self {
        FaceSet(bits)
    }

    /// Raw bitmask.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Add a face. Faces outside `0..MAX_FACES` are ignored.
    pub fn insert(&mut self, face: Face) {
        if (face as usize) < MAX_FACES {
            self.0 |= 1 << face;
        }
    }

    /// Remove a face. Returns true if it was present.
    pub fn remove(&mut self, face: Face) -> bool {
        let present = self.contains(face);
        if present {
            self.0 &= !(1 << face);
        }
        present
    }

    /// Check membership.
    pub const fn contains(self, face: Face) -> bool {
        (face as usize) < MAX_FACES && self.0 & (1 << face) != 0
    }

    /// Returns true if no face is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of faces in the set.
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterate over member faces in ascending order.
    pub fn iter(self) -> impl Iterator<Item = Face> {
        (0..MAX_FACES as Face).filter(move |&f| self.contains(f))
    }
}

impl fmt::Debug for FaceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<Face> for FaceSet {
    fn from_iter<I: IntoIterator<Item = Face>>(iter: I) -> Self {
        let mut set = FaceSet::EMPTY;
        for face in iter {
            set.insert(face);
        }
        set
    }
}

/// Where the reply for the in-flight message has to go.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Parent {
    /// No reply-bearing message in flight.
    #[default]
    Idle,
    /// This node originated the flood; the aggregate is surfaced locally.
    Origin,
    /// The message first arrived on this face.
    Face(Face),
}

impl Parent {
    /// The parent face, if the message came from a neighbor.
    pub const fn face(self) -> Option<Face> {
        match self {
            Parent::Face(f) => Some(f),
            _ => None,
        }
    }
}

/// Per-node protocol counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Metrics {
    /// Datagrams consumed from the link layer.
    pub frames_received: u32,
    /// Datagrams handed to the link layer.
    pub frames_sent: u32,
    /// Re-deliveries on a face we were awaiting a reply from.
    pub loops_detected: u32,
    /// Duplicate arrivals answered with a header-only "stop waiting" frame.
    pub late_propagations: u32,
    /// Header-only frames dropped because nothing was awaited on their face.
    pub stale_signals: u32,
    /// Inbound datagrams left unconsumed for a later tick.
    pub deferred: u32,
    /// Datagrams dropped because they could not be decoded.
    pub malformed: u32,
}

/// Error type for manager operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// A flood is still awaiting replies; a new reply-bearing message can't start.
    Busy,
    /// A face still has an outbound datagram pending.
    LinkBusy,
    /// The link layer refused a send that was checked to be possible.
    SendFailed { face: Face },
    /// A reply arrived on a face we were not awaiting a reply from.
    UnexpectedReply { face: Face },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Busy => write!(f, "flood still in progress"),
            Error::LinkBusy => write!(f, "outbound datagram pending on a face"),
            Error::SendFailed { face } => write!(f, "send failed on face {}", face),
            Error::UnexpectedReply { face } => write!(f, "unexpected reply on face {}", face),
        }
    }
}
