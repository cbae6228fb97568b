//! Wire format: header layouts, the message codec and raw datagrams.
//!
//! Every frame is a one-byte header followed by up to `MAX_PAYLOAD_BYTES`
//! payload bytes. Frames may be shorter than the configured payload (the
//! "stop waiting" signal is a bare header); missing payload bytes decode as
//! zeroes.
//!
//! ## Reply layout
//!
//! ```text
//! bit:  7     6      5 4 3      2 1 0
//!       ff    reply  sequence   id
//! ```
//!
//! ## Fire-and-forget layout
//!
//! ```text
//! bit:  7 6 5 4      3 2 1 0
//!       sequence     id
//! ```
//!
//! Replies are not representable in this layout; every message is
//! fire-and-forget.

use core::fmt;
use core::marker::PhantomData;

use crate::types::{HEADER_BYTES, MAX_DATAGRAM_LEN, MAX_PAYLOAD_BYTES};

/// Decoding error types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Zero-length datagram (no header).
    Empty,
    /// Payload longer than the configured payload size.
    TooLong,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Empty => write!(f, "empty datagram"),
            DecodeError::TooLong => write!(f, "datagram exceeds payload size"),
        }
    }
}

/// Bit layout of the one-byte header, fixed for a deployment.
///
/// `id` occupies the low `ID_BITS` bits, `sequence` the next
/// `SEQUENCE_BITS`. When `SUPPORTS_REPLIES` is set the two remaining high
/// bits are `is_reply` and `is_fire_and_forget`.
pub trait HeaderLayout: Clone + Copy + fmt::Debug + Default + PartialEq + Eq + 'static {
    /// Width of the message id field.
    const ID_BITS: u32;
    /// Width of the sequence field.
    const SEQUENCE_BITS: u32;
    /// Whether replies (and the two flag bits) exist in this layout.
    const SUPPORTS_REPLIES: bool;
}

/// Full layout: 3-bit id, 3-bit sequence, reply and fire-and-forget flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ReplyLayout;

impl HeaderLayout for ReplyLayout {
    const ID_BITS: u32 = 3;
    const SEQUENCE_BITS: u32 = 3;
    const SUPPORTS_REPLIES: bool = true;
}

/// Replies disabled: 4-bit id, 4-bit sequence, everything is fire-and-forget.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FireAndForgetLayout;

impl HeaderLayout for FireAndForgetLayout {
    const ID_BITS: u32 = 4;
    const SEQUENCE_BITS: u32 = 4;
    const SUPPORTS_REPLIES: bool = false;
}

/// Bit-packed message header.
///
/// Holds the encoded byte, so equality is bit-for-bit equality of all
/// fields. Setters mask values to their field width.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header<L: HeaderLayout> {
    raw: u8,
    _layout: PhantomData<L>,
}

impl<L: HeaderLayout> Header<L> {
    const ID_MASK: u8 = ((1u16 << L::ID_BITS) - 1) as u8;
    const SEQUENCE_SHIFT: u32 = L::ID_BITS;
    const SEQUENCE_MASK: u8 = ((1u16 << L::SEQUENCE_BITS) - 1) as u8;
    const REPLY_BIT: u8 = if L::SUPPORTS_REPLIES {
        1 << (L::ID_BITS + L::SEQUENCE_BITS)
    } else {
        0
    };
    const FIRE_AND_FORGET_BIT: u8 = if L::SUPPORTS_REPLIES {
        1 << (L::ID_BITS + L::SEQUENCE_BITS + 1)
    } else {
        0
    };

    /// Largest sequence number representable in this layout.
    pub const MAX_SEQUENCE: u8 = Self::SEQUENCE_MASK;

    /// Largest message id representable in this layout.
    pub const MAX_ID: u8 = Self::ID_MASK;

    /// Decode a header byte. Every byte is a valid header.
    pub const fn from_byte(raw: u8) -> Self {
        Self {
            raw,
            _layout: PhantomData,
        }
    }

    /// Encoded header byte.
    pub const fn as_byte(self) -> u8 {
        self.raw
    }

    /// Application-defined message type.
    pub const fn id(self) -> u8 {
        self.raw & Self::ID_MASK
    }

    pub fn set_id(&mut self, id: u8) {
        self.raw = (self.raw & !Self::ID_MASK) | (id & Self::ID_MASK);
    }

    /// Origination sequence number.
    pub const fn sequence(self) -> u8 {
        (self.raw >> Self::SEQUENCE_SHIFT) & Self::SEQUENCE_MASK
    }

    pub fn set_sequence(&mut self, sequence: u8) {
        let mask = Self::SEQUENCE_MASK << Self::SEQUENCE_SHIFT;
        self.raw = (self.raw & !mask) | ((sequence & Self::SEQUENCE_MASK) << Self::SEQUENCE_SHIFT);
    }

    /// Whether this frame is an aggregated reply flowing toward the originator.
    pub const fn is_reply(self) -> bool {
        self.raw & Self::REPLY_BIT != 0
    }

    /// No-op in layouts without replies.
    pub fn set_reply(&mut self, is_reply: bool) {
        self.set_flag(Self::REPLY_BIT, is_reply);
    }

    /// Whether this message generates no reply.
    pub const fn is_fire_and_forget(self) -> bool {
        !L::SUPPORTS_REPLIES || self.raw & Self::FIRE_AND_FORGET_BIT != 0
    }

    /// No-op in layouts without replies (everything is fire-and-forget).
    pub fn set_fire_and_forget(&mut self, fire_and_forget: bool) {
        self.set_flag(Self::FIRE_AND_FORGET_BIT, fire_and_forget);
    }

    fn set_flag(&mut self, bit: u8, value: bool) {
        if value {
            self.raw |= bit;
        } else {
            self.raw &= !bit;
        }
    }
}

impl<L: HeaderLayout> Default for Header<L> {
    fn default() -> Self {
        Self::from_byte(0)
    }
}

impl<L: HeaderLayout> fmt::Debug for Header<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("id", &self.id())
            .field("sequence", &self.sequence())
            .field("is_reply", &self.is_reply())
            .field("is_fire_and_forget", &self.is_fire_and_forget())
            .finish()
    }
}

/// Raw datagram as exchanged with the link layer.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Datagram {
    bytes: [u8; MAX_DATAGRAM_LEN],
    len: u8,
}

impl Datagram {
    /// Copy a byte slice into a datagram. Returns `None` if it is too long.
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        if data.len() > MAX_DATAGRAM_LEN {
            return None;
        }
        let mut bytes = [0u8; MAX_DATAGRAM_LEN];
        bytes[..data.len()].copy_from_slice(data);
        Some(Self {
            bytes,
            len: data.len() as u8,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for Datagram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Datagram({:02x?})", self.as_slice())
    }
}

/// Fixed-size frame: header plus payload.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Message<L: HeaderLayout> {
    header: Header<L>,
    payload: [u8; MAX_PAYLOAD_BYTES],
}

impl<L: HeaderLayout> Message<L> {
    /// Create a message with a zeroed payload.
    ///
    /// Sequence and reply flag start cleared; the sequence is stamped when
    /// the message is sent.
    pub fn new(id: u8, fire_and_forget: bool) -> Self {
        let mut header = Header::default();
        header.set_id(id);
        header.set_fire_and_forget(fire_and_forget);
        Self {
            header,
            payload: [0u8; MAX_PAYLOAD_BYTES],
        }
    }

    /// Create a message with the given payload (truncated to `MAX_PAYLOAD_BYTES`).
    pub fn with_payload(id: u8, fire_and_forget: bool, payload: &[u8]) -> Self {
        let mut message = Self::new(id, fire_and_forget);
        let len = payload.len().min(MAX_PAYLOAD_BYTES);
        message.payload[..len].copy_from_slice(&payload[..len]);
        message
    }

    /// Message carrying only the given header.
    pub fn from_header(header: Header<L>) -> Self {
        Self {
            header,
            payload: [0u8; MAX_PAYLOAD_BYTES],
        }
    }

    pub fn header(&self) -> &Header<L> {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header<L> {
        &mut self.header
    }

    /// Shortcut for `header().id()`.
    pub fn id(&self) -> u8 {
        self.header.id()
    }

    /// Full payload buffer.
    pub fn payload(&self) -> &[u8; MAX_PAYLOAD_BYTES] {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut [u8; MAX_PAYLOAD_BYTES] {
        &mut self.payload
    }

    pub fn clear_payload(&mut self) {
        self.payload = [0u8; MAX_PAYLOAD_BYTES];
    }

    /// Decode a datagram into an owned message.
    ///
    /// `max_payload` is the deployment's payload size; longer frames are
    /// rejected, shorter ones are zero-filled.
    pub fn decode(data: &[u8], max_payload: usize) -> Result<Self, DecodeError> {
        let (&raw, rest) = data.split_first().ok_or(DecodeError::Empty)?;
        if rest.len() > max_payload.min(MAX_PAYLOAD_BYTES) {
            return Err(DecodeError::TooLong);
        }
        let mut message = Self::from_header(Header::from_byte(raw));
        message.payload[..rest.len()].copy_from_slice(rest);
        Ok(message)
    }

    /// Encode the header and the first `payload_len` payload bytes.
    pub fn encode(&self, payload_len: usize) -> Datagram {
        let len = payload_len.min(MAX_PAYLOAD_BYTES);
        let mut bytes = [0u8; MAX_DATAGRAM_LEN];
        bytes[0] = self.header.as_byte();
        bytes[HEADER_BYTES..HEADER_BYTES + len].copy_from_slice(&self.payload[..len]);
        Datagram {
            bytes,
            len: (HEADER_BYTES + len) as u8,
        }
    }
}

impl<L: HeaderLayout> fmt::Debug for Message<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("header", &self.header)
            .field("payload", &format_args!("{:02x?}", &self.payload))
            .finish()
    }
}
