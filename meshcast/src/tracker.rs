//! Identity tracker: a small ring of recently seen headers.
//!
//! A header that is already in the ring is either a loop (the flood came
//! back around a cycle) or a late duplicate of a flood that already
//! resolved. The ring is never cleared explicitly; the oldest entry is
//! overwritten on insert.
//!
//! The tracker also owns the sequence counter used to stamp new
//! originations. Tracking any header (ours or a neighbor's) advances the
//! counter past that header's sequence, so a fresh origination never
//! reuses the sequence of the flood that was just seen.

use alloc::vec::Vec;

use crate::wire::{Header, HeaderLayout};

/// Fixed-capacity ring of recently seen message headers.
pub struct Tracker<L: HeaderLayout> {
    /// Grows to `capacity` once, then entries are overwritten in place.
    entries: Vec<Header<L>>,
    capacity: usize,
    next_slot: usize,
    last_sequence: u8,
}

impl<L: HeaderLayout> Tracker<L> {
    /// Create a tracker holding up to `capacity` headers.
    ///
    /// `initial_sequence` seeds the counter; it is masked to the layout's
    /// sequence width.
    pub fn new(capacity: usize, initial_sequence: u8) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            next_slot: 0,
            last_sequence: initial_sequence & Header::<L>::MAX_SEQUENCE,
        }
    }

    /// Record a header, evicting the oldest entry when full.
    pub fn track(&mut self, header: Header<L>) {
        self.last_sequence = header.sequence();

        if self.capacity == 0 {
            return;
        }
        if self.entries.len() < self.capacity {
            self.entries.push(header);
        } else {
            self.entries[self.next_slot] = header;
        }
        self.next_slot = (self.next_slot + 1) % self.capacity;
    }

    /// Advance the sequence counter without recording a header, for
    /// messages tracked outside the ring.
    pub fn observe(&mut self, sequence: u8) {
        self.last_sequence = sequence & Header::<L>::MAX_SEQUENCE;
    }

    /// Returns true if a bit-for-bit identical header is in the ring.
    pub fn tracked(&self, header: &Header<L>) -> bool {
        self.entries.iter().any(|h| h == header)
    }

    /// Sequence of the most recently tracked header.
    pub fn last_sequence(&self) -> u8 {
        self.last_sequence
    }

    /// Sequence to stamp on the next origination.
    pub fn next_sequence(&self) -> u8 {
        if self.last_sequence >= Header::<L>::MAX_SEQUENCE {
            0
        } else {
            self.last_sequence + 1
        }
    }

    /// Number of headers currently held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
