#![forbid(unsafe_code)]
//! meshcast - Flooding broadcast with reply aggregation for face-linked nodes
//!
//! A protocol for modular devices that talk only to their direct neighbors
//! through a handful of physical faces (IR transceivers, board-to-board
//! serial links). A node floods a message to every neighbor; each node
//! forwards it on to everyone except the face it came from, building an
//! implicit spanning tree. Replies flow back up that tree and are
//! aggregated at every hop until the originator holds a single result.
//!
//! This crate is `no_std` but **requires the `alloc` crate** for the
//! identity tracker ring, allocated once at construction.
//!
//! # Key Properties
//!
//! - One-byte header, datagrams of at most 16 bytes
//! - At most one outbound datagram pending per face, never a failed send
//! - Loops and late duplicates are detected with a small ring of seen headers
//! - Fully tick-driven: `process()` never blocks
//! - Fire-and-forget messages flood without any reply path
//!
//! # Example (basic usage)
//!
//! ```
//! use meshcast::{Datagram, FaceIo, Manager, Message, NoHandlers, Random};
//!
//! // A node with no neighbors: every face reports expired.
//! struct Unconnected;
//!
//! impl FaceIo for Unconnected {
//!     fn pending_send(&self, _face: u8) -> bool { false }
//!     fn available(&self, _face: u8) -> Option<Datagram> { None }
//!     fn mark_consumed(&self, _face: u8) {}
//!     fn send(&self, _face: u8, _data: &[u8]) -> bool { true }
//!     fn is_expired(&self, _face: u8) -> bool { true }
//! }
//!
//! struct Counter(u64);
//!
//! impl Random for Counter {
//!     fn gen_range(&mut self, min: u64, max: u64) -> u64 {
//!         self.0 += 1;
//!         min + self.0 % (max - min)
//!     }
//! }
//!
//! let mut manager: Manager<_, NoHandlers> = Manager::new(Unconnected, &mut Counter(0));
//! assert!(!manager.processing());
//!
//! // With nobody to ask, the flood resolves on the spot.
//! manager.send(Message::with_payload(3, false, &[1, 2])).unwrap();
//! let result = manager.receive().unwrap();
//! assert!(result.header().is_reply());
//! assert_eq!(result.id(), 3);
//!
//! // The result only lives until the next tick.
//! manager.process().unwrap();
//! assert!(manager.receive().is_none());
//! ```
//!
//! # Example (integration pattern)
//!
//! ```text
//! use meshcast::{Manager, Handlers, FaceIo, Message};
//!
//! // Implement FaceIo over the face transceivers and Handlers for the app...
//!
//! // let mut manager = Manager::with_handlers(faces, handlers, &mut rng);
//!
//! // Main loop
//! // loop {
//! //     manager.process()?;
//! //     if let Some(result) = manager.receive() { /* ... */ }
//! // }
//! ```
//!
//! # Module Structure
//!
//! - [`types`] - Core types (Face, FaceSet, Parent, Error, Metrics)
//! - [`wire`] - Header layouts, message codec, datagrams
//! - [`tracker`] - Ring of recently seen headers and the sequence counter
//! - [`traits`] - FaceIo, Handlers, Random traits
//! - [`manager`] - Main Manager struct and public API
//! - [`flood`] - Per-tick processing: forwarding, loops, replies
//! - [`debug`] - Protocol trace events
//! - [`config`] - Compile-time deployment configuration

#![no_std]

// Prevent test/debug features from being used in release builds.
#[cfg(all(feature = "test-support", not(test), not(debug_assertions)))]
compile_error!(
    "The `test-support` feature must not be enabled in release builds. \
     It exports mock link layers intended only for tests."
);

#[cfg(all(feature = "debug", not(test), not(debug_assertions)))]
compile_error!(
    "The `debug` feature must not be enabled in release builds. \
     It adds protocol tracing overhead intended only for development and simulation."
);

extern crate alloc;

pub mod config;
#[macro_use]
pub mod debug;
pub mod flood;
pub mod manager;
pub mod tracker;
pub mod traits;
pub mod types;
pub mod wire;

// Re-export main types at crate root
pub use config::{BroadcastConfig, DefaultConfig, FireAndForgetConfig};
pub use manager::Manager;
pub use tracker::Tracker;
pub use traits::{FaceIo, Handlers, NoHandlers, Random, TrackKey};
pub use types::{Error, Face, FaceSet, Metrics, Parent};
pub use wire::{
    Datagram, DecodeError, FireAndForgetLayout, Header, HeaderLayout, Message, ReplyLayout,
};

// Re-export constants
pub use types::{
    HEADER_BYTES, MAX_DATAGRAM_LEN, MAX_FACES, MAX_PAYLOAD_BYTES, RESET_MESSAGE_ID,
};
