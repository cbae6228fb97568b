//! Compile-time configuration for payload size, face count and header layout.
//!
//! The `BroadcastConfig` trait fixes everything that must agree across a
//! deployment: every node on the mesh has to use the same header layout and
//! payload size.
//!
//! # Memory Footprint
//!
//! Protocol state per node is a handful of bytes plus the tracker ring
//! (`TRACKER_CAPACITY` bytes), allocated once at construction.
//!
//! # Example
//!
//! ```
//! use meshcast::config::BroadcastConfig;
//! use meshcast::wire::ReplyLayout;
//!
//! // Four faces, small payloads.
//! struct SquareGrid;
//!
//! impl BroadcastConfig for SquareGrid {
//!     type Layout = ReplyLayout;
//!     const FACE_COUNT: usize = 4;
//!     const PAYLOAD_BYTES: usize = 4;
//!     const TRACKER_CAPACITY: usize = 5;
//!     const SKIP_EXPIRED_FACES: bool = true;
//! }
//! ```

use crate::types::{MAX_FACES, MAX_PAYLOAD_BYTES};
use crate::wire::{FireAndForgetLayout, HeaderLayout, ReplyLayout};

/// Configuration trait for a deployment.
///
/// Bounds are checked when a `Manager` is instantiated with the config:
/// `FACE_COUNT` in `1..=MAX_FACES`, `PAYLOAD_BYTES` in
/// `1..=MAX_PAYLOAD_BYTES`, `TRACKER_CAPACITY` non-zero.
pub trait BroadcastConfig {
    /// Header bit layout.
    type Layout: HeaderLayout;

    /// Number of physical faces.
    const FACE_COUNT: usize;

    /// Payload bytes carried after the header.
    const PAYLOAD_BYTES: usize;

    /// Number of recently seen headers kept for loop detection.
    ///
    /// A node has at most `FACE_COUNT` distinct in-flight forwarding
    /// contexts, so one more than that keeps every live loop inside the
    /// window. Smaller windows make genuinely new messages look like loops.
    const TRACKER_CAPACITY: usize;

    /// Whether faces whose neighbor presence expired are left out of a flood.
    ///
    /// When `false`, expiry is ignored and every face except the arrival face
    /// is flooded; a face with no neighbor then never replies.
    const SKIP_EXPIRED_FACES: bool;
}

/// Default configuration: hexagonal nodes, full-size payload, replies enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConfig;

impl BroadcastConfig for DefaultConfig {
    type Layout = ReplyLayout;
    const FACE_COUNT: usize = 6;
    const PAYLOAD_BYTES: usize = MAX_PAYLOAD_BYTES;
    const TRACKER_CAPACITY: usize = 7;
    const SKIP_EXPIRED_FACES: bool = true;
}

/// Replies disabled: every message is fire-and-forget, with 4-bit ids and
/// sequences.
#[derive(Debug, Clone, Copy, Default)]
pub struct FireAndForgetConfig;

impl BroadcastConfig for FireAndForgetConfig {
    type Layout = FireAndForgetLayout;
    const FACE_COUNT: usize = 6;
    const PAYLOAD_BYTES: usize = MAX_PAYLOAD_BYTES;
    const TRACKER_CAPACITY: usize = 7;
    const SKIP_EXPIRED_FACES: bool = true;
}

/// Returns true if the configuration is within the supported bounds.
pub const fn is_valid<Cfg: BroadcastConfig>() -> bool {
    Cfg::FACE_COUNT > 0
        && Cfg::FACE_COUNT <= MAX_FACES
        && Cfg::PAYLOAD_BYTES > 0
        && Cfg::PAYLOAD_BYTES <= MAX_PAYLOAD_BYTES
        && Cfg::TRACKER_CAPACITY > 0
}
