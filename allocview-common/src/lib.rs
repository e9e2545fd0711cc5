//! # Shared Wire Protocol (Agent ↔ Collector)
//!
//! Defines the framed binary protocol spoken between the in-process sampling
//! agent and the collector, plus the packet types both sides exchange.
//!
//! ## Framing
//!
//! Every message on the stream is `[u32 LE length][payload]`. The payload is
//! built from little-endian primitives and length-prefixed byte strings (see
//! [`codec`]).
//!
//! ## Messages
//!
//! 1. [`HandshakeMessage`] - sent exactly once, first frame on the stream
//! 2. [`SnapshotPacket`] - one per agent tick, every cumulative profiler bucket
//!
//! ## Key Types
//!
//! - [`Encoder`] / [`Decoder`] - payload primitives
//! - [`Stack`] - fixed-depth, zero-terminated call stack
//! - [`Record`] - one profiler bucket (cumulative counters + stack)
//! - [`WireError`] - decode and framing failures
//!
//! The `tokio` feature adds [`read_frame_async`] for the collector side.

pub mod codec;
pub mod error;
pub mod packet;

pub use codec::{read_frame, Decoder, Encoder};
#[cfg(feature = "tokio")]
pub use codec::read_frame_async;
pub use error::WireError;
pub use packet::{HandshakeMessage, Record, SnapshotPacket, Stack};

// ============================================================================
// Protocol Constants
// ============================================================================

/// Magic string opening the handshake payload.
pub const MAGIC: &str = "alloclog";

/// Environment variable carrying the transport endpoint path.
///
/// Set by the collector before launching the monitored process; read by the
/// agent on activation. The path names either a unix socket (live session) or
/// a plain file (offline capture).
pub const ENDPOINT_ENV: &str = "ALLOCVIEW_SOCK";

/// Maximum number of frames stored per call stack.
///
/// Deeper stacks are truncated by the agent. On the wire a full-depth stack
/// still carries its zero terminator.
pub const MAX_STACK_DEPTH: usize = 32;

/// Upper bound on a single frame payload.
///
/// A length prefix above this is treated as a corrupt stream rather than an
/// allocation request.
pub const MAX_FRAME_LEN: usize = 64 << 20;

/// Size of the frame length prefix.
pub const LENGTH_PREFIX: usize = 4;
