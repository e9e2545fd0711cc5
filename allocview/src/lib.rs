//! # allocview - Live Per-Call-Site Allocation Profiler
//!
//! allocview launches a program linked with `allocview-agent`, receives
//! periodic snapshots of its allocation counters over a local socket and
//! shows, per call site, how much memory was allocated and freed in each
//! time window.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Monitored Program                           │
//! │   ProfilingAllocator → per-stack counters → agent thread        │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ handshake, then one snapshot per tick
//!                         ▼  ([u32 len][payload] frames, ALLOCVIEW_SOCK)
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    allocview (This Crate)                       │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │   Session    │──▶│   Pipeline   │──▶│  Collection  │         │
//! │  │ (tokio I/O)  │   │ (deltas)     │   │ (ring series)│         │
//! │  └──────────────┘   └──────────────┘   └──────┬───────┘         │
//! │         │                                     │                 │
//! │         ▼                                     ▼                 │
//! │  ┌──────────────┐              ┌──────────────────────────┐     │
//! │  │ Symbolizer   │─────────────▶│ TUI / headless / export  │     │
//! │  │  (DWARF)     │              └──────────────────────────┘     │
//! │  └──────────────┘                                               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`session`]: socket endpoint, child process, handshake and read loop;
//!   replay of offline capture files
//! - [`pipeline`]: applies snapshots in order; cumulative counters become
//!   per-interval deltas, frames are corrected by the load offset
//! - [`series`]: fixed-length sample rings per call site on a shared time
//!   axis
//! - [`symbolization`]: load-offset correction and DWARF lookups via
//!   `addr2line`, for ELF, Mach-O and PE executables
//! - [`classification`]: picks the frame that names a call site
//! - [`tui`]: live terminal view with `ratatui`
//! - [`export`]: JSON summary of the final collection
//! - [`cli`]: command-line arguments
//! - [`domain`]: error types
//!
//! ## Operational Modes
//!
//! 1. **Live TUI Mode** (default): launch `CMD` and watch it
//! 2. **Headless Mode** (`--headless`): log a summary every sample duration
//! 3. **Replay Mode** (`--replay capture.alloc`): read a file written by an
//!    agent whose `ALLOCVIEW_SOCK` named a plain file
//!
//! ## Typical Usage
//!
//! ```bash
//! allocview -- ./target/debug/my-app --port 8080
//! allocview --headless --interval 500 --export summary.json -- ./my-app
//! ALLOCVIEW_SOCK=/tmp/run.alloc ./my-app && allocview --replay /tmp/run.alloc
//! ```
//!
//! ## Key Concepts
//!
//! - **Snapshot**: every profiler bucket's cumulative counters at one instant
//! - **Fingerprint**: the first three frames of a stack; series are keyed by it
//! - **Anchor symbol**: a function whose runtime address the agent reports,
//!   giving the collector the load offset of the executable
//! - **Interval delta**: counters since the previous snapshot of the same stack

// Expose modules for testing
pub mod classification;
pub mod cli;
pub mod domain;
pub mod export;
pub mod pipeline;
pub mod series;
pub mod session;
pub mod symbolization;
pub mod tui;
