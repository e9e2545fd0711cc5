//! # Windowed Aggregation
//!
//! Turns per-interval deltas into fixed-length time series, one per call
//! site.
//!
//! ```text
//! sample time t = floor((now - start) / sample_duration)
//! ring slot     = t mod sample_count
//!
//!   slot:   0    1    2    3
//!         [t=4][t=5][t=2][t=3]   head = 5
//! ```
//!
//! When the head advances, every slot it passes over is zeroed before new
//! deltas land in it, so a slot never mixes data from two laps.
//!
//! Call sites are identified by a [`CallSiteFingerprint`] (the first three
//! frames). Distinct stacks sharing those frames are merged; this keeps the
//! row count manageable at the price of occasional over-grouping.

mod collection;
#[allow(clippy::module_inception)]
mod series;
mod sample;

pub use collection::Collection;
pub use sample::{Sample, SampleIndex};
pub use series::{CallSiteFingerprint, Series, FINGERPRINT_DEPTH};

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesError {
    #[error("snapshot time {now} is earlier than {last}")]
    NonMonotonicTime { now: i64, last: i64 },
}
