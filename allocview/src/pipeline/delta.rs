//! Cumulative-to-interval conversion
//!
//! The agent reports counters since process start. The aggregator wants the
//! amount that happened during one interval. [`DeltaTracker`] remembers the
//! last cumulative value per exact stack and returns the difference.

use std::collections::HashMap;

use allocview_common::Stack;

use crate::series::Sample;

/// A stage between decoded records and the aggregator.
pub trait CounterStage: Send {
    /// Turn the counters reported for `stack` into the amount to add to the
    /// current sample.
    fn interval(&mut self, stack: &Stack, current: Sample) -> Sample;
}

/// Differences cumulative counters, keyed by the full stack (not the
/// fingerprint), so stacks that share a fingerprint never cancel out.
#[derive(Debug, Default)]
pub struct DeltaTracker {
    previous: HashMap<Stack, Sample>,
}

impl DeltaTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn tracked(&self) -> usize {
        self.previous.len()
    }
}

impl CounterStage for DeltaTracker {
    fn interval(&mut self, stack: &Stack, current: Sample) -> Sample {
        let previous = self.previous.insert(*stack, current).unwrap_or_default();
        current - previous
    }
}

/// For sources that already deliver per-interval values.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl CounterStage for Passthrough {
    fn interval(&mut self, _stack: &Stack, current: Sample) -> Sample {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc(bytes: i64) -> Sample {
        Sample { alloc_bytes: bytes, ..Sample::default() }
    }

    #[test]
    fn test_first_report_is_whole_value() {
        let mut t = DeltaTracker::new();
        let s = Stack::from_frames(&[1, 2, 3]);
        assert_eq!(t.interval(&s, alloc(100)), alloc(100));
    }

    #[test]
    fn test_delta_between_reports() {
        let mut t = DeltaTracker::new();
        let s = Stack::from_frames(&[1, 2, 3]);
        t.interval(&s, alloc(100));
        assert_eq!(t.interval(&s, alloc(150)), alloc(50));
        assert_eq!(t.interval(&s, alloc(150)), Sample::default());
    }

    #[test]
    fn test_keyed_by_full_stack() {
        let mut t = DeltaTracker::new();
        let a = Stack::from_frames(&[1, 2, 3, 4]);
        let b = Stack::from_frames(&[1, 2, 3, 5]);
        t.interval(&a, alloc(100));
        assert_eq!(t.interval(&b, alloc(40)), alloc(40));
        assert_eq!(t.tracked(), 2);
    }

    #[test]
    fn test_passthrough_is_identity() {
        let mut p = Passthrough;
        let s = Stack::from_frames(&[1]);
        assert_eq!(p.interval(&s, alloc(7)), alloc(7));
        assert_eq!(p.interval(&s, alloc(7)), alloc(7));
    }
}
