//! One call site's ring of samples

use allocview_common::Stack;

use super::{Sample, SampleIndex};

/// Number of leading frames that identify a call site.
pub const FINGERPRINT_DEPTH: usize = 3;

/// Call-site identity: the first [`FINGERPRINT_DEPTH`] frames of a stack.
///
/// Distinct stacks sharing these frames fold into one series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CallSiteFingerprint([u64; FINGERPRINT_DEPTH]);

impl CallSiteFingerprint {
    #[must_use]
    pub fn of(stack: &Stack) -> Self {
        let mut out = [0; FINGERPRINT_DEPTH];
        out.copy_from_slice(&stack.as_slots()[..FINGERPRINT_DEPTH]);
        Self(out)
    }

    #[must_use]
    pub fn frames(&self) -> &[u64; FINGERPRINT_DEPTH] {
        &self.0
    }
}

/// Ring buffer of samples for one call site plus running totals.
#[derive(Debug, Clone)]
pub struct Series {
    /// Net bytes still allocated: sum of alloc minus free over all deltas.
    pub total_alloc_bytes: i64,
    pub total_alloc_objects: i64,
    samples: Vec<Sample>,
    stack: Stack,
}

impl Series {
    #[must_use]
    pub fn new(sample_count: usize, stack: Stack) -> Self {
        Self {
            total_alloc_bytes: 0,
            total_alloc_objects: 0,
            samples: vec![Sample::default(); sample_count],
            stack,
        }
    }

    /// Add `delta` to the totals and to the ring slot at `index`.
    pub fn update_sample(&mut self, index: SampleIndex, delta: Sample) {
        self.total_alloc_bytes += delta.alloc_bytes - delta.free_bytes;
        self.total_alloc_objects += delta.alloc_objects - delta.free_objects;
        self.samples[index.0] += delta;
    }

    /// Field-wise maximum over the ring.
    #[must_use]
    pub fn max(&self) -> Sample {
        self.samples.iter().fold(Sample::default(), |acc, s| acc.max(*s))
    }

    pub(crate) fn clear_slot(&mut self, slot: usize) {
        self.samples[slot] = Sample::default();
    }

    pub(crate) fn clear_all(&mut self) {
        self.samples.fill(Sample::default());
    }

    #[must_use]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// The offset-corrected stack of the first record that created this
    /// series.
    #[must_use]
    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    #[must_use]
    pub fn fingerprint(&self) -> CallSiteFingerprint {
        CallSiteFingerprint::of(&self.stack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(alloc: i64, free: i64) -> Sample {
        Sample { alloc_bytes: alloc, free_bytes: free, alloc_objects: 1, free_objects: 0 }
    }

    #[test]
    fn test_update_sample_accumulates() {
        let mut s = Series::new(4, Stack::from_frames(&[1]));
        s.update_sample(SampleIndex(1), sample(100, 40));
        s.update_sample(SampleIndex(1), sample(10, 0));
        assert_eq!(s.total_alloc_bytes, 70);
        assert_eq!(s.total_alloc_objects, 2);
        assert_eq!(s.samples()[1].alloc_bytes, 110);
        assert!(s.samples()[0].is_zero());
    }

    #[test]
    fn test_max_is_fieldwise() {
        let mut s = Series::new(3, Stack::EMPTY);
        s.update_sample(SampleIndex(0), sample(100, 0));
        s.update_sample(SampleIndex(2), sample(5, 60));
        let m = s.max();
        assert_eq!((m.alloc_bytes, m.free_bytes), (100, 60));
    }

    #[test]
    fn test_fingerprint_uses_three_frames() {
        let a = Stack::from_frames(&[1, 2, 3, 4]);
        let b = Stack::from_frames(&[1, 2, 3, 9, 9]);
        let c = Stack::from_frames(&[1, 2]);
        assert_eq!(CallSiteFingerprint::of(&a), CallSiteFingerprint::of(&b));
        assert_ne!(CallSiteFingerprint::of(&a), CallSiteFingerprint::of(&c));
        assert_eq!(CallSiteFingerprint::of(&c).frames(), &[1, 2, 0]);
    }
}
