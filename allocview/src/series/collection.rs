//! Windowed aggregation over all call sites

use std::collections::HashMap;
use std::time::Duration;

use allocview_common::Stack;

use super::{CallSiteFingerprint, Sample, SampleIndex, Series, SeriesError};

/// All series of one session, sharing a single time axis.
///
/// Time is absolute nanoseconds (the agent's wall clock). Sample time `t`
/// covers `[start + t*duration, start + (t+1)*duration)` and lives in ring
/// slot `t mod sample_count`.
#[derive(Debug)]
pub struct Collection {
    start: i64,
    sample_duration: i64,
    sample_count: usize,
    sample_head: i64,
    last_now: i64,
    series: Vec<Series>,
    by_fingerprint: HashMap<CallSiteFingerprint, usize>,
}

impl Collection {
    /// # Panics
    /// Panics if `sample_duration` is zero or `sample_count` is zero.
    #[must_use]
    pub fn new(start: i64, sample_duration: Duration, sample_count: usize) -> Self {
        let sample_duration = i64::try_from(sample_duration.as_nanos()).unwrap_or(i64::MAX);
        assert!(sample_duration > 0, "sample duration must be positive");
        assert!(sample_count > 0, "sample count must be positive");
        Self {
            start,
            sample_duration,
            sample_count,
            sample_head: 0,
            last_now: start,
            series: Vec::new(),
            by_fingerprint: HashMap::new(),
        }
    }

    /// Advance to `now` and return the ring slot for it.
    ///
    /// Every slot the head moves into is zeroed before it can be reused, at
    /// most one full lap.
    ///
    /// # Errors
    /// [`SeriesError::NonMonotonicTime`] if `now` is earlier than a time
    /// already seen. The collection is left unchanged.
    pub fn update_to_time(&mut self, now: i64) -> Result<SampleIndex, SeriesError> {
        if now < self.last_now {
            return Err(SeriesError::NonMonotonicTime { now, last: self.last_now });
        }
        self.last_now = now;

        let sample_time = (now - self.start).div_euclid(self.sample_duration);
        if sample_time != self.sample_head {
            let count = i64::try_from(self.sample_count).unwrap_or(i64::MAX);
            let steps = (sample_time - self.sample_head).min(count);
            for t in self.sample_head + 1..=self.sample_head + steps {
                let slot = self.slot(t);
                for series in &mut self.series {
                    series.clear_slot(slot);
                }
            }
            self.sample_head = sample_time;
        }
        Ok(SampleIndex(self.slot(sample_time)))
    }

    fn slot(&self, sample_time: i64) -> usize {
        let count = i64::try_from(self.sample_count).unwrap_or(i64::MAX);
        usize::try_from(sample_time.rem_euclid(count)).unwrap_or(0)
    }

    /// Add `delta` to the series for `fingerprint`, creating it with `stack`
    /// if this call site is new.
    pub fn update_sample(
        &mut self,
        index: SampleIndex,
        fingerprint: CallSiteFingerprint,
        stack: &Stack,
        delta: Sample,
    ) {
        let pos = match self.by_fingerprint.get(&fingerprint) {
            Some(&pos) => pos,
            None => {
                self.series.push(Series::new(self.sample_count, *stack));
                self.by_fingerprint.insert(fingerprint, self.series.len() - 1);
                self.series.len() - 1
            }
        };
        self.series[pos].update_sample(index, delta);
    }

    /// Zero every ring; totals and call sites are kept.
    pub fn reset_samples(&mut self) {
        for series in &mut self.series {
            series.clear_all();
        }
    }

    /// Series in creation order.
    #[must_use]
    pub fn series(&self) -> &[Series] {
        &self.series
    }

    /// Series ordered by descending net live bytes.
    #[must_use]
    pub fn sorted_by_live(&self) -> Vec<&Series> {
        let mut out: Vec<&Series> = self.series.iter().collect();
        out.sort_by(|a, b| b.total_alloc_bytes.cmp(&a.total_alloc_bytes));
        out
    }

    /// Ring slots from oldest to newest, ending at the head.
    pub fn chronological_slots(&self) -> impl Iterator<Item = usize> + '_ {
        (self.sample_head + 1..=self.sample_head + i64::try_from(self.sample_count).unwrap_or(0))
            .map(|t| self.slot(t))
    }

    #[must_use]
    pub fn start(&self) -> i64 {
        self.start
    }

    #[must_use]
    pub fn sample_duration(&self) -> Duration {
        Duration::from_nanos(u64::try_from(self.sample_duration).unwrap_or(0))
    }

    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Absolute sample time of the head.
    #[must_use]
    pub fn sample_head(&self) -> i64 {
        self.sample_head
    }

    #[must_use]
    pub fn last_now(&self) -> i64 {
        self.last_now
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.series.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}
