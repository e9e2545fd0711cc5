//! Per-interval allocation counters

use std::ops::{Add, AddAssign, Sub};

use allocview_common::Record;
use serde::Serialize;

/// Bytes and objects allocated and freed during one sample duration (or,
/// for cumulative values, since process start).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Sample {
    pub alloc_bytes: i64,
    pub free_bytes: i64,
    pub alloc_objects: i64,
    pub free_objects: i64,
}

impl Sample {
    #[must_use]
    pub fn from_record(record: &Record) -> Self {
        Self {
            alloc_bytes: record.alloc_bytes,
            free_bytes: record.free_bytes,
            alloc_objects: record.alloc_objects,
            free_objects: record.free_objects,
        }
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Sample::default()
    }

    /// Field-wise maximum.
    #[must_use]
    pub fn max(self, other: Sample) -> Sample {
        Sample {
            alloc_bytes: self.alloc_bytes.max(other.alloc_bytes),
            free_bytes: self.free_bytes.max(other.free_bytes),
            alloc_objects: self.alloc_objects.max(other.alloc_objects),
            free_objects: self.free_objects.max(other.free_objects),
        }
    }
}

impl AddAssign for Sample {
    fn add_assign(&mut self, rhs: Sample) {
        self.alloc_bytes += rhs.alloc_bytes;
        self.free_bytes += rhs.free_bytes;
        self.alloc_objects += rhs.alloc_objects;
        self.free_objects += rhs.free_objects;
    }
}

impl Add for Sample {
    type Output = Sample;

    fn add(mut self, rhs: Sample) -> Sample {
        self += rhs;
        self
    }
}

impl Sub for Sample {
    type Output = Sample;

    fn sub(self, rhs: Sample) -> Sample {
        Sample {
            alloc_bytes: self.alloc_bytes - rhs.alloc_bytes,
            free_bytes: self.free_bytes - rhs.free_bytes,
            alloc_objects: self.alloc_objects - rhs.alloc_objects,
            free_objects: self.free_objects - rhs.free_objects,
        }
    }
}

/// Position in a series ring, already reduced modulo the ring length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SampleIndex(pub usize);

impl std::fmt::Display for SampleIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
