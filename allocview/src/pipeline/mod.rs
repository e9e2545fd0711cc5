//! # Snapshot Pipeline
//!
//! Applies decoded snapshots to the shared [`Collection`], strictly in
//! arrival order:
//!
//! ```text
//! SnapshotPacket
//!   │ update_to_time(timestamp)        → ring slot (fails on time going backwards)
//!   ▼
//! for each record:
//!   correct every frame (load offset)
//!   CounterStage::interval             → delta since the previous report
//!   fingerprint = first 3 frames
//!   Collection::update_sample
//! ```
//!
//! The collection lock is held for one whole packet, so readers never see a
//! half-applied snapshot. After each packet a notification is offered on a
//! bounded channel; if the reader has not caught up it is dropped.

pub mod delta;
pub mod summary;

use std::sync::Arc;

use allocview_common::SnapshotPacket;
use crossbeam_channel::Sender;
use log::debug;
use parking_lot::Mutex;

use crate::series::{CallSiteFingerprint, Collection, Sample, SampleIndex, SeriesError};
use crate::symbolization::Symbols;

pub use delta::{CounterStage, DeltaTracker, Passthrough};

/// Collection shared between the read loop (writer) and presentation
/// (readers).
pub type SharedCollection = Arc<Mutex<Collection>>;

pub struct Pipeline {
    collection: SharedCollection,
    symbols: Symbols,
    stage: Box<dyn CounterStage>,
    notify: Option<Sender<()>>,
    packets: u64,
}

impl Pipeline {
    /// Pipeline with a [`DeltaTracker`] for cumulative agent counters.
    #[must_use]
    pub fn new(collection: SharedCollection, symbols: Symbols) -> Self {
        Self::with_stage(collection, symbols, Box::new(DeltaTracker::new()))
    }

    #[must_use]
    pub fn with_stage(collection: SharedCollection, symbols: Symbols, stage: Box<dyn CounterStage>) -> Self {
        Self { collection, symbols, stage, notify: None, packets: 0 }
    }

    /// Offer a unit message on `tx` after every applied packet.
    #[must_use]
    pub fn with_notifier(mut self, tx: Sender<()>) -> Self {
        self.notify = Some(tx);
        self
    }

    /// Apply one snapshot.
    ///
    /// # Errors
    /// [`SeriesError::NonMonotonicTime`] if the snapshot is older than one
    /// already applied; nothing is changed in that case.
    pub fn apply(&mut self, packet: &SnapshotPacket) -> Result<SampleIndex, SeriesError> {
        let correction = self.symbols.correction();
        let index = {
            let mut collection = self.collection.lock();
            let index = collection.update_to_time(packet.timestamp_nanos)?;
            for record in &packet.records {
                let stack = correction.apply_stack(&record.stack);
                let delta = self.stage.interval(&stack, Sample::from_record(record));
                if delta.is_zero() {
                    continue;
                }
                collection.update_sample(index, CallSiteFingerprint::of(&stack), &stack, delta);
            }
            index
        };

        self.packets += 1;
        debug!(
            "snapshot {} at {}: {} records into slot {index}",
            self.packets,
            packet.timestamp_nanos,
            packet.records.len()
        );
        if let Some(tx) = &self.notify {
            let _ = tx.try_send(());
        }
        Ok(index)
    }

    #[must_use]
    pub fn packets(&self) -> u64 {
        self.packets
    }

    #[must_use]
    pub fn collection(&self) -> &SharedCollection {
        &self.collection
    }

    #[must_use]
    pub fn symbols(&self) -> &Symbols {
        &self.symbols
    }
}
