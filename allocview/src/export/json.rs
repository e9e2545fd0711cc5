//! JSON summary of a finished collection

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::domain::ExportError;
use crate::pipeline::summary::SummaryRow;
use crate::series::{Collection, Sample, Series};
use crate::symbolization::Symbols;

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub exe_path: String,
    pub start_nanos: i64,
    pub sample_duration_ms: u128,
    pub sample_count: usize,
    pub sample_head: i64,
    pub call_sites: Vec<CallSiteSummary>,
}

#[derive(Debug, Serialize)]
pub struct CallSiteSummary {
    pub caption: String,
    /// Corrected return addresses, innermost first, as hex.
    pub stack: Vec<String>,
    pub live_bytes: i64,
    pub live_objects: i64,
    pub peak_alloc_bytes: i64,
    pub peak_free_bytes: i64,
    /// Oldest sample first; the last entry is the head.
    pub samples: Vec<Sample>,
}

impl SessionSummary {
    /// Snapshot `collection`; call sites ordered by live bytes.
    #[must_use]
    pub fn new(exe_path: &str, collection: &Collection, symbols: &Symbols) -> Self {
        let slots: Vec<usize> = collection.chronological_slots().collect();
        let call_sites = collection
            .sorted_by_live()
            .into_iter()
            .map(|series| CallSiteSummary::new(series, symbols, &slots))
            .collect();

        Self {
            exe_path: exe_path.to_string(),
            start_nanos: collection.start(),
            sample_duration_ms: collection.sample_duration().as_millis(),
            sample_count: collection.sample_count(),
            sample_head: collection.sample_head(),
            call_sites,
        }
    }
}

impl CallSiteSummary {
    fn new(series: &Series, symbols: &Symbols, slots: &[usize]) -> Self {
        let row = SummaryRow::for_series(series, symbols);
        Self {
            caption: row.caption,
            stack: series.stack().frames().map(|pc| format!("{pc:#x}")).collect(),
            live_bytes: row.live_bytes,
            live_objects: row.live_objects,
            peak_alloc_bytes: row.peak_alloc_bytes,
            peak_free_bytes: row.peak_free_bytes,
            samples: slots.iter().map(|&slot| series.samples()[slot]).collect(),
        }
    }
}

pub struct JsonSummaryExporter;

impl JsonSummaryExporter {
    /// Write `summary` as pretty-printed JSON.
    ///
    /// # Errors
    /// [`ExportError::WriteFailed`] if the file cannot be created or
    /// written, [`ExportError::Json`] if serialization fails.
    pub fn write(path: &Path, summary: &SessionSummary) -> Result<(), ExportError> {
        let write_failed = |source| ExportError::WriteFailed { path: path.to_path_buf(), source };
        let file = File::create(path).map_err(write_failed)?;
        let mut out = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut out, summary)?;
        out.write_all(b"\n").map_err(write_failed)?;
        out.flush().map_err(write_failed)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::CallSiteFingerprint;
    use allocview_common::Stack;
    use std::time::Duration;

    fn collection() -> Collection {
        let mut coll = Collection::new(0, Duration::from_millis(500), 3);
        for (ts, bytes) in [(0, 64i64), (600_000_000, 32)] {
            let idx = coll.update_to_time(ts).unwrap();
            let stack = Stack::from_frames(&[0xabc, 0xdef]);
            let delta = Sample { alloc_bytes: bytes, alloc_objects: 1, ..Sample::default() };
            coll.update_sample(idx, CallSiteFingerprint::of(&stack), &stack, delta);
        }
        coll
    }

    #[test]
    fn test_samples_in_chronological_order() {
        let summary = SessionSummary::new("/bin/app", &collection(), &Symbols::none());
        assert_eq!(summary.sample_duration_ms, 500);
        assert_eq!(summary.sample_head, 1);

        let site = &summary.call_sites[0];
        assert_eq!(site.live_bytes, 96);
        assert_eq!(site.stack, vec!["0xabc", "0xdef"]);
        let allocs: Vec<i64> = site.samples.iter().map(|s| s.alloc_bytes).collect();
        assert_eq!(allocs, vec![0, 64, 32]);
    }

    #[test]
    fn test_write_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        let summary = SessionSummary::new("/bin/app", &collection(), &Symbols::none());
        JsonSummaryExporter::write(&path, &summary).unwrap();

        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["exe_path"], "/bin/app");
        assert_eq!(value["call_sites"][0]["caption"], "0xabc");
        assert_eq!(value["call_sites"][0]["samples"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_write_to_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("summary.json");
        let summary = SessionSummary::new("/bin/app", &collection(), &Symbols::none());
        let err = JsonSummaryExporter::write(&path, &summary).unwrap_err();
        assert!(matches!(err, ExportError::WriteFailed { .. }));
    }
}
