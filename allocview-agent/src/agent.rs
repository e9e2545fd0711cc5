//! Snapshot send loop
//!
//! [`Agent`] owns the transport writer, a reusable encoder and a reusable
//! record buffer. Each tick it refreshes the [`ProfileSource`], captures all
//! buckets and writes one snapshot frame.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use allocview_common::{Encoder, HandshakeMessage, Record, SnapshotPacket};
use log::{debug, info, warn};

use crate::profiler::{AllocProfiler, Fill};
use crate::AgentError;

/// Capture attempts per tick before the tick is skipped.
pub const MAX_CAPTURE_ATTEMPTS: usize = 8;

const INITIAL_RECORDS: usize = 64;

/// Anything that can produce cumulative per-stack counters.
pub trait ProfileSource {
    /// Make the latest counters visible to [`ProfileSource::fill`].
    fn refresh(&self);

    /// Copy buckets into `out`, see [`Fill`].
    fn fill(&self, out: &mut [Record]) -> Fill;
}

impl ProfileSource for AllocProfiler {
    fn refresh(&self) {
        AllocProfiler::refresh(self);
    }

    fn fill(&self, out: &mut [Record]) -> Fill {
        AllocProfiler::fill(self, out)
    }
}

impl<S: ProfileSource + ?Sized> ProfileSource for &S {
    fn refresh(&self) {
        (**self).refresh();
    }

    fn fill(&self, out: &mut [Record]) -> Fill {
        (**self).fill(out)
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Sent { records: usize },
    /// The bucket set kept growing faster than the buffer.
    Skipped,
}

pub struct Agent<W, S> {
    writer: W,
    source: S,
    encoder: Encoder,
    records: Vec<Record>,
}

impl<W: Write, S: ProfileSource> Agent<W, S> {
    pub fn new(writer: W, source: S) -> Self {
        Self {
            writer,
            source,
            encoder: Encoder::with_capacity(64 * 1024),
            records: Vec::new(),
        }
    }

    /// Write the handshake frame. Must be called once, before any tick.
    ///
    /// # Errors
    /// Returns [`AgentError::Io`] if the transport rejects the write.
    pub fn handshake(&mut self, msg: &HandshakeMessage) -> Result<(), AgentError> {
        self.encoder.reset();
        msg.encode(&mut self.encoder);
        self.writer.write_all(self.encoder.finalize())?;
        self.writer.flush()?;
        Ok(())
    }

    /// Copy every bucket into the record buffer, growing it as needed.
    /// Returns the record count, or `None` after [`MAX_CAPTURE_ATTEMPTS`].
    pub fn capture(&mut self) -> Option<usize> {
        let mut want = self.records.len().max(INITIAL_RECORDS);
        for _ in 0..MAX_CAPTURE_ATTEMPTS {
            if self.records.len() < want {
                self.records.resize(want, Record::default());
            }
            let Fill { count, complete } = self.source.fill(&mut self.records);
            if complete {
                return Some(count);
            }
            want = count + count / 3;
        }
        None
    }

    /// Refresh, capture and send one snapshot stamped `timestamp_nanos`.
    ///
    /// # Errors
    /// Returns [`AgentError::Io`] if the frame cannot be written.
    pub fn tick(&mut self, timestamp_nanos: i64) -> Result<Tick, AgentError> {
        self.source.refresh();
        let Some(count) = self.capture() else {
            return Ok(Tick::Skipped);
        };

        self.encoder.reset();
        SnapshotPacket::encode_records(&mut self.encoder, timestamp_nanos, &self.records[..count]);
        self.writer.write_all(self.encoder.finalize())?;
        self.writer.flush()?;
        Ok(Tick::Sent { records: count })
    }

    /// Tick every `interval` until a write fails or `stop` is set.
    ///
    /// Setting `stop` (and unparking this thread) sends one final snapshot
    /// and returns, dropping the writer so the stream ends on a frame
    /// boundary.
    pub fn run(mut self, interval: Duration, stop: &AtomicBool) {
        info!("allocview agent streaming every {interval:?}");
        loop {
            wait(interval, stop);
            let last = stop.load(Ordering::Acquire);
            match self.tick(now_nanos()) {
                Ok(Tick::Sent { records }) => debug!("sent snapshot with {records} records"),
                Ok(Tick::Skipped) => {
                    warn!("profile kept growing after {MAX_CAPTURE_ATTEMPTS} attempts, skipping tick");
                }
                Err(e) => {
                    info!("allocview agent stopped: {e}");
                    return;
                }
            }
            if last {
                info!("allocview agent stopped");
                return;
            }
        }
    }

    /// Give back the transport, mainly for tests.
    pub fn into_writer(self) -> W {
        self.writer
    }
}

/// Park until `interval` has passed or `stop` is set.
fn wait(interval: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + interval;
    while !stop.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::park_timeout(deadline - now);
    }
}

/// Wall-clock nanoseconds since the Unix epoch.
#[must_use]
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use allocview_common::{read_frame, Stack};
    use std::cell::Cell;

    /// Source whose bucket count is multiplied by `factor` on every fill.
    struct Growing {
        buckets: Cell<usize>,
        factor: usize,
        refreshes: Cell<usize>,
    }

    impl Growing {
        fn new(buckets: usize, factor: usize) -> Self {
            Self { buckets: Cell::new(buckets), factor, refreshes: Cell::new(0) }
        }
    }

    impl ProfileSource for Growing {
        fn refresh(&self) {
            self.refreshes.set(self.refreshes.get() + 1);
        }

        fn fill(&self, out: &mut [Record]) -> Fill {
            let n = self.buckets.get();
            for (i, slot) in out.iter_mut().take(n).enumerate() {
                *slot = Record {
                    alloc_bytes: 10,
                    stack: Stack::from_frames(&[i as u64 + 1]),
                    ..Record::default()
                };
            }
            self.buckets.set(n * self.factor);
            Fill { count: n, complete: n <= out.len() }
        }
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_capture_grows_buffer() {
        let mut agent = Agent::new(Vec::new(), Growing::new(200, 1));
        assert_eq!(agent.capture(), Some(200));
        assert!(agent.records.len() >= 200);
    }

    #[test]
    fn test_capture_gives_up_when_source_outgrows_buffer() {
        // Doubling outpaces the n/3 headroom on every attempt.
        let mut agent = Agent::new(Vec::new(), Growing::new(100, 2));
        assert_eq!(agent.capture(), None);
    }

    #[test]
    fn test_skipped_tick_writes_nothing() {
        let mut agent = Agent::new(Vec::new(), Growing::new(100, 2));
        assert_eq!(agent.tick(1).unwrap(), Tick::Skipped);
        assert!(agent.into_writer().is_empty());
    }

    #[test]
    fn test_tick_writes_one_frame() {
        let mut agent = Agent::new(Vec::new(), Growing::new(3, 1));
        assert_eq!(agent.tick(42).unwrap(), Tick::Sent { records: 3 });
        assert_eq!(agent.source.refreshes.get(), 1);

        let bytes = agent.into_writer();
        let mut payload = Vec::new();
        read_frame(&mut bytes.as_slice(), &mut payload).unwrap();
        let packet = SnapshotPacket::decode(&payload).unwrap();
        assert_eq!(packet.timestamp_nanos, 42);
        assert_eq!(packet.records.len(), 3);
    }

    #[test]
    fn test_handshake_then_snapshots() {
        let mut agent = Agent::new(Vec::new(), Growing::new(1, 1));
        let hello = HandshakeMessage {
            exe_path: "/bin/demo".into(),
            anchor_symbol_name: "allocview_anchor".into(),
            anchor_runtime_address: 0x5000,
        };
        agent.handshake(&hello).unwrap();
        agent.tick(1).unwrap();
        agent.tick(2).unwrap();

        let bytes = agent.into_writer();
        let mut reader = bytes.as_slice();
        let mut payload = Vec::new();
        read_frame(&mut reader, &mut payload).unwrap();
        assert_eq!(HandshakeMessage::decode(&payload).unwrap(), hello);
        for ts in [1, 2] {
            read_frame(&mut reader, &mut payload).unwrap();
            assert_eq!(SnapshotPacket::decode(&payload).unwrap().timestamp_nanos, ts);
        }
    }

    #[test]
    fn test_write_failure_is_an_error() {
        let mut agent = Agent::new(FailingWriter, Growing::new(1, 1));
        assert!(matches!(agent.tick(1), Err(AgentError::Io(_))));
    }

    #[test]
    fn test_run_returns_on_write_failure() {
        let agent = Agent::new(FailingWriter, Growing::new(1, 1));
        agent.run(Duration::from_millis(1), &AtomicBool::new(false));
    }

    #[test]
    fn test_stop_sends_final_snapshot() {
        let stop = AtomicBool::new(true);
        let mut out = Vec::new();
        Agent::new(&mut out, Growing::new(2, 1)).run(Duration::from_secs(3600), &stop);

        let mut reader = out.as_slice();
        let mut payload = Vec::new();
        read_frame(&mut reader, &mut payload).unwrap();
        assert_eq!(SnapshotPacket::decode(&payload).unwrap().records.len(), 2);
        assert!(reader.is_empty());
    }
}
