//! Message types carried by the wire protocol

use crate::{Decoder, Encoder, WireError, MAGIC, MAX_STACK_DEPTH};

/// Fixed-depth call stack of return addresses.
///
/// Unused slots are zero and the first zero terminates the stack, so two
/// stacks compare equal exactly when their recorded frames match.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stack([u64; MAX_STACK_DEPTH]);

impl Stack {
    pub const EMPTY: Stack = Stack([0; MAX_STACK_DEPTH]);

    /// Build a stack from leading frames, truncating past [`MAX_STACK_DEPTH`]
    /// and stopping at the first zero.
    #[must_use]
    pub fn from_frames(frames: &[u64]) -> Self {
        let mut out = [0; MAX_STACK_DEPTH];
        for (slot, &pc) in out.iter_mut().zip(frames.iter().take_while(|&&pc| pc != 0)) {
            *slot = pc;
        }
        Stack(out)
    }

    /// Non-zero frames, innermost first.
    pub fn frames(&self) -> impl Iterator<Item = u64> + '_ {
        self.0.iter().copied().take_while(|&pc| pc != 0)
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }

    /// Raw slot array including trailing zeros.
    #[must_use]
    pub fn as_slots(&self) -> &[u64; MAX_STACK_DEPTH] {
        &self.0
    }

    /// Apply `f` to every recorded frame, leaving terminator slots at zero.
    #[must_use]
    pub fn map_frames(&self, mut f: impl FnMut(u64) -> u64) -> Self {
        let mut out = [0; MAX_STACK_DEPTH];
        for (slot, pc) in out.iter_mut().zip(self.frames()) {
            *slot = f(pc);
        }
        Stack(out)
    }

    /// Store a frame at `idx`; used by the agent while walking a backtrace.
    pub fn set(&mut self, idx: usize, pc: u64) {
        if let Some(slot) = self.0.get_mut(idx) {
            *slot = pc;
        }
    }

    fn encode(&self, enc: &mut Encoder) {
        for pc in self.frames() {
            enc.u64(pc);
        }
        enc.u64(0);
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self, WireError> {
        let mut out = [0; MAX_STACK_DEPTH];
        for slot in &mut out {
            let pc = dec.u64()?;
            if pc == 0 {
                return Ok(Stack(out));
            }
            *slot = pc;
        }
        // A full-depth stack still carries its terminator.
        if dec.u64()? != 0 {
            return Err(WireError::StackTooDeep);
        }
        Ok(Stack(out))
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.frames().map(|pc| format!("{pc:#x}")))
            .finish()
    }
}

/// One profiler bucket: cumulative counters since process start plus the
/// call stack that identifies it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Record {
    pub alloc_bytes: i64,
    pub free_bytes: i64,
    pub alloc_objects: i64,
    pub free_objects: i64,
    pub stack: Stack,
}

impl Record {
    /// Bytes allocated and not yet freed.
    #[must_use]
    pub fn in_use_bytes(&self) -> i64 {
        self.alloc_bytes - self.free_bytes
    }

    fn encode(&self, enc: &mut Encoder) {
        enc.i64(self.alloc_bytes);
        enc.i64(self.free_bytes);
        enc.i64(self.alloc_objects);
        enc.i64(self.free_objects);
        self.stack.encode(enc);
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self, WireError> {
        Ok(Record {
            alloc_bytes: dec.i64()?,
            free_bytes: dec.i64()?,
            alloc_objects: dec.i64()?,
            free_objects: dec.i64()?,
            stack: Stack::decode(dec)?,
        })
    }
}

/// First frame on every stream: identifies the monitored executable and the
/// runtime address of its anchor symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMessage {
    pub exe_path: String,
    pub anchor_symbol_name: String,
    pub anchor_runtime_address: u64,
}

impl HandshakeMessage {
    /// Append the handshake payload to `enc`. The caller resets and
    /// finalizes the encoder.
    pub fn encode(&self, enc: &mut Encoder) {
        enc.string(MAGIC);
        enc.string(&self.exe_path);
        enc.string(&self.anchor_symbol_name);
        enc.u64(self.anchor_runtime_address);
    }

    /// # Errors
    /// [`WireError::BadMagic`] if the payload does not open with the protocol
    /// magic, [`WireError::Truncated`] or [`WireError::TrailingBytes`] for a
    /// malformed payload.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut dec = Decoder::new(payload);
        let magic = dec.string()?;
        if magic != MAGIC {
            return Err(WireError::BadMagic { found: magic });
        }
        let msg = HandshakeMessage {
            exe_path: dec.string()?,
            anchor_symbol_name: dec.string()?,
            anchor_runtime_address: dec.u64()?,
        };
        dec.finish()?;
        Ok(msg)
    }
}

/// Every cumulative profiler bucket at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotPacket {
    pub timestamp_nanos: i64,
    pub records: Vec<Record>,
}

/// Smallest encoded record: four counters plus a bare terminator.
const MIN_RECORD_LEN: usize = 5 * 8;

impl SnapshotPacket {
    pub fn encode(&self, enc: &mut Encoder) {
        Self::encode_records(enc, self.timestamp_nanos, &self.records);
    }

    /// Encode without owning the records, so the agent can serialize straight
    /// from its reusable capture buffer.
    ///
    /// # Panics
    /// Panics if more than `u32::MAX` records are passed.
    pub fn encode_records(enc: &mut Encoder, timestamp_nanos: i64, records: &[Record]) {
        enc.i64(timestamp_nanos);
        enc.u32(u32::try_from(records.len()).expect("record count exceeds u32::MAX"));
        for record in records {
            record.encode(enc);
        }
    }

    /// # Errors
    /// [`WireError::Truncated`] if the payload ends early,
    /// [`WireError::StackTooDeep`] for an unterminated stack and
    /// [`WireError::TrailingBytes`] if bytes remain after the last record.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut dec = Decoder::new(payload);
        let timestamp_nanos = dec.i64()?;
        let count = dec.u32()? as usize;
        // Bound the reservation by what the payload could possibly hold.
        let mut records = Vec::with_capacity(count.min(dec.remaining() / MIN_RECORD_LEN));
        for _ in 0..count {
            records.push(Record::decode(&mut dec)?);
        }
        dec.finish()?;
        Ok(SnapshotPacket { timestamp_nanos, records })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(build: impl FnOnce(&mut Encoder)) -> Vec<u8> {
        let mut enc = Encoder::default();
        build(&mut enc);
        enc.finalize()[crate::LENGTH_PREFIX..].to_vec()
    }

    fn record(alloc: i64, free: i64, frames: &[u64]) -> Record {
        Record {
            alloc_bytes: alloc,
            free_bytes: free,
            alloc_objects: alloc / 8,
            free_objects: free / 8,
            stack: Stack::from_frames(frames),
        }
    }

    #[test]
    fn test_stack_from_frames_truncates() {
        let frames: Vec<u64> = (1..=40).collect();
        let stack = Stack::from_frames(&frames);
        assert_eq!(stack.depth(), MAX_STACK_DEPTH);
        assert_eq!(stack.frames().last(), Some(32));
    }

    #[test]
    fn test_stack_stops_at_first_zero() {
        let stack = Stack::from_frames(&[0x10, 0x20, 0, 0x30]);
        assert_eq!(stack.frames().collect::<Vec<_>>(), vec![0x10, 0x20]);
        assert_eq!(stack, Stack::from_frames(&[0x10, 0x20]));
    }

    #[test]
    fn test_map_frames_keeps_terminator() {
        let stack = Stack::from_frames(&[0x5010, 0x5020]);
        let moved = stack.map_frames(|pc| pc - 0x4000);
        assert_eq!(moved.frames().collect::<Vec<_>>(), vec![0x1010, 0x1020]);
        assert_eq!(moved.as_slots()[2], 0);
    }

    #[test]
    fn test_handshake_roundtrip() {
        let msg = HandshakeMessage {
            exe_path: "/usr/bin/demo".to_string(),
            anchor_symbol_name: "allocview_anchor".to_string(),
            anchor_runtime_address: 0x5555_0000_1234,
        };
        let bytes = payload(|enc| msg.encode(enc));
        assert_eq!(HandshakeMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_handshake_bad_magic() {
        let bytes = payload(|enc| {
            enc.string("notalloc");
            enc.string("/x");
            enc.string("a");
            enc.u64(1);
        });
        match HandshakeMessage::decode(&bytes) {
            Err(WireError::BadMagic { found }) => assert_eq!(found, "notalloc"),
            other => panic!("expected BadMagic, got {other:?}"),
        }
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let full: Vec<u64> = (1..=MAX_STACK_DEPTH as u64).map(|i| i * 0x100).collect();
        let packet = SnapshotPacket {
            timestamp_nanos: 1_700_000_000_000_000_000,
            records: vec![
                record(100, 50, &[0x401000, 0x402000, 0x403000]),
                record(0, 0, &[]),
                record(4096, 4096, &full),
            ],
        };
        let bytes = payload(|enc| packet.encode(enc));
        assert_eq!(SnapshotPacket::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_snapshot_wire_layout() {
        let packet = SnapshotPacket {
            timestamp_nanos: 7,
            records: vec![record(16, 8, &[0xabc])],
        };
        let bytes = payload(|enc| packet.encode(enc));
        // ts + count + 4 counters + one frame + terminator
        assert_eq!(bytes.len(), 8 + 4 + 32 + 8 + 8);
        assert_eq!(&bytes[8..12], &1u32.to_le_bytes());
        assert_eq!(&bytes[bytes.len() - 8..], &[0; 8]);
    }

    #[test]
    fn test_snapshot_truncated_record() {
        let packet = SnapshotPacket {
            timestamp_nanos: 1,
            records: vec![record(16, 0, &[0x1, 0x2])],
        };
        let bytes = payload(|enc| packet.encode(enc));
        let cut = &bytes[..bytes.len() - 3];
        assert!(matches!(SnapshotPacket::decode(cut), Err(WireError::Truncated { .. })));
    }

    #[test]
    fn test_snapshot_unterminated_stack() {
        let bytes = payload(|enc| {
            enc.i64(1);
            enc.u32(1);
            for _ in 0..4 {
                enc.i64(0);
            }
            for pc in 1..=(MAX_STACK_DEPTH as u64 + 1) {
                enc.u64(pc);
            }
        });
        assert!(matches!(SnapshotPacket::decode(&bytes), Err(WireError::StackTooDeep)));
    }

    #[test]
    fn test_snapshot_huge_count_does_not_preallocate() {
        let bytes = payload(|enc| {
            enc.i64(1);
            enc.u32(u32::MAX);
        });
        assert!(matches!(SnapshotPacket::decode(&bytes), Err(WireError::Truncated { .. })));
    }
}
