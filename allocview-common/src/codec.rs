//! Frame encoding and decoding primitives
//!
//! The encoder owns one growable buffer that is reused for every message:
//! [`Encoder::reset`] truncates it and reserves the 4-byte length placeholder,
//! and [`Encoder::finalize`] patches the placeholder and hands out the full
//! frame. The decoder never panics on malformed input; every read is bounds
//! checked and reported as [`WireError::Truncated`].

use std::io::Read;

use crate::{WireError, LENGTH_PREFIX, MAX_FRAME_LEN};

/// Builds one framed message at a time in a reusable buffer.
#[derive(Debug)]
pub struct Encoder {
    data: Vec<u8>,
}

impl Encoder {
    /// Create an encoder whose buffer can hold `capacity` bytes before growing.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let mut enc = Self { data: Vec::with_capacity(capacity.max(LENGTH_PREFIX)) };
        enc.reset();
        enc
    }

    /// Start a new frame, keeping the allocation.
    pub fn reset(&mut self) {
        self.data.clear();
        self.data.extend_from_slice(&[0; LENGTH_PREFIX]);
    }

    /// Number of payload bytes written since the last reset.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.data.len() - LENGTH_PREFIX
    }

    /// Patch the length placeholder and return the complete frame.
    ///
    /// # Panics
    /// Panics if the payload is larger than `u32::MAX` bytes, which the agent
    /// cannot produce with its bounded record count.
    pub fn finalize(&mut self) -> &[u8] {
        let len = u32::try_from(self.payload_len()).expect("frame payload exceeds u32::MAX");
        self.data[..LENGTH_PREFIX].copy_from_slice(&len.to_le_bytes());
        &self.data
    }

    pub fn u32(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn i32(&mut self, v: i32) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u64(&mut self, v: u64) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn i64(&mut self, v: i64) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    /// Pointer-width values always travel as 64 bits.
    pub fn uintptr(&mut self, v: usize) {
        self.u64(v as u64);
    }

    /// Length-prefixed byte string.
    ///
    /// # Panics
    /// Panics if `v` is longer than `u32::MAX` bytes.
    pub fn bytes(&mut self, v: &[u8]) {
        self.u32(u32::try_from(v.len()).expect("byte string exceeds u32::MAX"));
        self.data.extend_from_slice(v);
    }

    pub fn string(&mut self, v: &str) {
        self.bytes(v.as_bytes());
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::with_capacity(4096)
    }
}

/// Cursor over a single frame payload.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    off: usize,
    data: &'a [u8],
}

impl<'a> Decoder<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { off: 0, data }
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.off
    }

    /// Succeeds only if the whole payload was consumed.
    ///
    /// # Errors
    /// Returns [`WireError::TrailingBytes`] if unread bytes remain.
    pub fn finish(&self) -> Result<(), WireError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(WireError::TrailingBytes(n)),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::Truncated {
                offset: self.off,
                needed: n,
                available: self.remaining(),
            });
        }
        let out = &self.data[self.off..self.off + n];
        self.off += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let mut out = [0; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// # Errors
    /// Returns [`WireError::Truncated`] if the payload is exhausted.
    pub fn u32(&mut self) -> Result<u32, WireError> {
        self.array().map(u32::from_le_bytes)
    }

    /// # Errors
    /// Returns [`WireError::Truncated`] if the payload is exhausted.
    pub fn i32(&mut self) -> Result<i32, WireError> {
        self.array().map(i32::from_le_bytes)
    }

    /// # Errors
    /// Returns [`WireError::Truncated`] if the payload is exhausted.
    pub fn u64(&mut self) -> Result<u64, WireError> {
        self.array().map(u64::from_le_bytes)
    }

    /// # Errors
    /// Returns [`WireError::Truncated`] if the payload is exhausted.
    pub fn i64(&mut self) -> Result<i64, WireError> {
        self.array().map(i64::from_le_bytes)
    }

    /// Pointer-width value. Kept as `u64` on the collector, which may be
    /// inspecting a process of a different word size.
    ///
    /// # Errors
    /// Returns [`WireError::Truncated`] if the payload is exhausted.
    pub fn uintptr(&mut self) -> Result<u64, WireError> {
        self.u64()
    }

    /// # Errors
    /// Returns [`WireError::Truncated`] if the length or body is cut short.
    pub fn bytes(&mut self) -> Result<&'a [u8], WireError> {
        let n = self.u32()? as usize;
        self.take(n)
    }

    /// Length-prefixed string; invalid UTF-8 is replaced rather than rejected
    /// since paths and symbol names are display-only.
    ///
    /// # Errors
    /// Returns [`WireError::Truncated`] if the length or body is cut short.
    pub fn string(&mut self) -> Result<String, WireError> {
        self.bytes().map(|b| String::from_utf8_lossy(b).into_owned())
    }
}

/// Parse a frame length prefix, rejecting lengths above [`MAX_FRAME_LEN`].
fn frame_len(prefix: [u8; LENGTH_PREFIX]) -> Result<usize, WireError> {
    let len = u32::from_le_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }
    Ok(len)
}

/// Read until `buf` is full or the stream ends; returns bytes read.
fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<usize, WireError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Read one frame from a blocking reader into `payload`.
///
/// # Errors
/// - [`WireError::Closed`] if the stream ends before the first length byte
/// - [`WireError::ShortRead`] if it ends anywhere inside the frame
/// - [`WireError::FrameTooLarge`] for an implausible length prefix
pub fn read_frame<R: Read + ?Sized>(reader: &mut R, payload: &mut Vec<u8>) -> Result<(), WireError> {
    let mut prefix = [0; LENGTH_PREFIX];
    match read_full(reader, &mut prefix)? {
        0 => return Err(WireError::Closed),
        LENGTH_PREFIX => {}
        got => return Err(WireError::ShortRead { expected: LENGTH_PREFIX, got }),
    }

    let len = frame_len(prefix)?;
    payload.clear();
    payload.resize(len, 0);
    let got = read_full(reader, payload)?;
    if got != len {
        return Err(WireError::ShortRead { expected: len, got });
    }
    Ok(())
}

/// Async counterpart of [`read_frame`] for the collector.
///
/// # Errors
/// Same as [`read_frame`].
#[cfg(feature = "tokio")]
pub async fn read_frame_async<R>(reader: &mut R, payload: &mut Vec<u8>) -> Result<(), WireError>
where
    R: tokio::io::AsyncRead + Unpin + ?Sized,
{
    use tokio::io::AsyncReadExt;

    async fn fill<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize, WireError>
    where
        R: tokio::io::AsyncRead + Unpin + ?Sized,
    {
        let mut filled = 0;
        while filled < buf.len() {
            match reader.read(&mut buf[filled..]).await? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(filled)
    }

    let mut prefix = [0; LENGTH_PREFIX];
    match fill(reader, &mut prefix).await? {
        0 => return Err(WireError::Closed),
        LENGTH_PREFIX => {}
        got => return Err(WireError::ShortRead { expected: LENGTH_PREFIX, got }),
    }

    let len = frame_len(prefix)?;
    payload.clear();
    payload.resize(len, 0);
    let got = fill(reader, payload).await?;
    if got != len {
        return Err(WireError::ShortRead { expected: len, got });
    }
    Ok(())
}
