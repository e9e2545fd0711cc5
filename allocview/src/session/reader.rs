//! Frame reading for live streams and capture files

use std::io::Read;

use allocview_common::{read_frame, read_frame_async, HandshakeMessage, SnapshotPacket, WireError};
use log::info;
use tokio::io::AsyncRead;

use crate::domain::SessionError;
use crate::pipeline::Pipeline;

/// Read and validate the first frame of a stream.
///
/// # Errors
/// [`SessionError::Handshake`] for a missing, truncated or foreign first
/// frame.
pub async fn read_handshake<R>(reader: &mut R, buf: &mut Vec<u8>) -> Result<HandshakeMessage, SessionError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    read_frame_async(reader, buf).await.map_err(SessionError::Handshake)?;
    HandshakeMessage::decode(buf).map_err(SessionError::Handshake)
}

/// Blocking counterpart of [`read_handshake`] for capture files.
///
/// # Errors
/// Same as [`read_handshake`].
pub fn read_handshake_blocking<R: Read + ?Sized>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> Result<HandshakeMessage, SessionError> {
    read_frame(reader, buf).map_err(SessionError::Handshake)?;
    HandshakeMessage::decode(buf).map_err(SessionError::Handshake)
}

/// Decode snapshots until the stream closes on a frame boundary.
///
/// # Errors
/// [`SessionError::Wire`] for a malformed or truncated frame and
/// [`SessionError::NonMonotonicTime`] for a snapshot older than the last.
pub async fn stream_snapshots<R>(reader: &mut R, pipeline: &mut Pipeline) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = Vec::new();
    loop {
        match read_frame_async(reader, &mut buf).await {
            Ok(()) => apply(&buf, pipeline)?,
            Err(WireError::Closed) => {
                info!("agent closed the stream after {} snapshots", pipeline.packets());
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Blocking snapshot loop for capture files.
///
/// A capture cut off mid-frame (the agent was killed while writing) ends
/// the replay like a clean close.
///
/// # Errors
/// Same as [`stream_snapshots`], except for the truncated tail.
pub fn replay_snapshots<R: Read + ?Sized>(reader: &mut R, pipeline: &mut Pipeline) -> Result<(), SessionError> {
    let mut buf = Vec::new();
    loop {
        match read_frame(reader, &mut buf) {
            Ok(()) => apply(&buf, pipeline)?,
            Err(WireError::Closed) => return Ok(()),
            Err(WireError::ShortRead { expected, got }) => {
                log::warn!("capture ends with a partial frame ({got} of {expected} bytes)");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Decode the next frame as a snapshot, if any.
///
/// # Errors
/// [`SessionError::Wire`] for a malformed frame.
pub fn next_snapshot<R: Read + ?Sized>(reader: &mut R, buf: &mut Vec<u8>) -> Result<Option<SnapshotPacket>, SessionError> {
    match read_frame(reader, buf) {
        Ok(()) => Ok(Some(SnapshotPacket::decode(buf)?)),
        Err(e) if e.is_disconnect() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn apply(payload: &[u8], pipeline: &mut Pipeline) -> Result<(), SessionError> {
    let packet = SnapshotPacket::decode(payload)?;
    pipeline.apply(&packet)?;
    Ok(())
}
