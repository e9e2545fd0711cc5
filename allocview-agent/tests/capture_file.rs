use std::time::Duration;

use allocview_agent::{config::INTERVAL_ENV, try_start, ProfilingAllocator, ANCHOR_NAME};
use allocview_common::{read_frame, HandshakeMessage, SnapshotPacket, ENDPOINT_ENV};

#[global_allocator]
static ALLOC: ProfilingAllocator = ProfilingAllocator::system();

#[inline(never)]
fn retain_blocks(n: usize) -> Vec<Vec<u8>> {
    (0..n).map(|_| vec![7u8; 1024]).collect()
}

#[test]
fn test_offline_capture_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.alloc");
    std::env::set_var(ENDPOINT_ENV, &path);
    std::env::set_var(INTERVAL_ENV, "10");

    assert!(try_start().unwrap(), "agent should activate");
    assert!(!try_start().unwrap(), "second start is a no-op");

    let kept = retain_blocks(100);
    std::thread::sleep(Duration::from_millis(300));

    let bytes = std::fs::read(&path).unwrap();
    let mut reader = bytes.as_slice();
    let mut payload = Vec::new();

    read_frame(&mut reader, &mut payload).unwrap();
    let hello = HandshakeMessage::decode(&payload).unwrap();
    assert_eq!(hello.anchor_symbol_name, ANCHOR_NAME);
    assert_eq!(hello.anchor_runtime_address, allocview_agent::anchor().1);
    assert_eq!(
        std::path::PathBuf::from(&hello.exe_path),
        std::env::current_exe().unwrap()
    );

    // The agent may be mid-write on the last frame.
    let mut snapshots = Vec::new();
    while read_frame(&mut reader, &mut payload).is_ok() {
        snapshots.push(SnapshotPacket::decode(&payload).unwrap());
    }
    assert!(snapshots.len() >= 2, "got {} snapshots", snapshots.len());
    assert!(snapshots.windows(2).all(|w| w[0].timestamp_nanos <= w[1].timestamp_nanos));

    let last = snapshots.last().unwrap();
    let allocated: i64 = last.records.iter().map(|r| r.alloc_bytes).sum();
    assert!(allocated >= 100 * 1024, "only {allocated} bytes recorded");

    drop(kept);
}
