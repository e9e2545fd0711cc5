//! Demo workload with the agent → collector session → collection.

use std::sync::Arc;
use std::time::Duration;

use allocview::export::SessionSummary;
use allocview::session::{Session, SessionConfig, SessionOutcome};
use tokio::process::Command;

fn demo(run_ms: u64) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_allocview-demo"));
    command
        .args(["--run-ms", &run_ms.to_string(), "--block", "2048", "--retain-every", "1"])
        .env("ALLOCVIEW_INTERVAL_MS", "50");
    command
}

#[tokio::test]
async fn test_demo_streams_into_collection() {
    let config = SessionConfig {
        sample_duration: Duration::from_millis(100),
        sample_count: 64,
        ..SessionConfig::default()
    };
    let (tx, rx) = crossbeam_channel::bounded(1);

    let session = Session::launch(demo(600), &config, Some(tx)).await.expect("demo should connect");
    assert!(session.handshake().exe_path.contains("allocview-demo"));
    assert!(session.symbols().is_loaded(), "demo binary should have symbols");
    let collection = Arc::clone(session.collection());
    let symbols = session.symbols().clone();

    let outcome = session.finish_with_grace(Duration::from_secs(5)).await;
    match &outcome {
        SessionOutcome::StreamEnded => {}
        SessionOutcome::ProcessExited(status) => assert!(status.success(), "demo failed: {status}"),
        SessionOutcome::StreamFailed(e) => panic!("stream failed: {e}"),
    }
    assert!(rx.try_recv().is_ok(), "no update notification was offered");

    let coll = collection.lock();
    assert!(!coll.is_empty(), "no call sites collected");
    let elapsed = coll.last_now() - coll.start();
    assert!(elapsed >= 150_000_000, "fewer than 3 snapshots ({elapsed}ns of stream)");

    // Every series' live total equals the sum over its ring
    for series in coll.series() {
        let sum: i64 = series.samples().iter().map(|s| s.alloc_bytes - s.free_bytes).sum();
        assert_eq!(series.total_alloc_bytes, sum);
    }

    // The retained 2 KiB blocks dominate live memory
    let top = coll.sorted_by_live()[0];
    assert!(top.total_alloc_bytes >= 10 * 2048, "top site holds only {}", top.total_alloc_bytes);

    let summary = SessionSummary::new("allocview-demo", &coll, &symbols);
    assert_eq!(summary.call_sites.len(), coll.len());
    assert_eq!(summary.call_sites[0].samples.len(), 64);
    assert!(!summary.call_sites[0].caption.is_empty());
}
