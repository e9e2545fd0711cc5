//! Demo workload linked with the allocview agent.
//!
//! Retains a block every few iterations and churns short-lived buffers
//! in between, so both a growing and a flat call site show up.
//!
//! ```bash
//! allocview -- target/debug/allocview-demo --run-ms 10000
//! ```

use std::hint::black_box;
use std::time::{Duration, Instant};

use clap::Parser;

#[global_allocator]
static ALLOC: allocview_agent::ProfilingAllocator = allocview_agent::ProfilingAllocator::system();

#[derive(Parser, Debug)]
#[command(name = "allocview-demo", about = "Allocation workload for trying out allocview")]
struct Args {
    /// How long to run
    #[arg(long, default_value = "3000")]
    run_ms: u64,

    /// Size of each retained block in bytes
    #[arg(long, default_value = "4096")]
    block: usize,

    /// Retain one block every N iterations
    #[arg(long, default_value = "4")]
    retain_every: u64,
}

#[inline(never)]
fn retain_block(kept: &mut Vec<Box<[u8]>>, size: usize) {
    kept.push(vec![0xA5; size].into_boxed_slice());
}

#[inline(never)]
fn churn(n: usize) -> usize {
    let scratch: Vec<u64> = (0..n as u64).collect();
    let text = format!("{scratch:?}");
    black_box(text.len())
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    allocview_agent::start();

    let deadline = Instant::now() + Duration::from_millis(args.run_ms);
    let mut kept = Vec::new();
    let mut iteration = 0u64;
    while Instant::now() < deadline {
        if iteration % args.retain_every.max(1) == 0 {
            retain_block(&mut kept, args.block);
        }
        black_box(churn(256));
        iteration += 1;
        std::thread::sleep(Duration::from_millis(2));
    }

    allocview_agent::stop();
    log::info!("retained {} blocks over {iteration} iterations", kept.len());
}
