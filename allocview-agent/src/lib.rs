//! # allocview sampling agent
//!
//! Linked into the monitored program. Installs nothing by itself: the program
//! opts in with the profiling allocator and a call to [`start`].
//!
//! ```ignore
//! #[global_allocator]
//! static ALLOC: allocview_agent::ProfilingAllocator = allocview_agent::ProfilingAllocator::system();
//!
//! fn main() {
//!     allocview_agent::start();
//!     // ...
//! }
//! ```
//!
//! ## Activation
//!
//! [`start`] reads `ALLOCVIEW_SOCK`. When it is unset nothing happens. When it
//! is set the agent opens the endpoint (see [`transport`]), sends the
//! handshake and then streams one snapshot per tick from a background thread
//! named `allocview-agent`. A transport failure stops the thread; the host
//! program keeps running either way. [`stop`] ends the stream cleanly.
//!
//! ## Key Types
//!
//! - [`ProfilingAllocator`] - `GlobalAlloc` wrapper feeding the profiler
//! - [`AllocProfiler`] - per-stack cumulative counters
//! - [`Agent`] - the send loop, generic over [`ProfileSource`]
//! - [`AgentConfig`] - environment configuration

pub mod agent;
pub mod anchor;
pub mod config;
pub mod error;
pub mod profiler;
pub mod transport;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread::JoinHandle;

use allocview_common::HandshakeMessage;
use log::{info, warn};

pub use agent::{Agent, ProfileSource, Tick, MAX_CAPTURE_ATTEMPTS};
pub use anchor::{allocview_anchor, anchor, ANCHOR_NAME};
pub use config::AgentConfig;
pub use error::AgentError;
pub use profiler::{AllocProfiler, Fill, ProfilingAllocator};
pub use transport::Transport;

static STARTED: AtomicBool = AtomicBool::new(false);
static STOP: AtomicBool = AtomicBool::new(false);
static WORKER: Mutex<Option<JoinHandle<()>>> = Mutex::new(None);

/// Activate the agent if the environment asks for it. Failures are logged
/// and otherwise ignored.
pub fn start() {
    if let Err(e) = try_start() {
        warn!("allocview agent disabled: {e}");
    }
}

/// Like [`start`] but reports what happened.
///
/// Returns `Ok(false)` when no endpoint is configured or the agent is
/// already running.
///
/// # Errors
/// Returns an [`AgentError`] if the endpoint cannot be opened, the
/// executable path is unknown or the handshake cannot be written.
pub fn try_start() -> Result<bool, AgentError> {
    let Some(config) = AgentConfig::from_env() else {
        return Ok(false);
    };
    if STARTED.swap(true, Ordering::AcqRel) {
        return Ok(false);
    }

    let result = launch(&config);
    if result.is_err() {
        STARTED.store(false, Ordering::Release);
    }
    result.map(|()| true)
}

fn launch(config: &AgentConfig) -> Result<(), AgentError> {
    let transport = Transport::open(&config.endpoint)?;
    let exe = std::env::current_exe().map_err(AgentError::CurrentExe)?;
    let (anchor_name, anchor_addr) = anchor();

    let mut agent = Agent::new(transport, profiler::global());
    agent.handshake(&HandshakeMessage {
        exe_path: exe.to_string_lossy().into_owned(),
        anchor_symbol_name: anchor_name.to_string(),
        anchor_runtime_address: anchor_addr,
    })?;

    profiler::enable(config.sample_rate);
    info!(
        "allocview agent attached to {} (rate 1/{})",
        config.endpoint.display(),
        config.sample_rate
    );

    let interval = config.interval;
    let worker = std::thread::Builder::new()
        .name("allocview-agent".to_string())
        .spawn(move || {
            profiler::exclude_current_thread();
            agent.run(interval, &STOP);
        })?;
    if let Ok(mut slot) = WORKER.lock() {
        *slot = Some(worker);
    }
    Ok(())
}

/// Send a final snapshot and close the transport, waiting for the agent
/// thread to finish. Does nothing if the agent is not running.
///
/// Call before the host program exits so the collector sees the stream end
/// on a frame boundary instead of a cut-off frame.
pub fn stop() {
    let worker = WORKER.lock().ok().and_then(|mut slot| slot.take());
    let Some(worker) = worker else {
        return;
    };
    STOP.store(true, Ordering::Release);
    worker.thread().unpark();
    if worker.join().is_err() {
        warn!("allocview agent thread panicked");
    }
}
