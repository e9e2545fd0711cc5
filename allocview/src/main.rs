//! # allocview - Main Entry Point
//!
//! Supports three operational modes:
//! - **Live TUI** (`allocview -- CMD...`): launch CMD and watch it interactively
//! - **Headless** (`--headless`): print a summary every sample duration
//! - **Replay** (`--replay FILE`): read an offline capture instead of launching
//!
//! `--export FILE` writes a JSON summary once the session ends, in any mode.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::bounded;
use log::{info, warn};
use tokio::process::Command;

use allocview::cli::Args;
use allocview::domain::SessionError;
use allocview::export::{JsonSummaryExporter, SessionSummary};
use allocview::pipeline::summary;
use allocview::session::{Session, SessionOutcome};
use allocview::tui::{self, Source, TuiContext};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

/// Time the reader gets to drain the socket after the program exits.
const EXIT_GRACE: Duration = Duration::from_secs(1);

fn main() {
    env_logger::init();
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { EXIT_USAGE } else { EXIT_SUCCESS };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    std::process::exit(match run(args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_ERROR
        }
    });
}

#[tokio::main]
async fn run(args: Args) -> Result<()> {
    let quiet = args.quiet;
    let config = args.session_config();
    let (update_tx, update_rx) = bounded(1);

    let (session, source) = match &args.replay {
        Some(path) => (Session::replay(path, &config, Some(update_tx)).await?, Source::Replay),
        None => {
            let (program, program_args) =
                args.command.split_first().context("no command to launch")?;
            let mut command = Command::new(program);
            command.args(program_args);
            (Session::launch(command, &config, Some(update_tx)).await?, Source::Live)
        }
    };

    let exe_path = session.handshake().exe_path.clone();
    let collection = Arc::clone(session.collection());
    let symbols = session.symbols().clone();

    if !quiet {
        println!("allocview v{}", env!("CARGO_PKG_VERSION"));
        println!("target: {exe_path}");
        println!("symbols: {}", if symbols.is_loaded() { "loaded" } else { "unavailable (hex addresses)" });
        if let Some(path) = &args.export {
            println!("export: {}", path.display());
        }
    }

    let finish = session.finish_with_grace(EXIT_GRACE);
    tokio::pin!(finish);

    let outcome = if args.headless {
        let mut ticker = tokio::time::interval(config.sample_duration);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        loop {
            tokio::select! {
                outcome = &mut finish => break Some(outcome),
                _ = ticker.tick() => {
                    let coll = collection.lock();
                    if !quiet && !coll.is_empty() {
                        println!("{}", summary::render(&coll, &symbols, args.top));
                    }
                }
                _ = &mut ctrl_c => {
                    info!("interrupted");
                    break None;
                }
            }
        }
    } else {
        let finished = Arc::new(AtomicBool::new(false));
        let ctx = TuiContext {
            collection: Arc::clone(&collection),
            symbols: symbols.clone(),
            exe_path: exe_path.clone(),
            updates: update_rx,
            finished: Arc::clone(&finished),
            source,
        };
        let mut tui_handle = tokio::task::spawn_blocking(move || tui::run(ctx));

        tokio::select! {
            outcome = &mut finish => {
                finished.store(true, Ordering::Relaxed);
                // The view stays up until the user quits
                tui_handle.await.context("TUI thread panicked")??;
                Some(outcome)
            }
            result = &mut tui_handle => {
                result.context("TUI thread panicked")??;
                None
            }
        }
    };

    let failure = match outcome {
        Some(SessionOutcome::StreamEnded) => {
            info!("stream ended");
            None
        }
        Some(SessionOutcome::ProcessExited(status)) => {
            if !status.success() {
                warn!("monitored program exited with {status}");
            }
            None
        }
        Some(SessionOutcome::StreamFailed(e)) => Some(e),
        None => None,
    };

    {
        let coll = collection.lock();
        if args.headless || !quiet {
            println!("{}", summary::render(&coll, &symbols, args.top));
        }
        if let Some(path) = &args.export {
            let summary = SessionSummary::new(&exe_path, &coll, &symbols);
            JsonSummaryExporter::write(path, &summary)?;
            if !quiet {
                println!("saved: {}", path.display());
            }
        }
    }

    match failure {
        Some(e) => Err(session_failed(e)),
        None => Ok(()),
    }
}

fn session_failed(err: SessionError) -> anyhow::Error {
    anyhow::Error::new(err).context("session failed")
}
