//! # Collector Session
//!
//! One session watches one monitored program, from launch to the end of its
//! snapshot stream:
//!
//! ```text
//! Endpoint::create ─► spawn CMD with ALLOCVIEW_SOCK=<socket>
//!        │
//!        ▼  accept + handshake, both within connect_deadline
//! Symbols::for_handshake (blocking pool)
//!        │
//!        ▼
//! ┌──────────────────────────┐    ┌────────────────────┐
//! │ read loop → Pipeline     │    │ child.wait()       │
//! └──────────────────────────┘    └────────────────────┘
//!                 first to finish decides the SessionOutcome
//! ```
//!
//! A session can also replay an offline capture file written by an agent
//! started without a socket. Replay has no child process; the outcome is
//! decided by the reader alone.
//!
//! The collection is shared: presentation locks it to read while the read
//! loop keeps applying snapshots.

pub mod endpoint;
pub mod reader;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use allocview_common::{HandshakeMessage, SnapshotPacket, WireError, ENDPOINT_ENV};
use crossbeam_channel::Sender;
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::domain::SessionError;
use crate::pipeline::{Pipeline, SharedCollection};
use crate::series::Collection;
use crate::symbolization::Symbols;

pub use endpoint::Endpoint;

/// Default time the monitored program gets to connect and greet.
pub const CONNECT_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub sample_duration: Duration,
    pub sample_count: usize,
    pub connect_deadline: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_duration: Duration::from_secs(1),
            sample_count: 2048,
            connect_deadline: CONNECT_DEADLINE,
        }
    }
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// The agent closed the stream on a frame boundary.
    StreamEnded,
    /// The stream broke: malformed frame, read error or time going backwards.
    StreamFailed(SessionError),
    /// The monitored program exited before its stream ended.
    ProcessExited(ExitStatus),
}

impl SessionOutcome {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, SessionOutcome::StreamFailed(_))
    }
}

type ReaderTask = JoinHandle<Result<(), SessionError>>;
type ChildTask = JoinHandle<std::io::Result<ExitStatus>>;

/// A running (or replaying) session.
pub struct Session {
    handshake: HandshakeMessage,
    symbols: Symbols,
    collection: SharedCollection,
    reader: ReaderTask,
    child: Option<ChildTask>,
    _endpoint: Option<Endpoint>,
}

impl Session {
    /// Launch `command` and connect to its agent.
    ///
    /// The child is killed if it does not connect and greet within
    /// `config.connect_deadline`.
    ///
    /// # Errors
    /// [`SessionError::Spawn`], [`SessionError::ConnectTimeout`],
    /// [`SessionError::Accept`] or [`SessionError::Handshake`].
    pub async fn launch(
        mut command: Command,
        config: &SessionConfig,
        notify: Option<Sender<()>>,
    ) -> Result<Self, SessionError> {
        let endpoint = Endpoint::create()?;
        let start = now_nanos();
        let program = command.as_std().get_program().to_string_lossy().into_owned();

        command.env(ENDPOINT_ENV, endpoint.path());
        let mut child = command
            .spawn()
            .map_err(|source| SessionError::Spawn { command: program.clone(), source })?;
        info!("launched {program} (pid {:?}), waiting for agent", child.id());

        let greeting = tokio::time::timeout(config.connect_deadline, async {
            let stream = endpoint.accept(config.connect_deadline).await?;
            let mut stream = tokio::io::BufReader::new(stream);
            let hello = reader::read_handshake(&mut stream, &mut Vec::new()).await?;
            Ok::<_, SessionError>((stream, hello))
        })
        .await
        .unwrap_or_else(|_| {
            Err(SessionError::Handshake(WireError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("no handshake within {:?}", config.connect_deadline),
            ))))
        });

        let (mut stream, handshake) = match greeting {
            Ok(greeting) => greeting,
            Err(e) => {
                if let Err(kill) = child.kill().await {
                    debug!("failed to kill {program}: {kill}");
                }
                return Err(e);
            }
        };
        info!(
            "agent connected: {} (anchor {} @ {:#x})",
            handshake.exe_path, handshake.anchor_symbol_name, handshake.anchor_runtime_address
        );

        let symbols = load_symbols(&handshake).await;
        let collection = new_collection(start, config);
        let mut pipeline = build_pipeline(&collection, &symbols, notify);

        let reader = tokio::spawn(async move { reader::stream_snapshots(&mut stream, &mut pipeline).await });
        let child = tokio::spawn(async move { child.wait().await });

        Ok(Self {
            handshake,
            symbols,
            collection,
            reader,
            child: Some(child),
            _endpoint: Some(endpoint),
        })
    }

    /// Replay a capture file. The first snapshot's timestamp is the start
    /// of the time axis.
    ///
    /// # Errors
    /// [`SessionError::Io`] if the file cannot be opened,
    /// [`SessionError::Handshake`] if it does not start with a handshake.
    pub async fn replay(path: &Path, config: &SessionConfig, notify: Option<Sender<()>>) -> Result<Self, SessionError> {
        let capture = path.to_path_buf();
        let (mut file, handshake, first) = tokio::task::spawn_blocking(move || open_capture(&capture))
            .await
            .map_err(|e| SessionError::Io(std::io::Error::other(e)))??;
        info!("replaying {} captured from {}", path.display(), handshake.exe_path);

        let symbols = load_symbols(&handshake).await;
        let start = first.as_ref().map_or(0, |p| p.timestamp_nanos);
        let collection = new_collection(start, config);
        let mut pipeline = build_pipeline(&collection, &symbols, notify);

        let reader = tokio::task::spawn_blocking(move || {
            if let Some(first) = first {
                pipeline.apply(&first)?;
            }
            reader::replay_snapshots(&mut file, &mut pipeline)
        });

        Ok(Self { handshake, symbols, collection, reader, child: None, _endpoint: None })
    }

    #[must_use]
    pub fn handshake(&self) -> &HandshakeMessage {
        &self.handshake
    }

    #[must_use]
    pub fn symbols(&self) -> &Symbols {
        &self.symbols
    }

    #[must_use]
    pub fn collection(&self) -> &SharedCollection {
        &self.collection
    }

    /// Wait for whichever ends first: the stream or the monitored program.
    pub async fn finish(self) -> SessionOutcome {
        self.finish_with_grace(Duration::ZERO).await
    }

    /// Like [`finish`](Self::finish), but when the program exits first,
    /// give the reader up to `grace` to apply snapshots still buffered in
    /// the socket. The outcome stays [`SessionOutcome::ProcessExited`].
    pub async fn finish_with_grace(self, grace: Duration) -> SessionOutcome {
        let Session { mut reader, child, .. } = self;
        let Some(mut child) = child else {
            return reader_outcome(reader.await);
        };

        tokio::select! {
            result = &mut reader => reader_outcome(result),
            status = &mut child => match status {
                Ok(Ok(status)) => {
                    info!("monitored program exited: {status}");
                    if !grace.is_zero() {
                        match tokio::time::timeout(grace, &mut reader).await {
                            Ok(result) => {
                                if let SessionOutcome::StreamFailed(e) = reader_outcome(result) {
                                    warn!("stream failed after exit: {e}");
                                }
                            }
                            Err(_) => debug!("stream still open {grace:?} after exit"),
                        }
                    }
                    SessionOutcome::ProcessExited(status)
                }
                Ok(Err(e)) => SessionOutcome::StreamFailed(SessionError::Io(e)),
                Err(e) => SessionOutcome::StreamFailed(SessionError::Io(std::io::Error::other(e))),
            },
        }
    }
}

type Capture = (BufReader<File>, HandshakeMessage, Option<SnapshotPacket>);

/// Open a capture and read up to its first snapshot.
fn open_capture(path: &Path) -> Result<Capture, SessionError> {
    let mut file = BufReader::new(File::open(path)?);
    let mut buf = Vec::new();
    let handshake = reader::read_handshake_blocking(&mut file, &mut buf)?;
    let first = reader::next_snapshot(&mut file, &mut buf)?;
    Ok((file, handshake, first))
}

fn reader_outcome(result: Result<Result<(), SessionError>, tokio::task::JoinError>) -> SessionOutcome {
    match result {
        Ok(Ok(())) => SessionOutcome::StreamEnded,
        Ok(Err(e)) => SessionOutcome::StreamFailed(e),
        Err(e) => SessionOutcome::StreamFailed(SessionError::Io(std::io::Error::other(e))),
    }
}

async fn load_symbols(handshake: &HandshakeMessage) -> Symbols {
    let hello = handshake.clone();
    match tokio::task::spawn_blocking(move || Symbols::for_handshake(&hello)).await {
        Ok(symbols) => symbols,
        Err(e) => {
            warn!("symbol loading aborted: {e}");
            Symbols::none()
        }
    }
}

fn new_collection(start: i64, config: &SessionConfig) -> SharedCollection {
    Arc::new(Mutex::new(Collection::new(start, config.sample_duration, config.sample_count)))
}

fn build_pipeline(collection: &SharedCollection, symbols: &Symbols, notify: Option<Sender<()>>) -> Pipeline {
    let pipeline = Pipeline::new(Arc::clone(collection), symbols.clone());
    match notify {
        Some(tx) => pipeline.with_notifier(tx),
        None => pipeline,
    }
}

/// Collector wall clock in nanoseconds since the Unix epoch.
#[must_use]
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
}
