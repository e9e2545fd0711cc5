//! Structured error types for allocview
//!
//! Using thiserror for automatic Display implementation and error chaining.

use std::path::PathBuf;
use std::time::Duration;

use allocview_common::WireError;
use thiserror::Error;

use crate::series::SeriesError;

/// Failures that end a collector session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("monitored process did not connect within {0:?}")]
    ConnectTimeout(Duration),

    #[error("failed to accept agent connection: {0}")]
    Accept(#[source] std::io::Error),

    #[error("failed to launch {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid handshake: {0}")]
    Handshake(#[source] WireError),

    #[error("malformed snapshot: {0}")]
    Wire(#[from] WireError),

    #[error(transparent)]
    NonMonotonicTime(#[from] SeriesError),
}

/// Failures loading debug information. These only disable symbolization;
/// the session keeps collecting.
#[derive(Error, Debug)]
pub enum SymbolError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is not an ELF, Mach-O or PE executable")]
    UnsupportedFormat(PathBuf),

    #[error("{0} has no line table")]
    MissingLineTable(PathBuf),

    #[error("anchor symbol {0:?} not found")]
    AnchorNotFound(String),

    #[error("invalid DWARF data: {0}")]
    Dwarf(#[from] gimli::Error),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to write summary file {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum TuiError {
    #[error("Terminal error: {0}")]
    TerminalError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
