//! Agent errors
//!
//! None of these ever propagate into the host program as a panic: activation
//! failures are returned from [`crate::try_start`] and logged by
//! [`crate::start`], and a failure inside the send loop just ends the loop.

use std::path::PathBuf;

use allocview_common::WireError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("failed to open endpoint {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transport write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("cannot determine executable path: {0}")]
    CurrentExe(#[source] std::io::Error),
}
