//! Transport endpoint: a unix socket in a private temporary directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};

use crate::domain::SessionError;

const SOCKET_NAME: &str = "agent.sock";

/// Listening socket for exactly one agent connection. Dropping the endpoint
/// unlinks the socket and removes its directory.
pub struct Endpoint {
    listener: UnixListener,
    path: PathBuf,
    _dir: tempfile::TempDir,
}

impl Endpoint {
    /// Bind a fresh socket. Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// Returns [`SessionError::Io`] if the directory or socket cannot be
    /// created.
    pub fn create() -> Result<Self, SessionError> {
        let dir = tempfile::Builder::new().prefix("allocview-").tempdir()?;
        let path = dir.path().join(SOCKET_NAME);
        let listener = UnixListener::bind(&path)?;
        Ok(Self { listener, path, _dir: dir })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the agent to connect.
    ///
    /// # Errors
    /// [`SessionError::ConnectTimeout`] when `deadline` passes first,
    /// [`SessionError::Accept`] if accepting fails.
    pub async fn accept(&self, deadline: Duration) -> Result<UnixStream, SessionError> {
        match tokio::time::timeout(deadline, self.listener.accept()).await {
            Ok(Ok((stream, _))) => Ok(stream),
            Ok(Err(e)) => Err(SessionError::Accept(e)),
            Err(_) => Err(SessionError::ConnectTimeout(deadline)),
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accept_times_out() {
        let endpoint = Endpoint::create().unwrap();
        let err = endpoint.accept(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, SessionError::ConnectTimeout(_)));
    }

    #[tokio::test]
    async fn test_accepts_connection_and_unlinks_on_drop() {
        let endpoint = Endpoint::create().unwrap();
        let path = endpoint.path().to_path_buf();
        assert!(path.exists());

        let client = UnixStream::connect(&path).await.unwrap();
        let _server = endpoint.accept(Duration::from_secs(5)).await.unwrap();
        drop(client);

        drop(endpoint);
        assert!(!path.exists());
    }
}
