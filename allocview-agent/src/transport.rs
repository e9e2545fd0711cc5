//! Endpoint resolution
//!
//! The endpoint path names either a listening unix socket (live session with
//! a collector) or anything else, in which case a plain file is created and
//! the same frames are written to it for offline replay.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::AgentError;

pub enum Transport {
    #[cfg(unix)]
    Socket(std::os::unix::net::UnixStream),
    File(BufWriter<File>),
}

impl Transport {
    /// Connect to the socket at `path`, or create a capture file there.
    ///
    /// # Errors
    /// Returns [`AgentError::Connect`] if neither works.
    pub fn open(path: &Path) -> Result<Self, AgentError> {
        let connect_err = |source| AgentError::Connect { path: path.to_path_buf(), source };

        #[cfg(unix)]
        if is_socket(path) {
            return std::os::unix::net::UnixStream::connect(path)
                .map(Transport::Socket)
                .map_err(connect_err);
        }

        File::create(path).map(|f| Transport::File(BufWriter::new(f))).map_err(connect_err)
    }

    #[must_use]
    pub fn is_capture_file(&self) -> bool {
        matches!(self, Transport::File(_))
    }
}

#[cfg(unix)]
fn is_socket(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;
    std::fs::metadata(path).is_ok_and(|m| m.file_type().is_socket())
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            #[cfg(unix)]
            Transport::Socket(s) => s.write(buf),
            Transport::File(f) => f.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            #[cfg(unix)]
            Transport::Socket(s) => s.flush(),
            Transport::File(f) => f.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_plain_path_becomes_capture_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.alloc");

        let mut t = Transport::open(&path).unwrap();
        assert!(t.is_capture_file());
        t.write_all(b"abc").unwrap();
        t.flush().unwrap();
        drop(t);
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
    }

    #[cfg(unix)]
    #[test]
    fn test_existing_socket_is_connected() {
        use std::os::unix::net::UnixListener;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collector.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let mut t = Transport::open(&path).unwrap();
        assert!(!t.is_capture_file());
        t.write_all(b"hi").unwrap();

        let (mut conn, _) = listener.accept().unwrap();
        let mut buf = [0; 2];
        conn.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn test_unwritable_path_is_connect_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("capture.alloc");
        assert!(matches!(Transport::open(&path), Err(AgentError::Connect { .. })));
    }
}
