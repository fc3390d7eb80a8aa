use std::io::ErrorKind;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use crate::error::{Result, TransportError};
use crate::traits::IpcStream;

/// How long a non-blocking accept or a refused connect sleeps before retrying.
const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// A listening pipe endpoint backed by a filesystem-path Unix domain socket.
///
/// The socket file is removed again when the listener is dropped, unless the
/// path has been replaced by something else in the meantime.
pub struct UnixDomainSocket {
    listener: UnixListener,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
}

impl UnixDomainSocket {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// `sockaddr_un.sun_path` is 108 bytes on Linux, 104 on macOS and most BSDs.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen at `path`, replacing a stale socket left behind by a dead server.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind and listen at `path` with an explicit permission mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        let bind_err = |path: &Path, source| TransportError::Bind {
            path: path.to_path_buf(),
            source,
        };

        // Only ever remove sockets; a regular file at the path is someone else's data.
        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if !metadata.file_type().is_socket() {
                return Err(bind_err(
                    &path,
                    std::io::Error::new(ErrorKind::AlreadyExists, "existing path is not a socket"),
                ));
            }
            debug!(?path, "removing stale pipe socket");
            std::fs::remove_file(&path).map_err(|e| bind_err(&path, e))?;
        }

        let listener = UnixListener::bind(&path).map_err(|e| bind_err(&path, e))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| bind_err(&path, e))?;
        let created = std::fs::symlink_metadata(&path).map_err(|e| bind_err(&path, e))?;

        info!(?path, "pipe listening");

        Ok(Self {
            listener,
            path,
            created_inode: Some((created.dev(), created.ino())),
        })
    }

    /// Accept the next connection, blocking until one arrives.
    pub fn accept(&self) -> Result<IpcStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(path = ?self.path, "accepted pipe connection");
        Ok(IpcStream::from_unix(stream))
    }

    /// Accept the next connection, giving up after `timeout` or as soon as
    /// `keep_waiting` returns false.
    ///
    /// The listener is switched to non-blocking mode for the duration of the
    /// call; accepted streams are always returned in blocking mode.
    pub fn accept_timeout(
        &self,
        timeout: Duration,
        keep_waiting: impl Fn() -> bool,
    ) -> Result<IpcStream> {
        self.listener
            .set_nonblocking(true)
            .map_err(TransportError::Accept)?;
        let result = self.poll_accept(timeout, keep_waiting);
        let restore = self.listener.set_nonblocking(false);

        let stream = result?;
        restore.map_err(TransportError::Accept)?;
        Ok(stream)
    }

    fn poll_accept(&self, timeout: Duration, keep_waiting: impl Fn() -> bool) -> Result<IpcStream> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    stream.set_nonblocking(false)?;
                    debug!(path = ?self.path, "accepted pipe connection");
                    return Ok(IpcStream::from_unix(stream));
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if !keep_waiting() {
                        return Err(TransportError::Shutdown);
                    }
                    if Instant::now() >= deadline {
                        return Err(TransportError::AcceptTimeout(timeout));
                    }
                    std::thread::sleep(RETRY_INTERVAL);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Accept(err)),
            }
        }
    }

    /// Connect to a listening pipe (blocking, single attempt).
    pub fn connect(path: impl AsRef<Path>) -> Result<IpcStream> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|e| TransportError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!(?path, "connected to pipe");
        Ok(IpcStream::from_unix(stream))
    }

    /// Connect to a pipe that may not be listening yet.
    ///
    /// Missing or refusing sockets are retried until `timeout` elapses or
    /// `keep_trying` returns false; any other failure is returned at once.
    pub fn connect_with_retry(
        path: impl AsRef<Path>,
        timeout: Duration,
        keep_trying: impl Fn() -> bool,
    ) -> Result<IpcStream> {
        let path = path.as_ref();
        let deadline = Instant::now() + timeout;
        loop {
            match Self::connect(path) {
                Ok(stream) => return Ok(stream),
                Err(TransportError::Connect { source, .. })
                    if matches!(
                        source.kind(),
                        ErrorKind::NotFound | ErrorKind::ConnectionRefused
                    ) =>
                {
                    if !keep_trying() {
                        return Err(TransportError::Shutdown);
                    }
                    if Instant::now() >= deadline {
                        return Err(TransportError::Connect {
                            path: path.to_path_buf(),
                            source,
                        });
                    }
                    trace!(?path, "pipe not listening yet, retrying");
                    std::thread::sleep(RETRY_INTERVAL);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// The path this pipe is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        let Some((expected_dev, expected_ino)) = self.created_inode else {
            return;
        };
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "removing pipe socket");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(path = ?self.path, "pipe path replaced; leaving it alone");
            }
        }
    }
}
