use std::io::{ErrorKind, Read};

use actionlink_transport::{IpcStream, TransportError};
use bytes::{Bytes, BytesMut};

use crate::codec::{decode_frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Partial reads are buffered internally; callers always get whole messages.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete message (blocking).
    ///
    /// Returns `Ok(None)` when the peer closed the stream between messages,
    /// and `Err(FrameError::ConnectionClosed)` when it closed mid-message.
    pub fn read_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(payload) = decode_frame(&mut self.buf, self.config.max_payload_size)? {
                return Ok(Some(payload));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<IpcStream> {
    /// Create a frame reader for a pipe stream and apply the read timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: TransportError) -> FrameError {
    match err {
        TransportError::Io(io) | TransportError::Accept(io) => FrameError::Io(io),
        TransportError::Bind { source, .. } | TransportError::Connect { source, .. } => {
            FrameError::Io(source)
        }
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
