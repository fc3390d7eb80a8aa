use std::io::{ErrorKind, Write};

use actionlink_transport::IpcStream;
use bytes::BytesMut;

use crate::codec::{encode_frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::reader::transport_to_frame_error;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes length-prefixed messages to any `Write` stream.
///
/// Each call writes one whole message and flushes before returning, so at
/// most one write is ever in flight per writer.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode `payload` behind its length prefix and write it (blocking).
    pub fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_frame(payload, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameWriter<IpcStream> {
    /// Create a frame writer for a pipe stream and apply the write timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::codec::{decode_frame, HEADER_SIZE};
    use crate::reader::FrameReader;

    fn written(writer: FrameWriter<Cursor<Vec<u8>>>) -> BytesMut {
        BytesMut::from(writer.into_inner().into_inner().as_slice())
    }

    #[test]
    fn writes_length_then_payload() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.write_frame(b"Print \"hi\"").unwrap();

        let wire = written(writer);
        assert_eq!(&wire[..HEADER_SIZE], &10u32.to_be_bytes());
        assert_eq!(&wire[HEADER_SIZE..], b"Print \"hi\"");
    }

    #[test]
    fn consecutive_messages_stay_separate() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.write_frame(b"one").unwrap();
        writer.write_frame(b"").unwrap();
        writer.write_frame(b"three").unwrap();

        let mut wire = written(writer);
        let first = decode_frame(&mut wire, usize::MAX).unwrap().unwrap();
        let second = decode_frame(&mut wire, usize::MAX).unwrap().unwrap();
        let third = decode_frame(&mut wire, usize::MAX).unwrap().unwrap();

        assert_eq!(first.as_ref(), b"one");
        assert!(second.is_empty());
        assert_eq!(third.as_ref(), b"three");
        assert!(wire.is_empty());
    }

    #[test]
    fn payload_too_large_rejected_before_writing() {
        let cfg = FrameConfig {
            max_payload_size: 4,
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config(Cursor::new(Vec::<u8>::new()), cfg);

        let err = writer.write_frame(b"oversized").unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 9, max: 4 }));
        assert!(written(writer).is_empty());
    }

    #[test]
    fn every_message_is_flushed() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = FrameWriter::new(sink);

        writer.write_frame(b"x").unwrap();

        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn interrupted_write_and_flush_are_retried() {
        let mut writer = FrameWriter::new(InterruptedOnce {
            write_interrupted: false,
            flush_interrupted: false,
            data: Vec::new(),
        });
        writer.write_frame(b"retry").unwrap();

        let inner = writer.into_inner();
        assert_eq!(inner.data.len(), HEADER_SIZE + 5);
    }

    #[test]
    fn zero_length_write_means_closed() {
        let mut writer = FrameWriter::new(ZeroWriter);
        let err = writer.write_frame(b"x").unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn writing_to_closed_pipe_is_fatal() {
        let (left, right) = IpcStream::pair().unwrap();
        drop(right);

        let mut writer = FrameWriter::new(left);
        // The first write may land in the socket buffer; keep going until the
        // peer's absence is reported.
        let err = (0..16)
            .find_map(|_| writer.write_frame(b"nobody home").err())
            .expect("write to a closed pipe should fail");
        assert!(err.is_fatal());
    }

    #[test]
    fn round_trips_through_pipe_with_timeouts() {
        let (left, right) = IpcStream::pair().unwrap();
        let cfg = FrameConfig {
            read_timeout: Some(std::time::Duration::from_secs(2)),
            write_timeout: Some(std::time::Duration::from_secs(2)),
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config_ipc(left, cfg.clone()).unwrap();
        let mut reader = FrameReader::with_config_ipc(right, cfg).unwrap();

        writer.write_frame(b"Command \"reload\"").unwrap();
        assert_eq!(
            reader.read_frame().unwrap().unwrap().as_ref(),
            b"Command \"reload\""
        );
    }

    #[test]
    fn raw_bytes_match_reader_view() {
        let (left, mut right) = IpcStream::pair().unwrap();
        let mut writer = FrameWriter::new(left);
        writer.write_frame(b"ab").unwrap();

        let mut raw = [0u8; HEADER_SIZE + 2];
        right.read_exact(&mut raw).unwrap();
        assert_eq!(raw, [0, 0, 0, 2, b'a', b'b']);
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
        data: Vec<u8>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct InterruptedOnce {
        write_interrupted: bool,
        flush_interrupted: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptedOnce {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.write_interrupted {
                self.write_interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if !self.flush_interrupted {
                self.flush_interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
