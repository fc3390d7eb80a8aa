use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: a 4-byte big-endian payload length.
pub const HEADER_SIZE: usize = 4;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Encode one payload into the wire format.
///
/// ```text
/// ┌────────────────────┬──────────────────┐
/// │ Length (4B, BE)    │ Payload          │
/// │ network byte order │ (Length bytes)   │
/// └────────────────────┴──────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u32(len);
    dst.put_slice(payload);
    Ok(())
}

/// Decode one frame from the front of `src`.
///
/// Returns `Ok(None)` until `src` holds a complete frame; on success the
/// frame's bytes are consumed from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Bytes>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(&src[..HEADER_SIZE]);
    let payload_len = u32::from_be_bytes(header) as usize;

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    if src.len() < HEADER_SIZE + payload_len {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    Ok(Some(src.split_to(payload_len).freeze()))
}

/// Configuration for frame readers and writers.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Read timeout applied to pipe streams.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout applied to pipe streams.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
