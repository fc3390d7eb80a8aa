//! Length-prefixed message framing for the pipe transport.
//!
//! Every message on a pipe is written as a 4-byte big-endian (network order)
//! payload length followed by the payload bytes. Readers only ever see whole
//! messages or a clean end-of-stream; partial frames stay buffered.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{decode_frame, encode_frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
