use bytes::Bytes;

use crate::error::{PipeError, Result};

/// A value that can travel as one frame on a pipe.
pub trait PipeMessage: Clone + Send + Sync + 'static {
    fn to_payload(&self) -> Bytes;

    fn from_payload(payload: Bytes) -> Result<Self>;
}

/// UTF-8 text.
impl PipeMessage for String {
    fn to_payload(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }

    fn from_payload(payload: Bytes) -> Result<Self> {
        String::from_utf8(payload.to_vec()).map_err(|err| PipeError::Decode(err.to_string()))
    }
}

/// Raw bytes, passed through untouched.
impl PipeMessage for Bytes {
    fn to_payload(&self) -> Bytes {
        self.clone()
    }

    fn from_payload(payload: Bytes) -> Result<Self> {
        Ok(payload)
    }
}
