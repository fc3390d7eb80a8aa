/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended part-way through a frame.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// Whether a read that failed with this error left the stream unusable.
    ///
    /// Timeouts and interrupted calls leave the stream usable; everything
    /// else (desynchronised length, broken pipe, truncated frame) does not.
    pub fn is_fatal(&self) -> bool {
        match self {
            FrameError::Io(err) => !matches!(
                err.kind(),
                std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
            ),
            FrameError::PayloadTooLarge { .. } | FrameError::ConnectionClosed => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
