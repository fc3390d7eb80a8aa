use actionlink_core::LinkError;

/// Errors that can occur in pipe server, client and connection operations.
#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] actionlink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] actionlink_frame::FrameError),

    /// The handshake pipe did not yield a usable data pipe name.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// A received payload is not a valid message.
    #[error("invalid message payload: {0}")]
    Decode(String),

    /// No live connection to push to.
    #[error("not connected")]
    NotConnected,

    /// The connection has already been closed.
    #[error("connection closed")]
    Closed,

    /// A background thread could not be started.
    #[error("failed to spawn thread: {0}")]
    Spawn(std::io::Error),
}

impl PipeError {
    /// Whether this error means the peer is simply not there (as opposed to
    /// something being broken).
    pub fn is_absent_peer(&self) -> bool {
        matches!(self, PipeError::NotConnected | PipeError::Closed)
    }
}

impl From<PipeError> for LinkError {
    fn from(err: PipeError) -> Self {
        if err.is_absent_peer() {
            LinkError::NotConnected
        } else {
            LinkError::resource("pipe transport failed", err)
        }
    }
}

pub type Result<T> = std::result::Result<T, PipeError>;
