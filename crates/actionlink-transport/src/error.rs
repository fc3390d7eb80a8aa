use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// No peer connected before the accept deadline.
    #[error("no connection accepted within {0:?}")]
    AcceptTimeout(Duration),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// A pipe or lock name contains characters that cannot be mapped to an OS name.
    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// The named lock could not be created or opened.
    #[error("failed to open named lock {name}: {source}")]
    LockOpen {
        name: String,
        source: std::io::Error,
    },

    /// The named lock was not released by its holder within the bound.
    #[error("named lock {name} not acquired within {timeout:?}")]
    LockTimeout { name: String, timeout: Duration },

    /// Acquiring or releasing the named lock failed for a reason other than timeout.
    #[error("named lock {name} failed: {source}")]
    Lock {
        name: String,
        source: std::io::Error,
    },

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// Whether this error is a bounded wait running out, as opposed to a broken resource.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            TransportError::LockTimeout { .. } | TransportError::AcceptTimeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
