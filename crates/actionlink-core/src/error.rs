use std::time::Duration;

use crate::action::Action;

/// Boxed error carried by [`LinkError::Resource`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by channels, the message codec and the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// A line named an action outside the protocol.
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    /// A line held nothing but whitespace.
    #[error("empty message line")]
    EmptyLine,

    /// A handler was registered for a different number of parameters.
    #[error("{action} handler takes {expected} parameter(s), message carried {actual}")]
    Arity {
        action: Action,
        expected: usize,
        actual: usize,
    },

    /// A handler panicked; the panic was contained.
    #[error("{action} handler panicked: {message}")]
    HandlerPanicked { action: Action, message: String },

    /// A lock, pipe or file could not be created, acquired or used.
    #[error("{context}: {source}")]
    Resource {
        context: String,
        #[source]
        source: BoxError,
    },

    /// A bounded wait ran out.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// There is no live peer to send to.
    #[error("not connected")]
    NotConnected,
}

/// Coarse classification of a [`LinkError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// OS resource failure; fatal to the channel.
    Resource,
    /// Malformed or unknown message; the line is skipped.
    Protocol,
    /// Handler parameter-count mismatch; that handler is skipped.
    Arity,
    /// A handshake or lock wait exceeded its bound.
    Timeout,
    /// A handler failed while running.
    Handler,
}

impl LinkError {
    /// Wrap an underlying failure as a resource error.
    pub fn resource(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        LinkError::Resource {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LinkError::UnknownAction(_) | LinkError::EmptyLine => ErrorKind::Protocol,
            LinkError::Arity { .. } => ErrorKind::Arity,
            LinkError::HandlerPanicked { .. } => ErrorKind::Handler,
            LinkError::Resource { .. } | LinkError::NotConnected => ErrorKind::Resource,
            LinkError::Timeout { .. } => ErrorKind::Timeout,
        }
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
