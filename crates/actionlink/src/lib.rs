//! Send named actions between two processes.
//!
//! An action is one of a fixed set of requests ([`Action`]) with up to two
//! string parameters. A [`Session`] opens a channel over either shared
//! files or named pipes, dispatches incoming actions to registered handlers
//! and sends actions to the peer.
//!
//! # Crate Structure
//!
//! - [`core`]: actions, the line codec, the dispatcher and the [`Channel`] trait
//! - [`file`]: shared-file channel guarded by a named lock
//! - [`pipe`]: multi-client pipe server and reconnecting client
//! - [`frame`]: length-prefixed framing used on pipes
//! - [`transport`]: sockets, pipe names and the named lock

mod session;

pub use session::{Session, SessionConfig, Transport};

pub use actionlink_core::{
    Action, Channel, DispatchReport, Dispatcher, ErrorKind, Hooks, LinkError, Message, Result,
    Role,
};

/// Re-export core types.
pub mod core {
    pub use actionlink_core::*;
}

/// Re-export the shared-file channel.
pub mod file {
    pub use actionlink_file::*;
}

/// Re-export the pipe transport.
pub mod pipe {
    pub use actionlink_pipe::*;
}

/// Re-export frame types.
pub mod frame {
    pub use actionlink_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use actionlink_transport::*;
}
