use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::hooks::Hooks;

/// Which end of a channel this process is.
///
/// The server is expected to exist first and owns creation of the shared
/// files or pipe names; the client attaches to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => f.write_str("server"),
            Role::Client => f.write_str("client"),
        }
    }
}

/// A duplex path to exactly one peer process that carries actions.
///
/// Lifecycle: construct, [`connect`](Channel::connect), any number of
/// [`send`](Channel::send) calls while incoming actions are dispatched on a
/// background thread, then [`stop`](Channel::stop). Stopping twice is a
/// no-op.
pub trait Channel: Send + Sync {
    fn role(&self) -> Role;

    /// Bring the channel up.
    ///
    /// `Ok(false)` means the peer is absent or did not answer within
    /// `timeout`; the channel is left stopped and may be connected again.
    fn connect(&self, timeout: Duration) -> Result<bool>;

    /// Encode and deliver one action to the peer.
    fn send(&self, action: Action, params: &[&str]) -> Result<()>;

    /// Handlers for incoming actions.
    fn dispatcher(&self) -> &Arc<Dispatcher>;

    /// Whether the peer is currently believed to be alive.
    fn is_connected(&self) -> bool;

    /// Shut the channel down and release what it owns.
    fn stop(&self) -> Result<()>;

    fn hooks(&self) -> &Hooks {
        self.dispatcher().hooks()
    }
}
