//! Transport-independent pieces of actionlink.
//!
//! An [`Action`] plus its string parameters travels between processes as one
//! line of text (see [`message`]). Whatever transport carries the line, the
//! receiving side decodes it and hands it to a [`Dispatcher`], which runs the
//! handlers registered for that action. Transports implement [`Channel`].

pub mod action;
pub mod channel;
pub mod dispatch;
pub mod error;
pub mod hooks;
pub mod message;
pub mod signal;

pub use action::{Action, PROTOCOL_VERSION};
pub use channel::{Channel, Role};
pub use dispatch::{DispatchReport, Dispatcher, Handler};
pub use error::{ErrorKind, LinkError, Result};
pub use hooks::Hooks;
pub use message::{decode, encode, Message};
pub use signal::{ResetSignal, StateFlag};
